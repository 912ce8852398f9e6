//! Exodus server binary.
//!
//! Registers the application's handlers, record types and transforms,
//! resolves the manifest named by `--manifest` / `EXODUS_MANIFEST`, and
//! serves until SIGINT or SIGTERM.

mod handlers;
mod types;

use std::process::ExitCode;

use clap::Parser;
use exodus_server::telemetry::{init_tracing, install_metrics_exporter};
use exodus_server::{assemble, ServerArgs};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = ServerArgs::parse();

    if let Err(e) = init_tracing(args.log_format) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "exodus exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ServerArgs) -> anyhow::Result<()> {
    if let Some(addr) = args.metrics_addr {
        install_metrics_exporter(addr)?;
    }

    let mut runtime = assemble(args.into_settings(), |r| {
        types::register(r);
        handlers::register(r);
    })?;

    let port = runtime.start().await?;
    info!(port, service = runtime.service(), "exodus listening");
    runtime.serve(termination()).await?;

    info!("exodus stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
