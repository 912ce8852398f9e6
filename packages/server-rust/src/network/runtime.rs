//! Server runtime with deferred startup lifecycle.
//!
//! `new()` takes the resolved route table and allocates shared state,
//! `start()` binds the TCP listener, and `serve()` accepts connections until
//! the shutdown future resolves, then drains.
//!
//! A runtime can only be built from a [`RouteTable`], which can only be
//! produced from frozen registries, so no request is ever served before
//! registration and resolution are complete.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::auth::Authenticator;
use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{
    dispatch_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::engine::{
    build_dispatch_pipeline, DispatchConfig, DispatchPipeline, Dispatcher, RouteTable,
    RESERVED_PREFIX,
};

/// How long connections may linger after in-flight requests were drained
/// or cancelled before the server task is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Manages the HTTP server lifecycle around one immutable route table.
///
/// 1. `new()` -- builds the dispatch pipeline and shutdown controller
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- accepts requests until shutdown, then drains
pub struct ServerRuntime {
    config: NetworkConfig,
    service: Arc<str>,
    table: Arc<RouteTable>,
    pipeline: DispatchPipeline,
    auth: Arc<Authenticator>,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl ServerRuntime {
    /// Creates a runtime without binding any port. Callers are anonymous
    /// until an authenticator is set.
    #[must_use]
    pub fn new(table: RouteTable, config: NetworkConfig, dispatch: &DispatchConfig) -> Self {
        let table = Arc::new(table);
        let pipeline = build_dispatch_pipeline(Dispatcher::new(Arc::clone(&table)), dispatch);
        let gate = pipeline.gate().clone();
        Self {
            config,
            service: Arc::from("exodus"),
            table,
            pipeline,
            auth: Arc::new(Authenticator::anonymous()),
            listener: None,
            shutdown: Arc::new(ShutdownController::with_gate(gate)),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_service(mut self, service: &str) -> Self {
        self.service = Arc::from(service);
        self
    }

    #[must_use]
    pub fn with_authenticator(mut self, auth: Authenticator) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    #[must_use]
    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Shared shutdown controller, for health checks or triggering shutdown.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router.
    ///
    /// Routes:
    /// - `GET /_exodus/health` -- detailed health JSON
    /// - `GET /_exodus/live` -- liveness check
    /// - `GET /_exodus/ready` -- readiness check
    /// - everything else -- the dispatch pipeline
    pub fn build_router(&self) -> Router {
        let state = AppState {
            pipeline: self.pipeline.clone(),
            table: Arc::clone(&self.table),
            shutdown: Arc::clone(&self.shutdown),
            auth: Arc::clone(&self.auth),
            service: Arc::clone(&self.service),
            start_time: self.start_time,
        };

        let layers = build_http_layers(&self.config);

        Router::new()
            .route(&format!("{RESERVED_PREFIX}/health"), get(health_handler))
            .route(&format!("{RESERVED_PREFIX}/live"), get(liveness_handler))
            .route(&format!("{RESERVED_PREFIX}/ready"), get(readiness_handler))
            .fallback(dispatch_handler)
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(layers)
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the bound port, which differs from the configured one when
    /// port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, routes = self.table.len(), "listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves or the controller's
    /// `trigger_shutdown()` is called.
    ///
    /// After the signal:
    /// 1. Health state moves to Draining; new dispatches get 503
    /// 2. In-flight requests get up to `drain_timeout` to finish
    /// 3. Whatever is still running is cancelled
    /// 4. Health state moves to Stopped and the listener is released
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, TLS material cannot be
    /// loaded, or the server hits a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let Self {
            config,
            listener,
            shutdown: ctrl,
            ..
        } = self;
        let listener =
            listener.ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;

        ctrl.set_ready();
        let signal = shutdown_signal(shutdown, Arc::clone(&ctrl));

        if let Some(ref tls) = config.tls {
            serve_tls(listener, router, tls, ctrl, signal, config.drain_timeout).await
        } else {
            serve_plain(listener, router, ctrl, signal, config.drain_timeout).await
        }
    }
}

/// Serves plain HTTP using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    ctrl: Arc<ShutdownController>,
    signal: impl Future<Output = ()> + Send + 'static,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    info!("serving plain HTTP");

    let server = tokio::spawn(
        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .into_future(),
    );
    supervise(server, ctrl, drain_timeout, || {}).await
}

/// Serves TLS using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    ctrl: Arc<ShutdownController>,
    signal: impl Future<Output = ()> + Send + 'static,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let graceful = handle.clone();

    tokio::spawn(async move {
        signal.await;
        graceful.graceful_shutdown(None);
    });

    info!(%addr, "serving TLS");

    let server = tokio::spawn(
        axum_server::from_tcp_rustls(std_listener, rustls_config)
            .handle(handle.clone())
            .serve(router.into_make_service()),
    );
    supervise(server, ctrl, drain_timeout, move || handle.shutdown()).await
}

/// Resolves when either the external future fires or shutdown was
/// triggered through the controller, and moves the controller to Draining.
async fn shutdown_signal(external: impl Future<Output = ()>, ctrl: Arc<ShutdownController>) {
    let requested = shutdown_requested(ctrl.shutdown_receiver());
    tokio::select! {
        () = external => info!("shutdown signal received"),
        () = requested => {}
    }
    ctrl.trigger_shutdown();
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    loop {
        let stopping = *rx.borrow_and_update();
        if stopping || rx.changed().await.is_err() {
            return;
        }
    }
}

/// Waits for the server task, bounding the drain once shutdown starts.
async fn supervise(
    mut server: JoinHandle<std::io::Result<()>>,
    ctrl: Arc<ShutdownController>,
    drain_timeout: Duration,
    force_close: impl FnOnce(),
) -> anyhow::Result<()> {
    tokio::select! {
        result = &mut server => {
            ctrl.set_stopped();
            result??;
            return Ok(());
        }
        () = shutdown_requested(ctrl.shutdown_receiver()) => {}
    }

    if ctrl.wait_for_drain(drain_timeout).await {
        info!("all in-flight requests drained");
    } else {
        warn!(
            in_flight = ctrl.in_flight_count(),
            "drain timeout expired; cancelling in-flight requests"
        );
        ctrl.cancel_in_flight();
    }

    let result = match tokio::time::timeout(CLOSE_GRACE, &mut server).await {
        Ok(joined) => joined.map_err(anyhow::Error::from).and_then(|r| r.map_err(Into::into)),
        Err(_) => {
            warn!("connections still open after drain; closing listener");
            force_close();
            server.abort();
            Ok(())
        }
    };
    ctrl.set_stopped();
    info!("server stopped");
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
