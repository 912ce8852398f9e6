//! Command-line arguments with environment-variable fallbacks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::bootstrap::{ManifestSource, ServerSettings};
use crate::engine::DispatchConfig;
use crate::network::{NetworkConfig, TlsConfig};
use crate::telemetry::LogFormat;

/// Manifest-driven plugin server.
#[derive(Debug, Clone, Parser)]
#[command(name = "exodus", version, about)]
pub struct ServerArgs {
    /// Route manifest (TOML, or JSON by extension).
    #[arg(long, env = "EXODUS_MANIFEST", default_value = "manifest.toml")]
    pub manifest: PathBuf,

    /// Service name reported by the health endpoint; overrides the manifest.
    #[arg(long, env = "EXODUS_SERVICE")]
    pub service: Option<String>,

    #[arg(long, env = "EXODUS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port; 0 picks an ephemeral port.
    #[arg(long, env = "EXODUS_PORT", default_value_t = 8080)]
    pub port: u16,

    /// PEM certificate chain. Enables TLS together with `--tls-key`.
    #[arg(long, env = "EXODUS_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "EXODUS_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// HS256 secret for bearer tokens. Without it every caller is anonymous.
    #[arg(long, env = "EXODUS_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Per-request deadline covering the whole pipeline.
    #[arg(long, env = "EXODUS_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    /// How long shutdown waits for in-flight requests before cancelling them.
    #[arg(long, env = "EXODUS_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// Requests beyond this are rejected with 503.
    #[arg(long, env = "EXODUS_MAX_CONCURRENT", default_value_t = 1024)]
    pub max_concurrent_requests: u32,

    #[arg(long, env = "EXODUS_MAX_BODY_BYTES", default_value_t = 1_048_576)]
    pub max_body_bytes: usize,

    /// Allowed CORS origins; `*` allows any.
    #[arg(
        long = "cors-origin",
        env = "EXODUS_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "*"
    )]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "EXODUS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "EXODUS_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl ServerArgs {
    /// Converts parsed arguments into assembly settings.
    #[must_use]
    pub fn into_settings(self) -> ServerSettings {
        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
            }),
            _ => None,
        };

        ServerSettings {
            service: self.service,
            manifest: ManifestSource::Path(self.manifest),
            network: NetworkConfig {
                host: self.host,
                port: self.port,
                tls,
                cors_origins: self.cors_origins,
                drain_timeout: Duration::from_secs(self.drain_timeout_secs),
                max_body_bytes: self.max_body_bytes,
            },
            dispatch: DispatchConfig {
                max_concurrent_requests: self.max_concurrent_requests,
                request_timeout: Duration::from_millis(self.request_timeout_ms),
            },
            jwt_secret: self.jwt_secret.filter(|s| !s.is_empty()),
        }
    }
}
