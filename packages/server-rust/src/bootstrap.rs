//! Composition root: registrar -> freeze -> manifest -> resolve -> runtime.
//!
//! Each stage's output is passed explicitly to the next. Faults from every
//! stage are collected into one [`StartupError`] so a single failed start
//! reports everything that is wrong.

use std::fmt;
use std::path::PathBuf;

use exodus_core::{Manifest, ManifestError};
use tracing::{error, info};

use crate::engine::{resolve, DispatchConfig, Registrar, RegistrationError, ResolveError};
use crate::network::{Authenticator, NetworkConfig, ServerRuntime};

/// Service label when neither settings nor the manifest name one.
pub const DEFAULT_SERVICE: &str = "exodus";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One initialization fault.
#[derive(Debug, thiserror::Error)]
pub enum StartupFault {
    #[error("registration: {0}")]
    Registration(#[from] RegistrationError),
    #[error("manifest: {0}")]
    Manifest(#[from] ManifestError),
    #[error("resolution: {0}")]
    Resolve(#[from] ResolveError),
}

/// Every fault found while assembling the server.
#[derive(Debug)]
pub struct StartupError {
    faults: Vec<StartupFault>,
}

impl StartupError {
    #[must_use]
    pub fn faults(&self) -> &[StartupFault] {
        &self.faults
    }
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "startup failed with {} fault(s)", self.faults.len())?;
        for fault in &self.faults {
            write!(f, "\n  - {fault}")?;
        }
        Ok(())
    }
}

impl std::error::Error for StartupError {}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Where the manifest comes from.
#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// TOML file, or JSON when the extension is `.json`.
    Path(PathBuf),
    /// Already parsed.
    Inline(Manifest),
}

/// Everything [`assemble`] needs besides the registrations.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Overrides the manifest's `service`; both absent means `exodus`.
    pub service: Option<String>,
    pub manifest: ManifestSource,
    pub network: NetworkConfig,
    pub dispatch: DispatchConfig,
    /// HS256 secret for bearer tokens; `None` makes every caller anonymous.
    pub jwt_secret: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            service: None,
            manifest: ManifestSource::Path(PathBuf::from("manifest.toml")),
            network: NetworkConfig::default(),
            dispatch: DispatchConfig::default(),
            jwt_secret: None,
        }
    }
}

// ---------------------------------------------------------------------------
// assemble
// ---------------------------------------------------------------------------

/// Runs application registrations, freezes the registries, loads and
/// resolves the manifest, and builds an unstarted [`ServerRuntime`].
///
/// # Errors
///
/// Returns a [`StartupError`] listing every registration, manifest and
/// resolution fault. No runtime is built if there is any.
pub fn assemble(
    settings: ServerSettings,
    register: impl FnOnce(&mut Registrar),
) -> Result<ServerRuntime, StartupError> {
    let mut registrar = Registrar::new();
    register(&mut registrar);
    let (registries, registration_faults) = registrar.freeze();

    let mut faults: Vec<StartupFault> = registration_faults.into_iter().map(Into::into).collect();

    let manifest = match settings.manifest {
        ManifestSource::Path(path) => Manifest::load(&path),
        ManifestSource::Inline(manifest) => Ok(manifest),
    };
    let mut service = settings.service;
    let table = match manifest {
        Ok(manifest) => match resolve(&manifest, &registries) {
            Ok(table) => {
                service = service.or(manifest.service);
                Some(table)
            }
            Err(errors) => {
                faults.extend(errors.into_iter().map(StartupFault::from));
                None
            }
        },
        Err(e) => {
            faults.push(e.into());
            None
        }
    };

    let table = match table {
        Some(table) if faults.is_empty() => table,
        _ => {
            for fault in &faults {
                error!(fault = %fault, "startup fault");
            }
            return Err(StartupError { faults });
        }
    };

    let service = service.unwrap_or_else(|| DEFAULT_SERVICE.to_string());
    info!(service = %service, routes = table.len(), "server assembled");
    Ok(ServerRuntime::new(table, settings.network, &settings.dispatch)
        .with_service(&service)
        .with_authenticator(Authenticator::new(settings.jwt_secret.as_deref())))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
