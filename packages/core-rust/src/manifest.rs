//! Declarative route manifest.
//!
//! The manifest only carries names; binding them to live handlers, record
//! types and transforms is the resolver's job. Documents are TOML by default
//! and JSON when the file extension is `.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Errors loading or parsing a manifest document.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML manifest: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parsed manifest: an ordered list of routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Service label, informational only.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub routes: Vec<ManifestRoute>,
}

/// One route as declared in the manifest, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestRoute {
    pub path: String,
    pub method: String,
    pub handler: String,
    /// Record type the request body decodes into.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Transform names applied in this exact order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<String>,
    #[serde(default, alias = "role", skip_serializing_if = "Option::is_none")]
    pub required_role: Option<String>,
}

impl ManifestRoute {
    pub fn new(method: impl Into<String>, path: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            handler: handler.into(),
            type_name: None,
            transforms: Vec::new(),
            required_role: None,
        }
    }

    #[must_use]
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    #[must_use]
    pub fn with_transforms<I, S>(mut self, transforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transforms = transforms.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = Some(role.into());
        self
    }

    /// `METHOD path` label used in logs and errors.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method.to_ascii_uppercase(), self.path)
    }
}

impl Manifest {
    pub fn new(routes: Vec<ManifestRoute>) -> Self {
        Self {
            service: None,
            routes,
        }
    }

    /// # Errors
    ///
    /// Returns [`ManifestError::Toml`] on syntax or schema errors.
    pub fn from_toml_str(source: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(source)?)
    }

    /// # Errors
    ///
    /// Returns [`ManifestError::Json`] on syntax or schema errors.
    pub fn from_json_str(source: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Reads and parses a manifest file, choosing the format by extension.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be read, or a parse
    /// error for the detected format.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let manifest = if is_json {
            Self::from_json_str(&source)?
        } else {
            Self::from_toml_str(&source)?
        };
        tracing::info!(
            path = %path.display(),
            routes = manifest.routes.len(),
            "manifest loaded"
        );
        Ok(manifest)
    }
}
