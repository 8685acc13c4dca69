//! Export manifest listing converted models.
//!
//! An external graph converter writes one file per model key and records it
//! here together with the input width it expects, so a browser-side runtime
//! can size its input tensors without opening the bundles.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bundle::ModelBundle;
use crate::error::Result;

/// File name the manifest is conventionally written under.
pub const MANIFEST_FILE_NAME: &str = "models_manifest.json";

/// One exported model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: String,
    /// File name of the exported model, relative to the manifest.
    pub file: String,
    /// Input width, when the bundle could be read.
    pub n_features: Option<usize>,
}

/// Manifest of exported models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub generated_at: DateTime<Utc>,
    pub models: Vec<ManifestEntry>,
}

impl ExportManifest {
    /// Empty manifest stamped with the current time.
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            models: Vec::new(),
        }
    }

    /// Record a model; `bundle` is `None` when it could not be loaded.
    pub fn add(&mut self, key: impl Into<String>, file: impl Into<String>, bundle: Option<&ModelBundle>) {
        self.models.push(ManifestEntry {
            key: key.into(),
            file: file.into(),
            n_features: bundle.map(ModelBundle::input_dimensionality),
        });
    }

    /// Write as pretty-printed JSON.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::info!("Wrote manifest with {} models to {}", self.models.len(), path.display());
        Ok(())
    }

    /// Read a manifest back.
    pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

impl Default for ExportManifest {
    fn default() -> Self {
        Self::new()
    }
}
