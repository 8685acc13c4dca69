//! Static registry of servable models.
//!
//! Maps a serving key to the artifact that backs it, the shape of request
//! data it accepts and the feature list it was trained on.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MedisightError, Result};

/// Shape of the `data` object a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// `{ "symptoms": ["fever", ...] }`
    Symptoms,
    /// `{ "glucose": 148.0, ... }`
    Measurements,
}

/// One servable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Artifact path, relative to the registry's base directory unless absolute.
    pub artifact: PathBuf,
    pub input: InputKind,
    /// Expected features in vector order. Empty means the bundle's own
    /// schema is authoritative and no width check is made.
    #[serde(default)]
    pub features: Vec<String>,
}

impl ModelEntry {
    pub fn new(artifact: impl Into<PathBuf>, input: InputKind, features: &[&str]) -> Self {
        Self {
            artifact: artifact.into(),
            input,
            features: features.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Width a bundle must have to serve this entry, if fixed.
    pub fn expected_features(&self) -> Option<usize> {
        (!self.features.is_empty()).then_some(self.features.len())
    }
}

/// Registry configuration, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory relative artifact paths are resolved against.
    pub base_dir: PathBuf,
    pub models: BTreeMap<String, ModelEntry>,
}

pub const DIABETES_FEATURES: &[&str] = &[
    "pregnancies",
    "glucose",
    "blood_pressure",
    "skin_thickness",
    "insulin",
    "bmi",
    "diabetes_pedigree_function",
    "age",
];

pub const HEART_FEATURES: &[&str] = &[
    "age", "sex", "cp", "trestbps", "chol", "fbs", "restecg", "thalach", "exang", "oldpeak",
    "slope", "ca", "thal",
];

pub const PARKINSONS_FEATURES: &[&str] = &[
    "mdvp_fo_hz",
    "mdvp_fhi_hz",
    "mdvp_flo_hz",
    "mdvp_jitter_percent",
    "mdvp_jitter_abs",
    "mdvp_rap",
    "mdvp_ppq",
    "jitter_ddp",
    "mdvp_shimmer",
    "mdvp_shimmer_db",
    "shimmer_apq3",
    "shimmer_apq5",
    "mdvp_apq",
    "shimmer_dda",
    "nhr",
    "hnr",
    "rpde",
    "dfa",
    "spread1",
    "spread2",
    "ppe",
    "d2",
];

impl Default for RegistryConfig {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "common".to_string(),
            ModelEntry::new("common.bundle", InputKind::Symptoms, &[]),
        );
        models.insert(
            "diabetes".to_string(),
            ModelEntry::new("diabetes.bundle", InputKind::Measurements, DIABETES_FEATURES),
        );
        models.insert(
            "heart".to_string(),
            ModelEntry::new("heart.bundle", InputKind::Measurements, HEART_FEATURES),
        );
        models.insert(
            "parkinsons".to_string(),
            ModelEntry::new("parkinsons.bundle", InputKind::Measurements, PARKINSONS_FEATURES),
        );
        Self {
            base_dir: PathBuf::from("models"),
            models,
        }
    }
}

impl RegistryConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Read-only lookup over a [`RegistryConfig`].
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    config: RegistryConfig,
}

impl ModelRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    /// Entry for `key`, or [`MedisightError::UnknownModelKey`].
    pub fn get(&self, key: &str) -> Result<&ModelEntry> {
        self.config
            .models
            .get(key)
            .ok_or_else(|| MedisightError::unknown_key(key))
    }

    /// Resolved artifact path for `key`.
    pub fn artifact_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.resolve(&self.get(key)?.artifact))
    }

    fn resolve(&self, artifact: &Path) -> PathBuf {
        if artifact.is_absolute() {
            artifact.to_path_buf()
        } else {
            self.config.base_dir.join(artifact)
        }
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.config.models.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ModelEntry)> {
        self.config.models.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
