//! The model bundle: everything needed to serve predictions.
//!
//! A bundle holds every trained variant, the scaler, the feature schema,
//! the sorted label set and the best-model record. It is created once by
//! the [`Trainer`](crate::training::Trainer) and is read-only afterwards.
//!
//! Bundles persist as one artifact: a short checksummed header (see
//! [`format`]) followed by a bincode payload. Saving writes a temporary
//! sibling file and renames it into place, so readers never observe a
//! partially written artifact.

pub mod format;
pub mod manifest;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, InputRepresentation, Model};
use crate::error::{MedisightError, Result};
use crate::scaler::StandardScaler;
use crate::schema::FeatureSchema;
use crate::training::TrainingConfig;

pub use format::FORMAT_VERSION;
pub use manifest::{ExportManifest, ManifestEntry};

/// A trained classifier with its key and in-sample accuracy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedVariant {
    pub key: String,
    pub accuracy: f64,
    pub model: Model,
}

impl TrainedVariant {
    pub fn new(key: impl Into<String>, accuracy: f64, model: Model) -> Self {
        Self {
            key: key.into(),
            accuracy,
            model,
        }
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.model.as_classifier()
    }

    /// Representation the variant must be fed.
    pub fn representation(&self) -> InputRepresentation {
        self.classifier().input_representation()
    }
}

/// The variant that won selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestModel {
    pub key: String,
    pub accuracy: f64,
}

/// Human and machine readable overview of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSummary {
    pub format_version: u32,
    pub n_features: usize,
    pub labels: Vec<String>,
    pub n_samples: usize,
    pub trained_at: DateTime<Utc>,
    pub best: BestModel,
    pub variants: Vec<VariantSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub key: String,
    pub family: String,
    pub representation: InputRepresentation,
    pub accuracy: f64,
}

/// Trained pipeline: variants, scaler, schema and selection metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    format_version: u32,
    schema: FeatureSchema,
    labels: Vec<String>,
    variants: Vec<TrainedVariant>,
    scaler: StandardScaler,
    best: BestModel,
    trained_at: DateTime<Utc>,
    n_samples: usize,
    config: TrainingConfig,
}

impl ModelBundle {
    pub(crate) fn new(
        schema: FeatureSchema,
        labels: Vec<String>,
        variants: Vec<TrainedVariant>,
        scaler: StandardScaler,
        best: BestModel,
        n_samples: usize,
        config: TrainingConfig,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            schema,
            labels,
            variants,
            scaler,
            best,
            trained_at: Utc::now(),
            n_samples,
            config,
        }
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Sorted label set shared by every variant.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Variants in training order, ensemble last.
    pub fn variants(&self) -> &[TrainedVariant] {
        &self.variants
    }

    /// Look up a variant by key.
    pub fn variant(&self, key: &str) -> Option<&TrainedVariant> {
        self.variants.iter().find(|v| v.key == key)
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn best(&self) -> &BestModel {
        &self.best
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Hyperparameters the bundle was trained with.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Width of the input vector every variant expects.
    pub fn input_dimensionality(&self) -> usize {
        self.schema.len()
    }

    /// Fail with [`MedisightError::SchemaMismatch`] unless the bundle takes
    /// exactly `expected` features.
    pub fn validate_feature_count(&self, expected: usize) -> Result<()> {
        if self.schema.len() != expected {
            return Err(MedisightError::schema_mismatch(expected, self.schema.len()));
        }
        Ok(())
    }

    /// Fail unless the bundle's features are exactly `expected`, in order.
    pub fn validate_feature_names<S: AsRef<str>>(&self, expected: &[S]) -> Result<()> {
        self.validate_feature_count(expected.len())?;
        for (position, (want, have)) in expected.iter().zip(self.schema.names()).enumerate() {
            if want.as_ref() != have {
                return Err(MedisightError::feature_mismatch(position, want.as_ref(), have.as_str()));
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> BundleSummary {
        BundleSummary {
            format_version: self.format_version,
            n_features: self.schema.len(),
            labels: self.labels.clone(),
            n_samples: self.n_samples,
            trained_at: self.trained_at,
            best: self.best.clone(),
            variants: self
                .variants
                .iter()
                .map(|v| VariantSummary {
                    key: v.key.clone(),
                    family: v.classifier().name().to_string(),
                    representation: v.representation(),
                    accuracy: v.accuracy,
                })
                .collect(),
        }
    }

    /// Serialize into a framed artifact.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| MedisightError::internal(format!("Failed to serialize bundle: {e}")))?;
        format::encode(&payload)
    }

    /// Decode a framed artifact and check its internal consistency.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let payload = format::decode(bytes)?;
        // Same layout as `bincode::serialize`, but no length prefix may
        // claim more bytes than the payload holds.
        let bundle: ModelBundle = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(payload.len() as u64)
            .deserialize(payload)
            .map_err(|e| MedisightError::corrupt(format!("Failed to decode bundle: {e}")))?;
        bundle.check_consistency()?;
        Ok(bundle)
    }

    /// Write the bundle to `path` atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = temp_path(path);
        let written = (|| -> Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(&bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })();
        if let Err(e) = written.and_then(|_| fs::rename(&tmp, path).map_err(Into::into)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        log::info!("Saved bundle ({} bytes) to {}", bytes.len(), path.display());
        Ok(())
    }

    /// Read a bundle written by [`ModelBundle::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let bundle = Self::from_bytes(&bytes)?;
        log::debug!(
            "Loaded bundle from {} ({} variants, {} features)",
            path.display(),
            bundle.variants.len(),
            bundle.schema.len()
        );
        Ok(bundle)
    }

    /// Remove a persisted bundle.
    pub fn delete<P: AsRef<Path>>(path: P) -> Result<()> {
        fs::remove_file(path.as_ref())?;
        log::info!("Deleted bundle {}", path.as_ref().display());
        Ok(())
    }

    fn check_consistency(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(MedisightError::corrupt(format!(
                "payload declares format version {}",
                self.format_version
            )));
        }
        if self.scaler.n_features() != self.schema.len() {
            return Err(MedisightError::corrupt("scaler width differs from schema"));
        }
        for variant in &self.variants {
            let clf = variant.classifier();
            if clf.classes() != self.labels.as_slice() || clf.n_features() != self.schema.len() {
                return Err(MedisightError::corrupt(format!(
                    "variant {} disagrees with the bundle's labels or schema",
                    variant.key
                )));
            }
        }
        if !self.variants.is_empty() && self.variant(&self.best.key).is_none() {
            return Err(MedisightError::corrupt(format!(
                "best model {} is not in the bundle",
                self.best.key
            )));
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
