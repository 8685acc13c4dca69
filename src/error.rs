//! Error types for the Medisight library.
//!
//! Every fallible engine operation returns [`MedisightError`]. The serving
//! layer relies on [`MedisightError::kind`] to turn a failure into a
//! structured response, so the variants mirror the failure modes a caller
//! can act on rather than the module they came from.
//!
//! # Examples
//!
//! ```
//! use medisight::error::{MedisightError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(MedisightError::invalid_input("symptoms must be a list"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => assert_eq!(e.kind(), "invalid_input"),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Medisight operations.
#[derive(Error, Debug)]
pub enum MedisightError {
    /// Prediction attempted against a bundle holding no trained classifiers.
    #[error("Untrained model: {0}")]
    UntrainedModel(String),

    /// A prediction mode, variant key or serving key that does not exist.
    #[error("Unknown model key: {0}")]
    UnknownModelKey(String),

    /// The bundle's feature count disagrees with what the caller expects.
    #[error("Schema mismatch: expected {expected} features, bundle has {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    /// The bundle's features have the right count but differ by name or order.
    #[error("Schema mismatch: feature {position} is '{actual}' in the bundle, expected '{expected}'")]
    FeatureMismatch {
        position: usize,
        expected: String,
        actual: String,
    },

    /// A persisted artifact could not be decoded.
    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),

    /// Malformed input (request payload, dataset row, schema definition).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A classifier failed to fit; the whole training run is void.
    #[error("Training error: {0}")]
    Training(String),

    /// An engine invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors (artifact files, datasets).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV parsing errors while loading a dataset.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for operations that may fail with MedisightError.
pub type Result<T> = std::result::Result<T, MedisightError>;

impl MedisightError {
    /// Create a new untrained model error.
    pub fn untrained<S: Into<String>>(msg: S) -> Self {
        MedisightError::UntrainedModel(msg.into())
    }

    /// Create a new unknown model key error.
    pub fn unknown_key<S: Into<String>>(key: S) -> Self {
        MedisightError::UnknownModelKey(key.into())
    }

    /// Create a new schema mismatch error.
    pub fn schema_mismatch(expected: usize, actual: usize) -> Self {
        MedisightError::SchemaMismatch { expected, actual }
    }

    /// Create a new feature name mismatch error.
    pub fn feature_mismatch<E: Into<String>, A: Into<String>>(
        position: usize,
        expected: E,
        actual: A,
    ) -> Self {
        MedisightError::FeatureMismatch {
            position,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a new corrupt artifact error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        MedisightError::CorruptArtifact(msg.into())
    }

    /// Create a new invalid input error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        MedisightError::InvalidInput(msg.into())
    }

    /// Create a new training error.
    pub fn training<S: Into<String>>(msg: S) -> Self {
        MedisightError::Training(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        MedisightError::Internal(msg.into())
    }

    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            MedisightError::UntrainedModel(_) => "untrained_model",
            MedisightError::UnknownModelKey(_) => "unknown_model_key",
            MedisightError::SchemaMismatch { .. } | MedisightError::FeatureMismatch { .. } => {
                "schema_mismatch"
            }
            MedisightError::CorruptArtifact(_) => "corrupt_artifact",
            MedisightError::InvalidInput(_) => "invalid_input",
            MedisightError::Training(_) => "training",
            MedisightError::Internal(_) => "internal",
            MedisightError::Io(_) => "io",
            MedisightError::Json(_) => "json",
            MedisightError::Csv(_) => "csv",
        }
    }
}
