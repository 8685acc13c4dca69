//! # Medisight
//!
//! A multi-model disease prediction engine.
//!
//! ## Features
//!
//! - Trains a roster of classifiers (trees, forests, boosting, naive Bayes,
//!   SVM, logistic regression) plus a soft-voting ensemble in one pass
//! - Picks the most accurate variant and persists everything as one
//!   checksummed bundle
//! - Ranks labels by probability for symptom lists or clinical measurements
//! - Serves several bundles behind a registry with lazy, single-flight loading
//!
//! ## Example
//!
//! ```no_run
//! use medisight::prelude::*;
//!
//! # fn main() -> medisight::error::Result<()> {
//! let dataset = Dataset::from_csv_path("data/dataset.csv", "Source")?;
//! let bundle = Trainer::new(TrainingConfig::default())?.train(&dataset)?;
//! bundle.save("models/common.bundle")?;
//!
//! let result = predict_symptoms(&bundle, &["fever", "cough"], &ModelSelector::Best, 5)?;
//! println!("{} ({:.2})", result.primary_prediction, result.confidence);
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod classifier;
pub mod cli;
pub mod dataset;
pub mod error;
pub mod predict;
pub mod scaler;
pub mod schema;
pub mod serving;
pub mod training;
pub mod vectorize;

pub mod prelude {
    pub use crate::bundle::{ModelBundle, TrainedVariant};
    pub use crate::classifier::{Classifier, InputRepresentation, Model};
    pub use crate::dataset::Dataset;
    pub use crate::error::{MedisightError, Result};
    pub use crate::predict::{ModelSelector, PredictionResult, predict, predict_symptoms};
    pub use crate::schema::FeatureSchema;
    pub use crate::serving::{ModelRegistry, PredictRequest, PredictionService};
    pub use crate::training::{Trainer, TrainingConfig};
    pub use crate::vectorize::FeatureInput;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
