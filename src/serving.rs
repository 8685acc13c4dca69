//! Serving layer: which bundles exist, keeping them loaded, and answering
//! requests against them.
//!
//! - [`registry`]: static key to artifact mapping
//! - [`cache`]: lazily loaded bundles with single-flight initialization
//! - [`service`]: request/response adapter

pub mod cache;
pub mod registry;
pub mod service;

pub use cache::{BundleLoader, FileBundleLoader, ModelCache};
pub use registry::{InputKind, ModelEntry, ModelRegistry, RegistryConfig};
pub use service::{
    ErrorResponse, HealthStatus, LabelProbability, ModelInfo, PredictRequest, PredictResponse,
    PredictionService,
};
