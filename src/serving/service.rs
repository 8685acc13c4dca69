//! Request handling on top of the registry and cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MedisightError, Result};
use crate::predict::{DEFAULT_TOP_N, ModelSelector, predict};
use crate::serving::cache::{BundleLoader, FileBundleLoader, ModelCache};
use crate::serving::registry::{InputKind, ModelEntry, ModelRegistry};
use crate::vectorize::FeatureInput;

/// Body of a prediction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Serving key, e.g. `common` or `heart`.
    pub model: String,
    /// `{ "symptoms": [..] }` or `{ field: number, .. }`.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Variant selector inside the bundle; `best` when absent.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelProbability {
    pub label: String,
    pub probability: f64,
}

/// Body of a successful prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub model: String,
    /// Bundle variant that answered.
    pub variant: String,
    pub prediction: String,
    pub confidence: f64,
    /// Ranked, highest first.
    pub probabilities: Vec<LabelProbability>,
    pub recognized: Vec<String>,
    pub unrecognized: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Body of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub kind: String,
    pub detail: String,
}

impl From<&MedisightError> for ErrorResponse {
    fn from(err: &MedisightError) -> Self {
        let status = match err {
            MedisightError::UnknownModelKey(_) => 404,
            MedisightError::InvalidInput(_) => 400,
            MedisightError::SchemaMismatch { .. } | MedisightError::FeatureMismatch { .. } => 409,
            MedisightError::UntrainedModel(_) => 503,
            _ => 500,
        };
        ErrorResponse {
            status,
            kind: err.kind().to_string(),
            detail: err.to_string(),
        }
    }
}

impl From<MedisightError> for ErrorResponse {
    fn from(err: MedisightError) -> Self {
        ErrorResponse::from(&err)
    }
}

/// Registry entry as reported by [`PredictionService::models`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub key: String,
    pub input: InputKind,
    /// Whether the artifact exists on disk.
    pub available: bool,
    /// Whether the bundle is in the cache.
    pub loaded: bool,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub loaded_models: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Serves predictions for every model in a registry.
#[derive(Debug)]
pub struct PredictionService {
    registry: ModelRegistry,
    cache: ModelCache,
}

impl PredictionService {
    pub fn new(registry: ModelRegistry, cache: ModelCache) -> Self {
        Self { registry, cache }
    }

    /// Service that reads bundles from disk.
    pub fn with_loader(registry: ModelRegistry, loader: Arc<dyn BundleLoader>) -> Self {
        Self::new(registry, ModelCache::new(loader))
    }

    pub fn from_registry(registry: ModelRegistry) -> Self {
        Self::with_loader(registry, Arc::new(FileBundleLoader))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Answer one request.
    pub async fn predict(&self, request: &PredictRequest) -> Result<PredictResponse> {
        let entry = self.registry.get(&request.model)?;
        let input = parse_data(entry, &request.data)?;
        let selector = match request.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => ModelSelector::Best,
        };
        let top_n = request.top_n.unwrap_or(DEFAULT_TOP_N);

        let path = self.registry.artifact_path(&request.model)?;
        let bundle = self.cache.get_or_load(&request.model, &path).await?;
        if entry.expected_features().is_some() {
            bundle.validate_feature_names(&entry.features)?;
        }
        if let FeatureInput::Measurements(values) = &input {
            if !values.keys().any(|name| bundle.schema().contains(name)) {
                return Err(MedisightError::invalid_input(format!(
                    "none of the supplied fields are known to '{}'",
                    request.model
                )));
            }
        }

        let result = predict(&bundle, &input, &selector, top_n)?;
        Ok(PredictResponse {
            model: request.model.clone(),
            variant: result.model_used,
            prediction: result.primary_prediction,
            confidence: result.confidence,
            probabilities: result
                .predictions
                .into_iter()
                .map(|p| LabelProbability {
                    label: p.label,
                    probability: p.probability,
                })
                .collect(),
            recognized: result.recognized,
            unrecognized: result.unrecognized,
            timestamp: Utc::now(),
        })
    }

    /// Like [`predict`](Self::predict), with failures turned into an
    /// [`ErrorResponse`].
    pub async fn handle(&self, request: &PredictRequest) -> std::result::Result<PredictResponse, ErrorResponse> {
        self.predict(request).await.map_err(|e| {
            let response = ErrorResponse::from(&e);
            if response.status >= 500 {
                log::error!("Prediction for '{}' failed: {e}", request.model);
            } else {
                log::debug!("Rejected request for '{}': {e}", request.model);
            }
            response
        })
    }

    /// Decode a JSON body and answer it. Undecodable bodies are a 400.
    pub async fn handle_json(&self, body: &str) -> std::result::Result<PredictResponse, ErrorResponse> {
        let request: PredictRequest = serde_json::from_str(body).map_err(|e| {
            ErrorResponse::from(MedisightError::invalid_input(format!("malformed request: {e}")))
        })?;
        self.handle(&request).await
    }

    /// Registry entries with availability.
    pub fn models(&self) -> Vec<ModelInfo> {
        self.registry
            .entries()
            .map(|(key, entry)| ModelInfo {
                key: key.to_string(),
                input: entry.input,
                available: self
                    .registry
                    .artifact_path(key)
                    .map(|p| p.is_file())
                    .unwrap_or(false),
                loaded: self.cache.is_loaded(key),
                features: entry.features.clone(),
            })
            .collect()
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            service: "medisight".to_string(),
            version: crate::VERSION.to_string(),
            loaded_models: self.cache.loaded_keys(),
            timestamp: Utc::now(),
        }
    }

    /// Load the given keys into the cache. Failures are logged and skipped;
    /// returns how many keys are loaded afterwards.
    pub async fn preload<S: AsRef<str>>(&self, keys: &[S]) -> usize {
        let mut loaded = 0;
        for key in keys {
            let key = key.as_ref();
            let outcome = match self.registry.artifact_path(key) {
                Ok(path) => self.cache.get_or_load(key, &path).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => loaded += 1,
                Err(e) => log::warn!("Preload of '{key}' failed: {e}"),
            }
        }
        loaded
    }
}

/// Turn a request's `data` object into vectorizer input.
fn parse_data(entry: &ModelEntry, data: &Map<String, Value>) -> Result<FeatureInput> {
    match entry.input {
        InputKind::Symptoms => {
            let symptoms = match data.get("symptoms") {
                None => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            MedisightError::invalid_input("symptoms must be strings")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                Some(_) => return Err(MedisightError::invalid_input("symptoms must be a list")),
            };
            Ok(FeatureInput::Symptoms(symptoms))
        }
        InputKind::Measurements => {
            let mut values = BTreeMap::new();
            for (name, value) in data {
                let number = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                    _ => None,
                }
                .ok_or_else(|| {
                    MedisightError::invalid_input(format!("field '{name}' is not a number"))
                })?;
                values.insert(name.clone(), number);
            }
            Ok(FeatureInput::Measurements(values))
        }
    }
}
