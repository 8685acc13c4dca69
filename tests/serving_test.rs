use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use medisight::bundle::ModelBundle;
use medisight::dataset::Dataset;
use medisight::error::Result;
use medisight::schema::FeatureSchema;
use medisight::serving::{
    BundleLoader, InputKind, ModelEntry, ModelRegistry, PredictRequest, PredictionService,
    RegistryConfig,
};
use medisight::training::{Trainer, TrainingConfig};
use serde_json::{Value, json};
use tempfile::TempDir;

const DIABETES: &[&str] = &[
    "pregnancies",
    "glucose",
    "blood_pressure",
    "skin_thickness",
    "insulin",
    "bmi",
    "diabetes_pedigree_function",
    "age",
];

fn small_config() -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.random_forest.n_estimators = 5;
    config.random_forest.min_samples_split = 2;
    config.decision_tree.min_samples_split = 2;
    config.decision_tree.min_samples_leaf = 1;
    config.gradient_boosting.n_estimators = 5;
    config.logistic_regression.max_iter = 100;
    config.threads = Some(2);
    config
}

fn symptom_bundle() -> Result<ModelBundle> {
    let schema = FeatureSchema::new(["fever", "cough", "headache"])?;
    let rows = vec![
        vec![1.0, 1.0, 0.0],
        vec![1.0, 1.0, 0.0],
        vec![1.0, 0.0, 0.0],
        vec![0.0, 0.0, 1.0],
        vec![0.0, 1.0, 1.0],
    ];
    let labels = ["flu", "flu", "flu", "migraine", "migraine"]
        .map(String::from)
        .to_vec();
    Trainer::new(small_config())?.train(&Dataset::new(schema, rows, labels)?)
}

/// Measurement bundle over `columns`, labelled by whether the second column is high.
fn measurement_bundle(columns: &[&str]) -> Result<ModelBundle> {
    let schema = FeatureSchema::new(columns.iter().copied())?;
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for i in 0..8 {
        let high = i % 2 == 0;
        let row: Vec<f64> = (0..columns.len())
            .map(|c| if c == 1 { if high { 180.0 } else { 90.0 } } else { (i + c) as f64 })
            .collect();
        rows.push(row);
        labels.push(if high { "1" } else { "0" }.to_string());
    }
    Trainer::new(small_config())?.train(&Dataset::new(schema, rows, labels)?)
}

fn registry_in(dir: &Path) -> ModelRegistry {
    let mut models = BTreeMap::new();
    models.insert(
        "common".to_string(),
        ModelEntry::new("common.bundle", InputKind::Symptoms, &[]),
    );
    models.insert(
        "diabetes".to_string(),
        ModelEntry::new("diabetes.bundle", InputKind::Measurements, DIABETES),
    );
    ModelRegistry::new(RegistryConfig {
        base_dir: dir.to_path_buf(),
        models,
    })
}

fn request(model: &str, data: Value) -> PredictRequest {
    PredictRequest {
        model: model.to_string(),
        data: data.as_object().cloned().unwrap_or_default(),
        mode: None,
        top_n: None,
    }
}

#[tokio::test]
async fn test_symptom_request_from_disk() -> Result<()> {
    let dir = TempDir::new()?;
    symptom_bundle()?.save(dir.path().join("common.bundle"))?;
    let service = PredictionService::from_registry(registry_in(dir.path()));

    let response = service
        .handle(&request("common", json!({ "symptoms": ["fever", "cough", "rash"] })))
        .await
        .expect("prediction");
    assert_eq!(response.model, "common");
    assert_eq!(response.prediction, "flu");
    assert_eq!(response.probabilities[0].label, "flu");
    assert_eq!(response.unrecognized, ["rash"]);
    assert!(service.cache().is_loaded("common"));
    assert_eq!(service.health().loaded_models, ["common"]);
    Ok(())
}

#[tokio::test]
async fn test_measurement_request_from_disk() -> Result<()> {
    let dir = TempDir::new()?;
    measurement_bundle(DIABETES)?.save(dir.path().join("diabetes.bundle"))?;
    let service = PredictionService::from_registry(registry_in(dir.path()));

    let body = json!({
        "model": "diabetes",
        "data": { "glucose": 185, "bmi": "33.6", "age": 50 },
        "mode": "ensemble",
        "top_n": 2
    });
    let response = service
        .handle_json(&body.to_string())
        .await
        .expect("prediction");
    assert_eq!(response.variant, "ensemble");
    assert_eq!(response.probabilities.len(), 2);
    assert_eq!(response.recognized, ["glucose", "bmi", "age"]);
    Ok(())
}

#[tokio::test]
async fn test_unknown_key_is_not_found() {
    let dir = TempDir::new().unwrap();
    let service = PredictionService::from_registry(registry_in(dir.path()));

    let err = service
        .handle(&request("xyz", json!({ "symptoms": ["fever"] })))
        .await
        .unwrap_err();
    assert_eq!(err.status, 404);
    assert_eq!(err.kind, "unknown_model_key");
}

#[tokio::test]
async fn test_missing_artifact_is_server_error() {
    let dir = TempDir::new().unwrap();
    let service = PredictionService::from_registry(registry_in(dir.path()));

    let err = service
        .handle(&request("common", json!({ "symptoms": ["fever"] })))
        .await
        .unwrap_err();
    assert_eq!(err.status, 500);
    assert_eq!(err.kind, "io");
    assert!(!service.cache().is_loaded("common"));
}

#[tokio::test]
async fn test_width_mismatch_is_conflict() -> Result<()> {
    let dir = TempDir::new()?;
    let wide: Vec<String> = (0..10).map(|i| format!("f{i}")).collect();
    let wide: Vec<&str> = wide.iter().map(String::as_str).collect();
    measurement_bundle(&wide)?.save(dir.path().join("diabetes.bundle"))?;
    let service = PredictionService::from_registry(registry_in(dir.path()));

    let err = service
        .handle(&request("diabetes", json!({ "glucose": 148 })))
        .await
        .unwrap_err();
    assert_eq!(err.status, 409);
    assert_eq!(err.kind, "schema_mismatch");
    Ok(())
}

#[tokio::test]
async fn test_renamed_columns_are_conflict() -> Result<()> {
    let dir = TempDir::new()?;
    let capitalized = [
        "Pregnancies",
        "Glucose",
        "BloodPressure",
        "SkinThickness",
        "Insulin",
        "BMI",
        "DiabetesPedigreeFunction",
        "Age",
    ];
    measurement_bundle(&capitalized)?.save(dir.path().join("diabetes.bundle"))?;
    let service = PredictionService::from_registry(registry_in(dir.path()));

    let err = service
        .handle(&request("diabetes", json!({ "glucose": 180, "bmi": 30, "age": 50 })))
        .await
        .unwrap_err();
    assert_eq!(err.status, 409);
    assert_eq!(err.kind, "schema_mismatch");
    assert!(err.detail.contains("Pregnancies"));
    Ok(())
}

#[tokio::test]
async fn test_measurements_without_known_fields_are_bad_request() -> Result<()> {
    let dir = TempDir::new()?;
    measurement_bundle(DIABETES)?.save(dir.path().join("diabetes.bundle"))?;
    let service = PredictionService::from_registry(registry_in(dir.path()));

    for data in [json!({ "Glucose": 180 }), json!({})] {
        let err = service.handle(&request("diabetes", data)).await.unwrap_err();
        assert_eq!(err.status, 400);
        assert_eq!(err.kind, "invalid_input");
    }
    Ok(())
}

#[tokio::test]
async fn test_non_numeric_measurement_is_bad_request() -> Result<()> {
    let dir = TempDir::new()?;
    measurement_bundle(DIABETES)?.save(dir.path().join("diabetes.bundle"))?;
    let service = PredictionService::from_registry(registry_in(dir.path()));

    let err = service
        .handle(&request("diabetes", json!({ "glucose": "high" })))
        .await
        .unwrap_err();
    assert_eq!(err.status, 400);

    let err = service.handle_json("{not json").await.unwrap_err();
    assert_eq!(err.status, 400);
    Ok(())
}

#[derive(Debug)]
struct SlowLoader {
    bundle: ModelBundle,
    calls: AtomicUsize,
}

impl BundleLoader for SlowLoader {
    fn load(&self, _key: &str, _path: &Path) -> Result<ModelBundle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        Ok(self.bundle.clone())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_load_once() -> Result<()> {
    let dir = TempDir::new()?;
    let loader = Arc::new(SlowLoader {
        bundle: symptom_bundle()?,
        calls: AtomicUsize::new(0),
    });
    let service = Arc::new(PredictionService::with_loader(
        registry_in(dir.path()),
        loader.clone(),
    ));

    let tasks = (0..8).map(|_| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .handle(&request("common", json!({ "symptoms": ["headache"] })))
                .await
        })
    });
    for outcome in join_all(tasks).await {
        let response = outcome.expect("task").expect("prediction");
        assert_eq!(response.prediction, "migraine");
    }

    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_models_reports_availability() -> Result<()> {
    let dir = TempDir::new()?;
    symptom_bundle()?.save(dir.path().join("common.bundle"))?;
    let service = PredictionService::from_registry(registry_in(dir.path()));

    let models = service.models();
    let common = models.iter().find(|m| m.key == "common").expect("common");
    let diabetes = models.iter().find(|m| m.key == "diabetes").expect("diabetes");
    assert!(common.available);
    assert!(!diabetes.available);
    assert_eq!(diabetes.features.len(), 8);

    assert_eq!(service.preload(&["common", "diabetes"]).await, 1);
    Ok(())
}
