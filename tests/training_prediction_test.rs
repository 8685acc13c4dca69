use std::io::Write;

use medisight::bundle::ModelBundle;
use medisight::classifier::InputRepresentation;
use medisight::dataset::Dataset;
use medisight::error::{MedisightError, Result};
use medisight::predict::{ModelSelector, predict, predict_batch, predict_symptoms};
use medisight::training::{ENSEMBLE_KEY, ROSTER, Trainer, TrainingConfig};
use medisight::vectorize::FeatureInput;
use tempfile::{NamedTempFile, TempDir};

const FLU_MIGRAINE_CSV: &str = "\
,fever,cough,headache,Source
0,1,1,0,flu
1,1,1,0,flu
2,1,1,0,flu
3,0,0,1,migraine
4,0,0,1,migraine
";

fn small_config() -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.random_forest.n_estimators = 10;
    config.random_forest.min_samples_split = 2;
    config.gradient_boosting.n_estimators = 10;
    config.decision_tree.min_samples_split = 2;
    config.decision_tree.min_samples_leaf = 1;
    config.logistic_regression.max_iter = 200;
    config.threads = Some(2);
    config
}

fn load_csv(contents: &str) -> Result<Dataset> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Dataset::from_csv_path(file.path(), "Source")
}

fn train_flu_migraine() -> Result<ModelBundle> {
    let dataset = load_csv(FLU_MIGRAINE_CSV)?;
    Trainer::new(small_config())?.train(&dataset)
}

#[test]
fn test_train_from_csv_produces_every_variant() -> Result<()> {
    let bundle = train_flu_migraine()?;

    assert_eq!(bundle.schema().names(), ["fever", "cough", "headache"]);
    assert_eq!(bundle.labels(), ["flu", "migraine"]);
    assert_eq!(bundle.n_samples(), 5);

    let keys: Vec<&str> = bundle.variants().iter().map(|v| v.key.as_str()).collect();
    let mut expected: Vec<&str> = ROSTER.to_vec();
    expected.push(ENSEMBLE_KEY);
    assert_eq!(keys, expected);

    for variant in bundle.variants() {
        assert!((0.0..=1.0).contains(&variant.accuracy), "{}", variant.key);
    }
    let best = bundle.best();
    assert!(
        bundle
            .variants()
            .iter()
            .all(|v| v.accuracy <= best.accuracy)
    );

    assert_eq!(
        bundle.variant("svm").map(|v| v.representation()),
        Some(InputRepresentation::Scaled)
    );
    assert_eq!(
        bundle.variant("naive_bayes").map(|v| v.representation()),
        Some(InputRepresentation::Raw)
    );
    Ok(())
}

#[test]
fn test_flu_is_predicted_for_fever_and_cough() -> Result<()> {
    let bundle = train_flu_migraine()?;

    for selector in [ModelSelector::Best, ModelSelector::Ensemble] {
        let result = predict_symptoms(&bundle, &["fever", "cough"], &selector, 5)?;
        assert_eq!(result.primary_prediction, "flu");
        assert_eq!(result.predictions[0].label, "flu");
        assert_eq!(result.predictions[0].rank, 1);
        assert_eq!(result.confidence, result.predictions[0].probability);
        assert!(result.confidence > 0.5);

        let total: f64 = result.predictions.iter().map(|p| p.probability).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn test_unrecognized_symptoms_are_reported() -> Result<()> {
    let bundle = train_flu_migraine()?;

    let result = predict_symptoms(&bundle, &["headache", "sneezing"], &ModelSelector::Best, 1)?;
    assert_eq!(result.recognized, ["headache"]);
    assert_eq!(result.unrecognized, ["sneezing"]);
    assert_eq!(result.predictions.len(), 1);
    assert_eq!(result.primary_prediction, "migraine");
    Ok(())
}

#[test]
fn test_unknown_mode_is_rejected() -> Result<()> {
    let bundle = train_flu_migraine()?;

    let selector: ModelSelector = "xyz".parse()?;
    let err = predict(
        &bundle,
        &FeatureInput::symptoms(["fever"]),
        &selector,
        5,
    )
    .unwrap_err();
    assert!(matches!(err, MedisightError::UnknownModelKey(_)));
    Ok(())
}

#[test]
fn test_batch_matches_single_predictions() -> Result<()> {
    let bundle = train_flu_migraine()?;
    let inputs = vec![
        FeatureInput::symptoms(["fever", "cough"]),
        FeatureInput::symptoms(["headache"]),
        FeatureInput::symptoms(["fever"]),
    ];

    let batch = predict_batch(&bundle, &inputs, &ModelSelector::Best, 2)?;
    assert_eq!(batch.len(), inputs.len());
    for (input, result) in inputs.iter().zip(&batch) {
        let single = predict(&bundle, input, &ModelSelector::Best, 2)?;
        assert_eq!(result.primary_prediction, single.primary_prediction);
        assert_eq!(result.predictions, single.predictions);
    }
    Ok(())
}

#[test]
fn test_persisted_bundle_predicts_identically() -> Result<()> {
    let bundle = train_flu_migraine()?;
    let dir = TempDir::new()?;
    let path = dir.path().join("common.bundle");

    bundle.save(&path)?;
    let restored = ModelBundle::load(&path)?;

    assert_eq!(restored.summary(), bundle.summary());
    for key in ROSTER.iter().copied().chain([ENSEMBLE_KEY]) {
        let selector = ModelSelector::Named(key.to_string());
        for symptoms in [&["fever", "cough"][..], &["headache"][..], &[][..]] {
            let before = predict_symptoms(&bundle, symptoms, &selector, 5)?;
            let after = predict_symptoms(&restored, symptoms, &selector, 5)?;
            assert_eq!(before.predictions, after.predictions, "{key}");
        }
    }

    ModelBundle::delete(&path)?;
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_truncated_bundle_is_corrupt() -> Result<()> {
    let bundle = train_flu_migraine()?;
    let bytes = bundle.to_bytes()?;

    let err = ModelBundle::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
    assert_eq!(err.kind(), "corrupt_artifact");
    Ok(())
}

#[test]
fn test_single_label_dataset_is_rejected() -> Result<()> {
    let dataset = load_csv(",fever,Source\n0,1,flu\n1,0,flu\n")?;
    let err = Trainer::new(small_config())?.train(&dataset).unwrap_err();
    assert!(matches!(err, MedisightError::InvalidInput(_)));
    Ok(())
}
