//! Prediction routing.
//!
//! Resolves a [`ModelSelector`] to one variant of a bundle, vectorizes the
//! observed features, feeds the variant the representation it was trained
//! on and ranks the resulting distribution.
//!
//! The representation is always read from the variant itself
//! ([`Classifier::input_representation`]), never inferred from the
//! selector, so `best` routes correctly whichever variant won.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bundle::{ModelBundle, TrainedVariant};
use crate::classifier::{Classifier, InputRepresentation};
use crate::error::{MedisightError, Result};
use crate::scaler::StandardScaler;
use crate::training::ENSEMBLE_KEY;
use crate::vectorize::{FeatureInput, vectorize};

/// Number of ranked predictions returned when the caller does not ask.
pub const DEFAULT_TOP_N: usize = 5;

/// Which variant of a bundle answers a prediction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelSelector {
    /// The variant that won selection.
    Best,
    /// The soft-voting ensemble.
    Ensemble,
    /// Any variant by key.
    Named(String),
}

impl ModelSelector {
    /// The bundle key this selector points at.
    pub fn resolve_key<'a>(&'a self, bundle: &'a ModelBundle) -> &'a str {
        match self {
            ModelSelector::Best => &bundle.best().key,
            ModelSelector::Ensemble => ENSEMBLE_KEY,
            ModelSelector::Named(key) => key,
        }
    }
}

impl FromStr for ModelSelector {
    type Err = MedisightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(MedisightError::invalid_input("empty model selector")),
            "best" => Ok(ModelSelector::Best),
            "ensemble" => Ok(ModelSelector::Ensemble),
            key => Ok(ModelSelector::Named(key.to_string())),
        }
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSelector::Best => write!(f, "best"),
            ModelSelector::Ensemble => write!(f, "ensemble"),
            ModelSelector::Named(key) => write!(f, "{key}"),
        }
    }
}

/// One entry of the ranked list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPrediction {
    pub label: String,
    pub probability: f64,
    /// 1-based position.
    pub rank: usize,
}

/// Outcome of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Observed identifiers found in the schema.
    pub recognized: Vec<String>,
    /// Observed identifiers the schema does not know.
    pub unrecognized: Vec<String>,
    /// Top-N labels by probability.
    pub predictions: Vec<RankedPrediction>,
    /// The variant's own prediction; always equal to rank 1.
    pub primary_prediction: String,
    /// Probability of the primary prediction.
    pub confidence: f64,
    /// Selector as requested.
    pub mode: String,
    /// Key of the variant that answered.
    pub model_used: String,
}

/// Look up the variant a selector points at.
pub fn resolve_variant<'a>(bundle: &'a ModelBundle, selector: &ModelSelector) -> Result<&'a TrainedVariant> {
    if bundle.variants().is_empty() {
        return Err(MedisightError::untrained("bundle holds no trained variants"));
    }
    let key = selector.resolve_key(bundle);
    bundle
        .variant(key)
        .ok_or_else(|| MedisightError::unknown_key(key))
}

/// Bring a raw vector into the representation `classifier` consumes.
pub fn adapt_input(
    classifier: &dyn Classifier,
    scaler: &StandardScaler,
    vector: &[f64],
) -> Result<Vec<f64>> {
    match classifier.input_representation() {
        InputRepresentation::Raw => Ok(vector.to_vec()),
        InputRepresentation::Scaled => scaler.transform(vector),
    }
}

/// Sort labels by probability, highest first.
///
/// Equal probabilities keep label order. At most `top_n` entries are
/// returned.
pub fn rank(labels: &[String], probabilities: &[f64], top_n: usize) -> Vec<RankedPrediction> {
    let mut order: Vec<usize> = (0..probabilities.len().min(labels.len())).collect();
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
    order
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(pos, i)| RankedPrediction {
            label: labels[i].clone(),
            probability: probabilities[i],
            rank: pos + 1,
        })
        .collect()
}

/// Ranked output for one raw vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub predictions: Vec<RankedPrediction>,
    pub primary: String,
    pub confidence: f64,
}

/// Run one raw vector through `classifier` and rank the result.
///
/// Fails with an internal error if the probabilities are not a finite
/// distribution summing to 1, or if the classifier's own prediction does
/// not match rank 1.
pub fn score_vector(
    classifier: &dyn Classifier,
    scaler: &StandardScaler,
    labels: &[String],
    vector: &[f64],
    top_n: usize,
) -> Result<Scored> {
    if top_n == 0 {
        return Err(MedisightError::invalid_input("top_n must be at least 1"));
    }

    let x = adapt_input(classifier, scaler, vector)?;
    let probabilities = classifier.predict_proba(&x)?;
    if probabilities.len() != labels.len() {
        return Err(MedisightError::internal(format!(
            "{} returned {} probabilities for {} labels",
            classifier.name(),
            probabilities.len(),
            labels.len()
        )));
    }

    let total: f64 = probabilities.iter().sum();
    if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) || (total - 1.0).abs() > 1e-6 {
        return Err(MedisightError::internal(format!(
            "{} returned an invalid distribution {probabilities:?}",
            classifier.name()
        )));
    }

    let predicted = classifier.predict(&x)?;
    let predictions = rank(labels, &probabilities, top_n);
    let primary = labels
        .get(predicted)
        .ok_or_else(|| MedisightError::internal(format!("predicted index {predicted} out of range")))?;
    match predictions.first() {
        Some(top) if top.label == *primary => Ok(Scored {
            confidence: probabilities[predicted],
            primary: primary.clone(),
            predictions,
        }),
        _ => Err(MedisightError::internal(format!(
            "{} predicted {primary} but ranked another label first",
            classifier.name()
        ))),
    }
}

/// Predict with one variant of `bundle`.
pub fn predict(
    bundle: &ModelBundle,
    input: &FeatureInput,
    selector: &ModelSelector,
    top_n: usize,
) -> Result<PredictionResult> {
    if top_n == 0 {
        return Err(MedisightError::invalid_input("top_n must be at least 1"));
    }
    let variant = resolve_variant(bundle, selector)?;
    predict_with_variant(bundle, variant, input, selector, top_n)
}

/// Shorthand for symptom input.
pub fn predict_symptoms<S: AsRef<str>>(
    bundle: &ModelBundle,
    symptoms: &[S],
    selector: &ModelSelector,
    top_n: usize,
) -> Result<PredictionResult> {
    let input = FeatureInput::symptoms(symptoms.iter().map(|s| s.as_ref().to_string()));
    predict(bundle, &input, selector, top_n)
}

/// Predict several cases with one resolved variant.
pub fn predict_batch(
    bundle: &ModelBundle,
    inputs: &[FeatureInput],
    selector: &ModelSelector,
    top_n: usize,
) -> Result<Vec<PredictionResult>> {
    if top_n == 0 {
        return Err(MedisightError::invalid_input("top_n must be at least 1"));
    }
    let variant = resolve_variant(bundle, selector)?;
    inputs
        .par_iter()
        .map(|input| predict_with_variant(bundle, variant, input, selector, top_n))
        .collect()
}

fn predict_with_variant(
    bundle: &ModelBundle,
    variant: &TrainedVariant,
    input: &FeatureInput,
    selector: &ModelSelector,
    top_n: usize,
) -> Result<PredictionResult> {
    let vectorized = vectorize(input, bundle.schema())?;
    log::debug!(
        "Routing {} to {} ({} input, {} recognized)",
        selector,
        variant.key,
        variant.representation(),
        vectorized.recognized.len()
    );

    let scored = score_vector(
        variant.classifier(),
        bundle.scaler(),
        bundle.labels(),
        &vectorized.vector,
        top_n,
    )?;

    Ok(PredictionResult {
        recognized: vectorized.recognized,
        unrecognized: vectorized.unrecognized,
        predictions: scored.predictions,
        primary_prediction: scored.primary,
        confidence: scored.confidence,
        mode: selector.to_string(),
        model_used: variant.key.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TrainingSet;
    use crate::training::ROSTER;
    use crate::training::test_support::trained_bundle;
    use parking_lot::Mutex;

    /// Records the vectors it is asked about.
    #[derive(Debug)]
    struct Recording {
        representation: InputRepresentation,
        classes: Vec<String>,
        output: Vec<f64>,
        seen: Mutex<Vec<Vec<f64>>>,
    }

    impl Recording {
        fn new(representation: InputRepresentation) -> Self {
            Self {
                representation,
                classes: vec!["flu".to_string(), "migraine".to_string()],
                output: vec![0.25, 0.75],
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Classifier for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn input_representation(&self) -> InputRepresentation {
            self.representation
        }

        fn fit(&mut self, _data: &TrainingSet<'_>) -> Result<()> {
            Ok(())
        }

        fn is_fitted(&self) -> bool {
            true
        }

        fn classes(&self) -> &[String] {
            &self.classes
        }

        fn n_features(&self) -> usize {
            2
        }

        fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>> {
            self.seen.lock().push(x.to_vec());
            Ok(self.output.clone())
        }
    }

    fn scaler() -> StandardScaler {
        // mean [1, 2], std [1, 2]
        StandardScaler::fit(&[vec![0.0, 0.0], vec![2.0, 4.0]]).unwrap()
    }

    #[test]
    fn test_scaled_variant_receives_scaled_vector() {
        let double = Recording::new(InputRepresentation::Scaled);
        let scored = score_vector(&double, &scaler(), &double.classes, &[2.0, 4.0], 5).unwrap();
        assert_eq!(*double.seen.lock(), vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
        assert_eq!(scored.primary, "migraine");
        assert_eq!(scored.confidence, 0.75);
    }

    #[test]
    fn test_raw_variant_receives_raw_vector() {
        let double = Recording::new(InputRepresentation::Raw);
        score_vector(&double, &scaler(), &double.classes, &[2.0, 4.0], 1).unwrap();
        assert!(double.seen.lock().iter().all(|x| x == &vec![2.0, 4.0]));
    }

    #[test]
    fn test_invalid_distribution_is_internal_error() {
        for output in [vec![f64::NAN, f64::NAN], vec![0.5, 0.2], vec![1.5, -0.5]] {
            let mut double = Recording::new(InputRepresentation::Raw);
            double.output = output;
            let err = score_vector(&double, &scaler(), &double.classes, &[2.0, 4.0], 2).unwrap_err();
            assert_eq!(err.kind(), "internal");
        }
    }

    #[test]
    fn test_extreme_measurements_every_variant() {
        let bundle = trained_bundle();
        let mut selectors = vec![ModelSelector::Ensemble];
        selectors.extend(ROSTER.iter().map(|k| ModelSelector::Named(k.to_string())));

        for magnitude in [1e300, 1e308, f64::MAX] {
            let input = FeatureInput::Measurements(
                [("fever".to_string(), magnitude), ("cough".to_string(), magnitude)].into(),
            );
            for selector in &selectors {
                let variant = resolve_variant(&bundle, selector).unwrap();
                match predict(&bundle, &input, selector, 5) {
                    Ok(result) => {
                        let total: f64 = result.predictions.iter().map(|p| p.probability).sum();
                        assert!(
                            result.predictions.iter().all(|p| p.probability.is_finite()),
                            "{selector} at {magnitude:e}"
                        );
                        assert!((total - 1.0).abs() < 1e-6, "{selector} at {magnitude:e}");
                    }
                    Err(err) => {
                        assert_eq!(err.kind(), "invalid_input", "{selector} at {magnitude:e}");
                        assert_eq!(variant.representation(), InputRepresentation::Scaled);
                    }
                }
            }
        }

        let input = FeatureInput::Measurements([("fever".to_string(), 1e308)].into());
        let result = predict(&bundle, &input, &ModelSelector::Named("naive_bayes".into()), 2).unwrap();
        assert_eq!(result.primary_prediction, "flu");
    }

    #[test]
    fn test_rank_is_stable_and_clamped() {
        let labels: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let ranked = rank(&labels, &[0.3, 0.4, 0.3], 10);
        let order: Vec<(&str, usize)> = ranked.iter().map(|r| (r.label.as_str(), r.rank)).collect();
        assert_eq!(order, vec![("b", 1), ("a", 2), ("c", 3)]);

        assert_eq!(rank(&labels, &[0.3, 0.4, 0.3], 1).len(), 1);
    }

    #[test]
    fn test_flu_query_every_mode() {
        let bundle = trained_bundle();
        let mut selectors = vec![ModelSelector::Best, ModelSelector::Ensemble];
        selectors.extend(ROSTER.iter().map(|k| ModelSelector::Named(k.to_string())));

        for selector in selectors {
            let result = predict_symptoms(&bundle, &["fever", "cough"], &selector, 5).unwrap();
            assert_eq!(result.recognized, ["fever", "cough"]);
            assert_eq!(result.primary_prediction, "flu", "mode {selector}");
            assert_eq!(result.predictions.len(), 2);
            assert_eq!(result.predictions[0].label, result.primary_prediction);
            assert!(result.predictions[0].probability > 0.5);
            assert_eq!(result.confidence, result.predictions[0].probability);
            let total: f64 = result.predictions.iter().map(|p| p.probability).sum();
            assert!((total - 1.0).abs() < 1e-6);
            assert_eq!(result.mode, selector.to_string());
        }
    }

    #[test]
    fn test_best_resolves_to_winner() {
        let bundle = trained_bundle();
        let result = predict_symptoms(&bundle, &["headache"], &ModelSelector::Best, 1).unwrap();
        assert_eq!(result.model_used, bundle.best().key);
        assert_eq!(result.primary_prediction, "migraine");
        assert_eq!(result.predictions.len(), 1);
    }

    #[test]
    fn test_unrecognized_symptoms_reported() {
        let bundle = trained_bundle();
        let result =
            predict_symptoms(&bundle, &["fever", "sneezing"], &ModelSelector::Ensemble, 3).unwrap();
        assert_eq!(result.recognized, ["fever"]);
        assert_eq!(result.unrecognized, ["sneezing"]);
        assert_eq!(result.model_used, "ensemble");
    }

    #[test]
    fn test_bad_selector_and_top_n() {
        let bundle = trained_bundle();
        let err = predict_symptoms(&bundle, &["fever"], &"xyz".parse().unwrap(), 3).unwrap_err();
        assert_eq!(err.kind(), "unknown_model_key");

        let err = predict_symptoms(&bundle, &["fever"], &ModelSelector::Best, 0).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");

        assert!("  ".parse::<ModelSelector>().is_err());
        assert_eq!("best".parse::<ModelSelector>().unwrap(), ModelSelector::Best);
        assert_eq!(
            "svm".parse::<ModelSelector>().unwrap(),
            ModelSelector::Named("svm".to_string())
        );
    }

    #[test]
    fn test_batch_preserves_order() {
        let bundle = trained_bundle();
        let inputs = vec![
            FeatureInput::symptoms(["headache"]),
            FeatureInput::symptoms(["fever", "cough"]),
            FeatureInput::symptoms(["headache"]),
        ];
        let results = predict_batch(&bundle, &inputs, &ModelSelector::Best, 2).unwrap();
        let primaries: Vec<&str> = results.iter().map(|r| r.primary_prediction.as_str()).collect();
        assert_eq!(primaries, ["migraine", "flu", "migraine"]);
    }
}
