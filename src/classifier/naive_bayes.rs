//! Multinomial naive Bayes.
//!
//! Treats each feature value as a count, so inputs must be non-negative.
//! Symptom vectors (0/1) satisfy this directly; scaled vectors do not, which
//! is why this classifier always consumes the raw representation.

use serde::{Deserialize, Serialize};

use crate::classifier::{
    Classifier, InputRepresentation, TrainingSet, check_input, ensure_finite, softmax_in_place,
};
use crate::error::{MedisightError, Result};

/// Naive Bayes hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayesParams {
    /// Additive (Laplace/Lidstone) smoothing.
    pub alpha: f64,
}

impl Default for NaiveBayesParams {
    fn default() -> Self {
        Self { alpha: 0.1 }
    }
}

/// Multinomial naive Bayes classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultinomialNaiveBayes {
    params: NaiveBayesParams,
    classes: Vec<String>,
    n_features: usize,
    /// `ln P(class)`.
    class_log_prior: Vec<f64>,
    /// `ln P(feature | class)`, one row per class.
    feature_log_prob: Vec<Vec<f64>>,
}

impl MultinomialNaiveBayes {
    /// Create an unfitted classifier.
    pub fn new(params: NaiveBayesParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            n_features: 0,
            class_log_prior: Vec::new(),
            feature_log_prob: Vec::new(),
        }
    }
}

impl Default for MultinomialNaiveBayes {
    fn default() -> Self {
        Self::new(NaiveBayesParams::default())
    }
}

fn check_non_negative(x: &[f64]) -> Result<()> {
    if x.iter().any(|&v| v < 0.0) {
        return Err(MedisightError::invalid_input(
            "multinomial naive Bayes requires non-negative feature values",
        ));
    }
    Ok(())
}

impl Classifier for MultinomialNaiveBayes {
    fn name(&self) -> &str {
        "naive_bayes"
    }

    fn input_representation(&self) -> InputRepresentation {
        InputRepresentation::Raw
    }

    fn fit(&mut self, data: &TrainingSet<'_>) -> Result<()> {
        data.validate()?;
        if self.params.alpha <= 0.0 {
            return Err(MedisightError::training("naive Bayes alpha must be positive"));
        }
        for row in data.rows {
            check_non_negative(row).map_err(|e| MedisightError::training(e.to_string()))?;
        }

        let n_classes = data.n_classes();
        let n_features = data.n_features();
        let mut class_count = vec![0usize; n_classes];
        let mut feature_count = vec![vec![0.0; n_features]; n_classes];

        for (row, &target) in data.rows.iter().zip(data.targets) {
            class_count[target] += 1;
            for (acc, v) in feature_count[target].iter_mut().zip(row) {
                *acc += v;
            }
        }

        let n = data.rows.len() as f64;
        // Classes absent from the data get a vanishing prior instead of -inf.
        self.class_log_prior = class_count
            .iter()
            .map(|&c| if c > 0 { (c as f64 / n).ln() } else { f64::MIN_POSITIVE.ln() })
            .collect();

        let alpha = self.params.alpha;
        self.feature_log_prob = feature_count
            .iter()
            .map(|counts| {
                let total: f64 = counts.iter().sum::<f64>() + alpha * n_features as f64;
                counts.iter().map(|c| ((c + alpha) / total).ln()).collect()
            })
            .collect();

        self.classes = data.classes.to_vec();
        self.n_features = n_features;
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.feature_log_prob.is_empty()
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_input(self.name(), self.is_fitted(), self.n_features, x)?;
        check_non_negative(x)?;

        let mut joint = self.joint_log_likelihood(x);
        if joint.iter().any(|j| !j.is_finite()) {
            joint = self.relative_log_likelihood(x);
        }
        softmax_in_place(&mut joint);
        ensure_finite(self.name(), joint)
    }
}

impl MultinomialNaiveBayes {
    /// `ln P(class) + Σ xᵢ ln P(featureᵢ | class)` per class.
    fn joint_log_likelihood(&self, x: &[f64]) -> Vec<f64> {
        self.class_log_prior
            .iter()
            .zip(&self.feature_log_prob)
            .map(|(prior, log_prob)| prior + dot(x, log_prob))
            .collect()
    }

    /// Joint log-likelihoods shifted by the leading class, for counts so
    /// large that the plain sums overflow.
    ///
    /// Counts are divided by their maximum `s` so every partial sum stays
    /// finite; the shift `s · (dᶜ - dᵐ)` may still saturate to `-inf`,
    /// which softmax maps to zero.
    fn relative_log_likelihood(&self, x: &[f64]) -> Vec<f64> {
        let s = x.iter().copied().fold(0.0_f64, f64::max);
        let unit: Vec<f64> = x.iter().map(|v| v / s).collect();
        let d: Vec<f64> = self
            .feature_log_prob
            .iter()
            .map(|log_prob| dot(&unit, log_prob))
            .collect();

        let mut lead = 0;
        for c in 1..d.len() {
            if (d[c], self.class_log_prior[c]) > (d[lead], self.class_log_prior[lead]) {
                lead = c;
            }
        }
        d.iter()
            .zip(&self.class_log_prior)
            .map(|(dc, prior)| (prior - self.class_log_prior[lead]) + s * (dc - d[lead]))
            .collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
