//! The classifier bank.
//!
//! Every algorithm implements the [`Classifier`] trait: fit on a
//! [`TrainingSet`], then map one feature vector to a probability
//! distribution over the sorted class list. Trained classifiers are stored
//! inside a [`Model`] so a whole bank can be serialized into one bundle.
//!
//! # Available classifiers
//!
//! - [`DecisionTreeClassifier`]: CART with gini impurity
//! - [`MultinomialNaiveBayes`]: frequency based, non-negative inputs only
//! - [`RandomForestClassifier`]: bagged decision trees
//! - [`GradientBoostingClassifier`]: softmax boosting of regression trees
//! - [`SvmClassifier`]: one-vs-rest RBF SVM with Platt-scaled probabilities
//! - [`LogisticRegressionClassifier`]: multinomial, L2 regularized
//! - [`SoftVotingClassifier`]: averages the distributions of its members

pub mod decision_tree;
pub mod gradient_boosting;
pub mod logistic;
pub mod naive_bayes;
pub mod random_forest;
pub mod svm;
pub mod voting;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MedisightError, Result};

pub use decision_tree::{DecisionTreeClassifier, DecisionTreeParams, MaxFeatures};
pub use gradient_boosting::{GradientBoostingClassifier, GradientBoostingParams};
pub use logistic::{LogisticRegressionClassifier, LogisticRegressionParams};
pub use naive_bayes::{MultinomialNaiveBayes, NaiveBayesParams};
pub use random_forest::{RandomForestClassifier, RandomForestParams};
pub use svm::{Gamma, SvmClassifier, SvmParams};
pub use voting::SoftVotingClassifier;

/// Which representation of a feature vector a classifier consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputRepresentation {
    /// The vector exactly as produced by the vectorizer.
    Raw,
    /// The vector after the bundle's [`StandardScaler`](crate::scaler::StandardScaler).
    Scaled,
}

impl fmt::Display for InputRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRepresentation::Raw => write!(f, "raw"),
            InputRepresentation::Scaled => write!(f, "scaled"),
        }
    }
}

/// Borrowed training data with integer-encoded targets.
#[derive(Debug, Clone, Copy)]
pub struct TrainingSet<'a> {
    /// Row-major feature matrix, already in the classifier's representation.
    pub rows: &'a [Vec<f64>],
    /// Class index of each row.
    pub targets: &'a [usize],
    /// Sorted class labels; `targets` index into this list.
    pub classes: &'a [String],
}

impl<'a> TrainingSet<'a> {
    /// Check shapes before any fitting happens.
    pub fn validate(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(MedisightError::training("training set is empty"));
        }
        if self.rows.len() != self.targets.len() {
            return Err(MedisightError::training(format!(
                "{} rows but {} targets",
                self.rows.len(),
                self.targets.len()
            )));
        }
        if self.classes.is_empty() {
            return Err(MedisightError::training("no classes"));
        }
        if let Some(&bad) = self.targets.iter().find(|&&t| t >= self.classes.len()) {
            return Err(MedisightError::training(format!(
                "target {bad} out of range for {} classes",
                self.classes.len()
            )));
        }
        let n_features = self.n_features();
        if self.rows.iter().any(|r| r.len() != n_features) {
            return Err(MedisightError::training("rows have inconsistent lengths"));
        }
        Ok(())
    }

    /// Feature count, taken from the first row.
    pub fn n_features(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Number of classes.
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }
}

/// A trainable multiclass classifier with probability output.
///
/// Implementations must return distributions of length `classes().len()`
/// summing to one, and `predict` must agree with the arg-max of
/// `predict_proba` (first maximum wins on ties).
pub trait Classifier: Send + Sync + fmt::Debug {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// The representation this classifier must be fed.
    fn input_representation(&self) -> InputRepresentation;

    /// Fit on the given data, replacing any previous state.
    fn fit(&mut self, data: &TrainingSet<'_>) -> Result<()>;

    /// Whether the classifier has been fitted.
    fn is_fitted(&self) -> bool;

    /// Sorted class labels, empty before fitting.
    fn classes(&self) -> &[String];

    /// Number of features seen at fit time.
    fn n_features(&self) -> usize;

    /// Probability of each class for one vector.
    fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>>;

    /// Index of the predicted class.
    fn predict(&self, x: &[f64]) -> Result<usize> {
        Ok(argmax(&self.predict_proba(x)?))
    }
}

/// A trained classifier of any supported family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Model {
    DecisionTree(DecisionTreeClassifier),
    NaiveBayes(MultinomialNaiveBayes),
    RandomForest(RandomForestClassifier),
    GradientBoosting(GradientBoostingClassifier),
    Svm(SvmClassifier),
    LogisticRegression(LogisticRegressionClassifier),
    SoftVoting(SoftVotingClassifier),
}

impl Model {
    /// Borrow as a trait object.
    pub fn as_classifier(&self) -> &dyn Classifier {
        match self {
            Model::DecisionTree(m) => m,
            Model::NaiveBayes(m) => m,
            Model::RandomForest(m) => m,
            Model::GradientBoosting(m) => m,
            Model::Svm(m) => m,
            Model::LogisticRegression(m) => m,
            Model::SoftVoting(m) => m,
        }
    }

    /// Mutably borrow as a trait object.
    pub fn as_classifier_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Model::DecisionTree(m) => m,
            Model::NaiveBayes(m) => m,
            Model::RandomForest(m) => m,
            Model::GradientBoosting(m) => m,
            Model::Svm(m) => m,
            Model::LogisticRegression(m) => m,
            Model::SoftVoting(m) => m,
        }
    }
}

/// Index of the first maximum; `0` for an empty slice.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Fraction of rows whose predicted class equals the target.
pub fn accuracy(classifier: &dyn Classifier, rows: &[Vec<f64>], targets: &[usize]) -> Result<f64> {
    if rows.is_empty() {
        return Ok(0.0);
    }
    let mut correct = 0usize;
    for (row, &target) in rows.iter().zip(targets) {
        if classifier.predict(row)? == target {
            correct += 1;
        }
    }
    Ok(correct as f64 / rows.len() as f64)
}

/// Shared guard for `predict_proba` implementations.
pub(crate) fn check_input(name: &str, fitted: bool, n_features: usize, x: &[f64]) -> Result<()> {
    if !fitted {
        return Err(MedisightError::untrained(format!("{name} has not been fitted")));
    }
    if x.len() != n_features {
        return Err(MedisightError::schema_mismatch(n_features, x.len()));
    }
    Ok(())
}

/// Pass a distribution through, or fail if the input drove it non-finite.
pub(crate) fn ensure_finite(name: &str, probabilities: Vec<f64>) -> Result<Vec<f64>> {
    if probabilities.iter().all(|p| p.is_finite()) {
        Ok(probabilities)
    } else {
        Err(MedisightError::invalid_input(format!(
            "{name} cannot score this input: feature values out of numeric range"
        )))
    }
}

/// Numerically stable softmax, in place.
pub(crate) fn softmax_in_place(scores: &mut [f64]) {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        sum += *s;
    }
    for s in scores.iter_mut() {
        *s /= sum;
    }
}
