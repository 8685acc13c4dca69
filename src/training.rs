//! Training orchestration.
//!
//! [`Trainer`] fits the fixed classifier roster on one [`Dataset`], builds
//! the soft-voting ensemble from the fitted tree models, picks the best
//! variant by in-sample accuracy and packs everything into a
//! [`ModelBundle`]. A failure in any variant fails the whole run.

use std::fs;
use std::path::Path;
use std::time::Instant;

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::bundle::{BestModel, ModelBundle, TrainedVariant};
use crate::classifier::{
    DecisionTreeClassifier, DecisionTreeParams, GradientBoostingClassifier,
    GradientBoostingParams, InputRepresentation, LogisticRegressionClassifier,
    LogisticRegressionParams, Model, MultinomialNaiveBayes, NaiveBayesParams,
    RandomForestClassifier, RandomForestParams, SoftVotingClassifier, SvmClassifier, SvmParams,
    TrainingSet, accuracy,
};
use crate::dataset::{Dataset, EncodedTargets};
use crate::error::{MedisightError, Result};
use crate::scaler::StandardScaler;

/// Roster keys in training order.
pub const ROSTER: [&str; 6] = [
    "decision_tree",
    "naive_bayes",
    "random_forest",
    "gradient_boosting",
    "svm",
    "logistic_regression",
];

/// Key of the soft-voting ensemble, stored after the roster.
pub const ENSEMBLE_KEY: &str = "ensemble";

/// Roster members that vote in the ensemble.
pub const ENSEMBLE_MEMBERS: [&str; 3] = ["random_forest", "gradient_boosting", "decision_tree"];

/// Hyperparameters for every roster member plus the training pool size.
///
/// Missing fields in a JSON file fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub decision_tree: DecisionTreeParams,
    pub naive_bayes: NaiveBayesParams,
    pub random_forest: RandomForestParams,
    pub gradient_boosting: GradientBoostingParams,
    pub svm: SvmParams,
    pub logistic_regression: LogisticRegressionParams,
    /// Worker threads for parallel fitting; `None` uses every CPU.
    pub threads: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            decision_tree: DecisionTreeParams::default(),
            naive_bayes: NaiveBayesParams::default(),
            random_forest: RandomForestParams::default(),
            gradient_boosting: GradientBoostingParams::default(),
            svm: SvmParams::default(),
            logistic_regression: LogisticRegressionParams::default(),
            threads: None,
        }
    }
}

impl TrainingConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Unfitted roster members, in training order.
    pub fn roster(&self) -> Vec<(&'static str, Model)> {
        vec![
            (
                ROSTER[0],
                Model::DecisionTree(DecisionTreeClassifier::new(self.decision_tree.clone())),
            ),
            (
                ROSTER[1],
                Model::NaiveBayes(MultinomialNaiveBayes::new(self.naive_bayes.clone())),
            ),
            (
                ROSTER[2],
                Model::RandomForest(RandomForestClassifier::new(self.random_forest.clone())),
            ),
            (
                ROSTER[3],
                Model::GradientBoosting(GradientBoostingClassifier::new(
                    self.gradient_boosting.clone(),
                )),
            ),
            (ROSTER[4], Model::Svm(SvmClassifier::new(self.svm.clone()))),
            (
                ROSTER[5],
                Model::LogisticRegression(LogisticRegressionClassifier::new(
                    self.logistic_regression.clone(),
                )),
            ),
        ]
    }
}

/// Fits the roster on a dedicated rayon pool.
pub struct Trainer {
    config: TrainingConfig,
    pool: ThreadPool,
}

impl Trainer {
    /// Create a trainer and its thread pool.
    pub fn new(config: TrainingConfig) -> Result<Self> {
        let threads = config.threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("medisight-train-{i}"))
            .build()
            .map_err(|e| MedisightError::internal(format!("Failed to create thread pool: {e}")))?;
        Ok(Self { config, pool })
    }

    /// The configuration this trainer uses.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train every variant on `dataset` and return the resulting bundle.
    pub fn train(&self, dataset: &Dataset) -> Result<ModelBundle> {
        self.pool.install(|| self.train_on_pool(dataset))
    }

    fn train_on_pool(&self, dataset: &Dataset) -> Result<ModelBundle> {
        if dataset.len() < 2 {
            return Err(MedisightError::invalid_input(format!(
                "training needs at least two samples, got {}",
                dataset.len()
            )));
        }
        let EncodedTargets { classes, targets } = dataset.encode_targets();
        if classes.len() < 2 {
            return Err(MedisightError::invalid_input(
                "training needs at least two distinct labels",
            ));
        }

        log::info!(
            "Training on {} samples, {} features, {} labels",
            dataset.len(),
            dataset.schema().len(),
            classes.len()
        );

        let scaler = StandardScaler::fit(dataset.rows())?;
        let scaled_rows = scaler.transform_all(dataset.rows())?;
        let raw = TrainingSet {
            rows: dataset.rows(),
            targets: &targets,
            classes: &classes,
        };
        let scaled = TrainingSet {
            rows: &scaled_rows,
            targets: &targets,
            classes: &classes,
        };

        let mut variants = Vec::with_capacity(ROSTER.len() + 1);
        for (key, mut model) in self.config.roster() {
            let started = Instant::now();
            let clf = model.as_classifier_mut();
            let data = match clf.input_representation() {
                InputRepresentation::Raw => &raw,
                InputRepresentation::Scaled => &scaled,
            };
            clf.fit(data)
                .map_err(|e| MedisightError::training(format!("{key} failed to fit: {e}")))?;
            check_labels(key, clf.classes(), &classes)?;

            let acc = accuracy(clf, data.rows, &targets)?;
            log::info!(
                "{key}: accuracy {acc:.4} ({} input, {:.2?})",
                clf.input_representation(),
                started.elapsed()
            );
            variants.push(TrainedVariant::new(key, acc, model));
        }

        let ensemble = build_ensemble(&variants)?;
        let acc = accuracy(&ensemble, raw.rows, &targets)?;
        log::info!("{ENSEMBLE_KEY}: accuracy {acc:.4}");
        variants.push(TrainedVariant::new(
            ENSEMBLE_KEY,
            acc,
            Model::SoftVoting(ensemble),
        ));

        let best = select_best(&variants)?;
        log::info!("Best model: {} (accuracy {:.4})", best.key, best.accuracy);

        Ok(ModelBundle::new(
            dataset.schema().clone(),
            classes,
            variants,
            scaler,
            best,
            dataset.len(),
            self.config.clone(),
        ))
    }
}

fn check_labels(key: &str, reported: &[String], expected: &[String]) -> Result<()> {
    if reported != expected {
        return Err(MedisightError::training(format!(
            "{key} reports labels {reported:?}, expected {expected:?}"
        )));
    }
    Ok(())
}

/// Soft-voting ensemble over clones of the fitted tree variants.
fn build_ensemble(variants: &[TrainedVariant]) -> Result<SoftVotingClassifier> {
    let members = ENSEMBLE_MEMBERS
        .iter()
        .map(|key| {
            variants
                .iter()
                .find(|v| v.key == *key)
                .map(|v| v.model.clone())
                .ok_or_else(|| MedisightError::internal(format!("ensemble member {key} missing")))
        })
        .collect::<Result<Vec<_>>>()?;
    SoftVotingClassifier::from_fitted(members)
}

/// Highest accuracy wins; on ties the earliest variant is kept.
pub fn select_best(variants: &[TrainedVariant]) -> Result<BestModel> {
    let mut best: Option<&TrainedVariant> = None;
    for variant in variants {
        if best.is_none_or(|b| variant.accuracy > b.accuracy) {
            best = Some(variant);
        }
    }
    best.map(|v| BestModel {
        key: v.key.clone(),
        accuracy: v.accuracy,
    })
    .ok_or_else(|| MedisightError::untrained("no variants to choose from"))
}
