//! Random forest: bagged CART trees with per-node feature subsampling.
//!
//! Every tree gets its own seed drawn up front from the forest seed, so the
//! fitted forest is identical no matter how rayon schedules the trees.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::classifier::decision_tree::{DecisionTreeClassifier, DecisionTreeParams, MaxFeatures};
use crate::classifier::{Classifier, InputRepresentation, TrainingSet, check_input};
use crate::error::{MedisightError, Result};

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Maximum depth of each tree.
    pub max_depth: Option<usize>,
    /// Minimum samples a node needs to be split.
    pub min_samples_split: usize,
    /// Minimum samples each child must keep.
    pub min_samples_leaf: usize,
    /// Features considered per split.
    pub max_features: MaxFeatures,
    /// Draw a bootstrap sample per tree.
    pub bootstrap: bool,
    /// Forest seed.
    pub seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: Some(15),
            min_samples_split: 5,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            seed: 42,
        }
    }
}

/// Random forest classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    params: RandomForestParams,
    classes: Vec<String>,
    n_features: usize,
    trees: Vec<DecisionTreeClassifier>,
}

impl RandomForestClassifier {
    /// Create an unfitted forest.
    pub fn new(params: RandomForestParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            n_features: 0,
            trees: Vec::new(),
        }
    }

    /// Number of fitted trees.
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn tree_params(&self, seed: u64) -> DecisionTreeParams {
        DecisionTreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self.params.max_features,
            seed,
        }
    }
}

impl Default for RandomForestClassifier {
    fn default() -> Self {
        Self::new(RandomForestParams::default())
    }
}

impl Classifier for RandomForestClassifier {
    fn name(&self) -> &str {
        "random_forest"
    }

    fn input_representation(&self) -> InputRepresentation {
        InputRepresentation::Raw
    }

    fn fit(&mut self, data: &TrainingSet<'_>) -> Result<()> {
        data.validate()?;
        if self.params.n_estimators == 0 {
            return Err(MedisightError::training("random forest needs at least one tree"));
        }

        let n = data.rows.len();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let seeds: Vec<u64> = (0..self.params.n_estimators).map(|_| rng.random()).collect();
        let bootstrap = self.params.bootstrap;

        let trees = seeds
            .par_iter()
            .map(|&seed| {
                let indices: Vec<usize> = if bootstrap {
                    let mut sample_rng = StdRng::seed_from_u64(seed);
                    (0..n).map(|_| sample_rng.random_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                let mut tree = DecisionTreeClassifier::new(self.tree_params(seed));
                tree.fit_indices(data, &indices)?;
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!("Random forest fitted {} trees", trees.len());
        self.trees = trees;
        self.classes = data.classes.to_vec();
        self.n_features = data.n_features();
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_input(self.name(), self.is_fitted(), self.n_features, x)?;

        let mut probs = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let leaf = tree
                .leaf_distribution(x)
                .ok_or_else(|| MedisightError::untrained("forest contains an empty tree"))?;
            for (p, v) in probs.iter_mut().zip(leaf) {
                *p += v;
            }
        }
        let n_trees = self.trees.len() as f64;
        probs.iter_mut().for_each(|p| *p /= n_trees);
        Ok(probs)
    }
}
