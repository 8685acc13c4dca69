//! Gradient boosting with multinomial deviance.
//!
//! Each boosting stage fits one regression tree per class on the residuals
//! `y_k - p_k`, then moves the raw scores by `learning_rate` times the tree
//! output. Leaf values take a single Newton step,
//! `(K - 1) / K * sum(r) / sum(|r| * (1 - |r|))`. Raw scores start at the
//! log of the class priors and are turned into probabilities with softmax.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::classifier::{
    Classifier, InputRepresentation, TrainingSet, check_input, softmax_in_place,
};
use crate::error::{MedisightError, Result};

/// Gradient boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingParams {
    /// Number of boosting stages.
    pub n_estimators: usize,
    /// Shrinkage applied to every tree.
    pub learning_rate: f64,
    /// Maximum depth of each regression tree.
    pub max_depth: usize,
    /// Minimum samples a node needs to be split.
    pub min_samples_split: usize,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 6,
            min_samples_split: 2,
        }
    }
}

/// Gradient boosted trees for multiclass classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    params: GradientBoostingParams,
    classes: Vec<String>,
    n_features: usize,
    /// Initial raw score per class.
    init_scores: Vec<f64>,
    /// `stages[m][k]` is the tree for class `k` at stage `m`.
    stages: Vec<Vec<RegressionTree>>,
}

impl GradientBoostingClassifier {
    /// Create an unfitted model.
    pub fn new(params: GradientBoostingParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            n_features: 0,
            init_scores: Vec::new(),
            stages: Vec::new(),
        }
    }

    /// Number of fitted stages.
    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }

    fn raw_scores(&self, x: &[f64]) -> Vec<f64> {
        let mut scores = self.init_scores.clone();
        for stage in &self.stages {
            for (score, tree) in scores.iter_mut().zip(stage) {
                *score += self.params.learning_rate * tree.predict(x);
            }
        }
        scores
    }
}

impl Default for GradientBoostingClassifier {
    fn default() -> Self {
        Self::new(GradientBoostingParams::default())
    }
}

impl Classifier for GradientBoostingClassifier {
    fn name(&self) -> &str {
        "gradient_boosting"
    }

    fn input_representation(&self) -> InputRepresentation {
        InputRepresentation::Raw
    }

    fn fit(&mut self, data: &TrainingSet<'_>) -> Result<()> {
        data.validate()?;
        if self.params.n_estimators == 0 || self.params.learning_rate <= 0.0 {
            return Err(MedisightError::training(
                "gradient boosting needs at least one stage and a positive learning rate",
            ));
        }

        let n = data.rows.len();
        let k = data.n_classes();
        let mut prior = vec![0.0; k];
        for &t in data.targets {
            prior[t] += 1.0;
        }
        let init_scores: Vec<f64> = prior
            .iter()
            .map(|&c| (c / n as f64).max(f64::EPSILON).ln())
            .collect();

        let mut scores: Vec<Vec<f64>> = vec![init_scores.clone(); n];
        let mut stages = Vec::with_capacity(self.params.n_estimators);
        let newton_factor = if k > 1 { (k - 1) as f64 / k as f64 } else { 1.0 };
        let tree_params = RegressionTreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split.max(2),
        };

        for stage in 0..self.params.n_estimators {
            let probs: Vec<Vec<f64>> = scores
                .iter()
                .map(|s| {
                    let mut p = s.clone();
                    softmax_in_place(&mut p);
                    p
                })
                .collect();

            let trees: Vec<RegressionTree> = (0..k)
                .into_par_iter()
                .map(|class| {
                    let residuals: Vec<f64> = probs
                        .iter()
                        .zip(data.targets)
                        .map(|(p, &t)| (if t == class { 1.0 } else { 0.0 }) - p[class])
                        .collect();
                    RegressionTree::fit(data.rows, &residuals, &tree_params, |indices| {
                        newton_step(&residuals, indices, newton_factor)
                    })
                })
                .collect();

            for (row, score) in data.rows.iter().zip(scores.iter_mut()) {
                for (s, tree) in score.iter_mut().zip(&trees) {
                    *s += self.params.learning_rate * tree.predict(row);
                }
            }
            stages.push(trees);

            if stage % 25 == 24 {
                log::debug!("Gradient boosting stage {}/{}", stage + 1, self.params.n_estimators);
            }
        }

        self.classes = data.classes.to_vec();
        self.n_features = data.n_features();
        self.init_scores = init_scores;
        self.stages = stages;
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.stages.is_empty()
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_input(self.name(), self.is_fitted(), self.n_features, x)?;
        let mut scores = self.raw_scores(x);
        softmax_in_place(&mut scores);
        Ok(scores)
    }
}

fn newton_step(residuals: &[f64], indices: &[usize], factor: f64) -> f64 {
    let (numerator, denominator) = indices.iter().fold((0.0, 0.0), |(num, den), &i| {
        let r = residuals[i];
        (num + r, den + r.abs() * (1.0 - r.abs()))
    });
    if denominator.abs() < 1e-150 {
        0.0
    } else {
        factor * numerator / denominator
    }
}

struct RegressionTreeParams {
    max_depth: usize,
    min_samples_split: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum RegressionNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<RegressionNode>,
        right: Box<RegressionNode>,
    },
}

/// Regression tree fitted to residuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegressionTree {
    root: RegressionNode,
}

impl RegressionTree {
    /// Grow a tree on `gradients`; leaf values come from `leaf_value`.
    fn fit<F>(
        rows: &[Vec<f64>],
        gradients: &[f64],
        params: &RegressionTreeParams,
        leaf_value: F,
    ) -> Self
    where
        F: Fn(&[usize]) -> f64,
    {
        let indices: Vec<usize> = (0..rows.len()).collect();
        let root = Self::build_tree(rows, gradients, indices, 0, params, &leaf_value);
        Self { root }
    }

    fn predict(&self, x: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                RegressionNode::Leaf { value } => return *value,
                RegressionNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn build_tree<F>(
        rows: &[Vec<f64>],
        gradients: &[f64],
        indices: Vec<usize>,
        depth: usize,
        params: &RegressionTreeParams,
        leaf_value: &F,
    ) -> RegressionNode
    where
        F: Fn(&[usize]) -> f64,
    {
        if depth >= params.max_depth || indices.len() < params.min_samples_split {
            return RegressionNode::Leaf {
                value: leaf_value(&indices),
            };
        }

        match Self::find_best_split(rows, gradients, &indices) {
            Some((feature, threshold)) => {
                let (left, right): (Vec<usize>, Vec<usize>) = indices
                    .into_iter()
                    .partition(|&i| rows[i][feature] <= threshold);
                RegressionNode::Split {
                    feature,
                    threshold,
                    left: Box::new(Self::build_tree(
                        rows, gradients, left, depth + 1, params, leaf_value,
                    )),
                    right: Box::new(Self::build_tree(
                        rows, gradients, right, depth + 1, params, leaf_value,
                    )),
                }
            }
            None => RegressionNode::Leaf {
                value: leaf_value(&indices),
            },
        }
    }

    /// Best variance-reducing split, scored as
    /// `left_sum² / n_left + right_sum² / n_right`.
    ///
    /// Returns `None` when no split improves on the parent.
    fn find_best_split(
        rows: &[Vec<f64>],
        gradients: &[f64],
        indices: &[usize],
    ) -> Option<(usize, f64)> {
        let n = indices.len();
        let total: f64 = indices.iter().map(|&i| gradients[i]).sum();
        let parent_gain = total * total / n as f64;
        let n_features = rows.first().map_or(0, Vec::len);

        let mut best_gain = parent_gain + 1e-12;
        let mut best = None;
        let mut order = indices.to_vec();

        for feature in 0..n_features {
            order.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]));

            let mut left_sum = 0.0;
            for pos in 0..n - 1 {
                left_sum += gradients[order[pos]];
                let value = rows[order[pos]][feature];
                let next = rows[order[pos + 1]][feature];
                if value == next {
                    continue;
                }

                let n_left = (pos + 1) as f64;
                let n_right = (n - pos - 1) as f64;
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / n_left + right_sum * right_sum / n_right;

                if gain > best_gain {
                    best_gain = gain;
                    best = Some((feature, value + (next - value) / 2.0));
                }
            }
        }

        best
    }
}
