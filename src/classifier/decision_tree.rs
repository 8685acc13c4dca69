//! CART decision tree classifier.
//!
//! Splits greedily on the threshold that minimizes weighted gini impurity.
//! Leaves keep the class distribution of the training samples that reached
//! them, which gives `predict_proba` for free. The same builder is reused
//! by the random forest with bootstrap samples and per-node feature
//! subsampling.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, InputRepresentation, TrainingSet, check_input};
use crate::error::{MedisightError, Result};

/// How many features are considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// Every feature.
    All,
    /// `ceil(sqrt(n_features))` features drawn at random per node.
    Sqrt,
}

impl MaxFeatures {
    fn count(self, n_features: usize) -> usize {
        match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => ((n_features as f64).sqrt().ceil() as usize).clamp(1, n_features),
        }
    }
}

/// Decision tree hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeParams {
    /// Maximum depth; `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    /// Minimum samples a node needs to be split.
    pub min_samples_split: usize,
    /// Minimum samples each child must keep.
    pub min_samples_leaf: usize,
    /// Features considered per split.
    pub max_features: MaxFeatures,
    /// Seed for feature subsampling.
    pub seed: u64,
}

impl Default for DecisionTreeParams {
    fn default() -> Self {
        Self {
            max_depth: Some(20),
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: MaxFeatures::All,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// A fitted (or unfitted) CART classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeClassifier {
    params: DecisionTreeParams,
    classes: Vec<String>,
    n_features: usize,
    root: Option<TreeNode>,
}

impl DecisionTreeClassifier {
    /// Create an unfitted tree.
    pub fn new(params: DecisionTreeParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            n_features: 0,
            root: None,
        }
    }

    /// Hyperparameters.
    pub fn params(&self) -> &DecisionTreeParams {
        &self.params
    }

    /// Fit on a subset of rows. Indices may repeat (bootstrap samples).
    pub(crate) fn fit_indices(&mut self, data: &TrainingSet<'_>, indices: &[usize]) -> Result<()> {
        if indices.is_empty() {
            return Err(MedisightError::training("decision tree needs at least one sample"));
        }
        let mut builder = TreeBuilder {
            data,
            params: &self.params,
            rng: StdRng::seed_from_u64(self.params.seed),
            n_classes: data.n_classes(),
            n_features: data.n_features(),
        };
        let root = builder.build(indices.to_vec(), 0);

        self.classes = data.classes.to_vec();
        self.n_features = data.n_features();
        self.root = Some(root);
        Ok(())
    }

    /// Depth of the fitted tree (a single leaf has depth 0).
    pub fn depth(&self) -> usize {
        fn depth(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + depth(left).max(depth(right)),
            }
        }
        self.root.as_ref().map_or(0, depth)
    }

    /// Leaf distribution for `x`, without validation.
    pub(crate) fn leaf_distribution(&self, x: &[f64]) -> Option<&[f64]> {
        let mut node = self.root.as_ref()?;
        loop {
            match node {
                TreeNode::Leaf { distribution } => return Some(distribution),
                TreeNode::Split {
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
}

impl Default for DecisionTreeClassifier {
    fn default() -> Self {
        Self::new(DecisionTreeParams::default())
    }
}

impl Classifier for DecisionTreeClassifier {
    fn name(&self) -> &str {
        "decision_tree"
    }

    fn input_representation(&self) -> InputRepresentation {
        InputRepresentation::Raw
    }

    fn fit(&mut self, data: &TrainingSet<'_>) -> Result<()> {
        data.validate()?;
        let indices: Vec<usize> = (0..data.rows.len()).collect();
        self.fit_indices(data, &indices)
    }

    fn is_fitted(&self) -> bool {
        self.root.is_some()
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_input(self.name(), self.is_fitted(), self.n_features, x)?;
        self.leaf_distribution(x)
            .map(<[f64]>::to_vec)
            .ok_or_else(|| MedisightError::untrained("decision tree has no root"))
    }
}

/// Candidate split found for a node.
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    weighted_impurity: f64,
}

struct TreeBuilder<'a, 'd> {
    data: &'a TrainingSet<'d>,
    params: &'a DecisionTreeParams,
    rng: StdRng,
    n_classes: usize,
    n_features: usize,
}

impl TreeBuilder<'_, '_> {
    /// Recursively build the tree.
    ///
    /// Stops when the node is pure, the depth limit is reached, too few
    /// samples remain, or no threshold respects `min_samples_leaf`.
    fn build(&mut self, indices: Vec<usize>, depth: usize) -> TreeNode {
        let counts = self.class_counts(&indices);
        let is_pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);

        if is_pure || depth_reached || indices.len() < self.params.min_samples_split.max(2) {
            return Self::leaf(&counts, indices.len());
        }

        let Some(split) = self.find_best_split(&indices, &counts) else {
            return Self::leaf(&counts, indices.len());
        };

        let rows = self.data.rows;
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| rows[i][split.feature] <= split.threshold);

        log::trace!(
            "depth {depth}: split feature {} at {:.4} ({} / {}), impurity {:.4}",
            split.feature,
            split.threshold,
            left.len(),
            right.len(),
            split.weighted_impurity
        );

        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.build(left, depth + 1)),
            right: Box::new(self.build(right, depth + 1)),
        }
    }

    fn leaf(counts: &[usize], n: usize) -> TreeNode {
        let n = n.max(1) as f64;
        TreeNode::Leaf {
            distribution: counts.iter().map(|&c| c as f64 / n).collect(),
        }
    }

    fn class_counts(&self, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes];
        for &i in indices {
            counts[self.data.targets[i]] += 1;
        }
        counts
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let k = self.params.max_features.count(self.n_features);
        if k >= self.n_features {
            (0..self.n_features).collect()
        } else {
            rand::seq::index::sample(&mut self.rng, self.n_features, k).into_vec()
        }
    }

    /// Find the threshold with the lowest weighted gini impurity.
    ///
    /// Thresholds sit halfway between consecutive distinct values; the first
    /// candidate wins ties so the result is deterministic.
    fn find_best_split(&mut self, indices: &[usize], parent: &[usize]) -> Option<SplitCandidate> {
        let rows = self.data.rows;
        let targets = self.data.targets;
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<SplitCandidate> = None;
        let mut order = indices.to_vec();

        for feature in self.candidate_features() {
            order.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]));

            let mut left = vec![0usize; self.n_classes];
            let mut right = parent.to_vec();

            for pos in 0..n - 1 {
                let class = targets[order[pos]];
                left[class] += 1;
                right[class] -= 1;

                let value = rows[order[pos]][feature];
                let next = rows[order[pos + 1]][feature];
                if value == next {
                    continue;
                }

                let n_left = pos + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let weighted = n_left as f64 * gini(&left, n_left)
                    + n_right as f64 * gini(&right, n_right);
                if best
                    .as_ref()
                    .is_none_or(|b| weighted < b.weighted_impurity - 1e-12)
                {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: value + (next - value) / 2.0,
                        weighted_impurity: weighted,
                    });
                }
            }
        }

        best
    }
}

fn gini(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::accuracy;
    use crate::classifier::test_support::{assert_distribution, three_class_data};

    fn fitted(params: DecisionTreeParams) -> DecisionTreeClassifier {
        let (rows, targets, classes) = three_class_data();
        let mut tree = DecisionTreeClassifier::new(params);
        tree.fit(&TrainingSet {
            rows: &rows,
            targets: &targets,
            classes: &classes,
        })
        .unwrap();
        tree
    }

    #[test]
    fn test_fits_separable_data() {
        let params = DecisionTreeParams {
            min_samples_split: 2,
            min_samples_leaf: 1,
            ..Default::default()
        };
        let tree = fitted(params);
        let (rows, targets, _) = three_class_data();
        assert_eq!(accuracy(&tree, &rows, &targets).unwrap(), 1.0);
        assert_eq!(tree.predict(&[1.0, 1.0, 0.0, 0.0]).unwrap(), 0);
    }

    #[test]
    fn test_probabilities_are_distributions() {
        let tree = fitted(DecisionTreeParams::default());
        for x in [[0.0; 4], [1.0; 4], [0.0, 0.0, 1.0, 0.0]] {
            assert_distribution(&tree.predict_proba(&x).unwrap(), 3);
        }
    }

    #[test]
    fn test_depth_limit_respected() {
        let tree = fitted(DecisionTreeParams {
            max_depth: Some(1),
            min_samples_split: 2,
            min_samples_leaf: 1,
            ..Default::default()
        });
        assert!(tree.depth() <= 1);
    }

    #[test]
    fn test_min_samples_split_keeps_small_node_as_leaf() {
        let tree = fitted(DecisionTreeParams {
            min_samples_split: 100,
            ..Default::default()
        });
        assert_eq!(tree.depth(), 0);
        let probs = tree.predict_proba(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(probs.iter().all(|p| (p - 1.0 / 3.0).abs() < 1e-9));
    }

    #[test]
    fn test_unfitted_and_wrong_length() {
        let tree = DecisionTreeClassifier::default();
        assert_eq!(tree.predict_proba(&[0.0]).unwrap_err().kind(), "untrained_model");

        let tree = fitted(DecisionTreeParams::default());
        assert_eq!(tree.predict_proba(&[0.0]).unwrap_err().kind(), "schema_mismatch");
    }

    #[test]
    fn test_same_seed_same_tree() {
        let params = DecisionTreeParams {
            max_features: MaxFeatures::Sqrt,
            ..Default::default()
        };
        let a = fitted(params.clone());
        let b = fitted(params);
        for x in [[1.0, 0.0, 1.0, 0.0], [0.0, 1.0, 0.0, 1.0]] {
            assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
        }
    }
}
