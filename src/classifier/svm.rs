//! Support vector machine with an RBF kernel.
//!
//! Multiclass problems are split one-vs-rest: one binary machine per class,
//! each trained with SMO on the shared Gram matrix. Decision values are
//! mapped to probabilities with a per-class Platt sigmoid fitted on the
//! training decision values, then normalized across classes.
//!
//! - RBF kernel: `k(x, y) = exp(-γ·||x - y||²)`
//! - Decision function: `f(x) = Σ αᵢ·yᵢ·k(x, xᵢ) + b`
//!
//! Expects standardized input.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::classifier::{
    Classifier, InputRepresentation, TrainingSet, check_input, ensure_finite,
};
use crate::error::{MedisightError, Result};

/// Kernel width selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gamma {
    /// `1 / (n_features * Var(X))`, computed at fit time.
    Scale,
    /// A fixed value.
    Value(f64),
}

/// SVM hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    /// Soft-margin penalty.
    pub c: f64,
    /// Kernel width.
    pub gamma: Gamma,
    /// KKT violation tolerance.
    pub tol: f64,
    /// Consecutive sweeps without change before SMO stops.
    pub max_passes: usize,
    /// Hard cap on SMO sweeps per binary machine.
    pub max_iter: usize,
    /// Seed for the SMO partner choice.
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            gamma: Gamma::Scale,
            tol: 1e-3,
            max_passes: 5,
            max_iter: 1000,
            seed: 42,
        }
    }
}

/// Sigmoid `P(y = 1 | f) = 1 / (1 + exp(a·f + b))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct PlattSigmoid {
    a: f64,
    b: f64,
}

impl PlattSigmoid {
    fn probability(&self, decision: f64) -> f64 {
        let f_apb = decision * self.a + self.b;
        if f_apb >= 0.0 {
            (-f_apb).exp() / (1.0 + (-f_apb).exp())
        } else {
            1.0 / (1.0 + f_apb.exp())
        }
    }
}

/// One class against the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinaryMachine {
    /// `(support vector index, αᵢ·yᵢ)` pairs.
    coefficients: Vec<(usize, f64)>,
    bias: f64,
    sigmoid: PlattSigmoid,
}

impl BinaryMachine {
    fn decision(&self, kernel_row: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .map(|&(sv, coef)| coef * kernel_row[sv])
            .sum::<f64>()
            + self.bias
    }
}

/// One-vs-rest RBF SVM classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmClassifier {
    params: SvmParams,
    classes: Vec<String>,
    n_features: usize,
    gamma: f64,
    support_vectors: Vec<Vec<f64>>,
    machines: Vec<BinaryMachine>,
}

impl SvmClassifier {
    /// Create an unfitted SVM.
    pub fn new(params: SvmParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            n_features: 0,
            gamma: 0.0,
            support_vectors: Vec::new(),
            machines: Vec::new(),
        }
    }

    /// Kernel width used at fit time.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Number of distinct support vectors across all machines.
    pub fn n_support_vectors(&self) -> usize {
        self.support_vectors.len()
    }

    fn resolve_gamma(&self, rows: &[Vec<f64>]) -> f64 {
        match self.params.gamma {
            Gamma::Value(g) => g,
            Gamma::Scale => {
                let count = rows.iter().map(Vec::len).sum::<usize>() as f64;
                let mean = rows.iter().flatten().sum::<f64>() / count;
                let var = rows.iter().flatten().map(|v| (v - mean) * (v - mean)).sum::<f64>() / count;
                let n_features = rows.first().map_or(1, Vec::len) as f64;
                if var > 0.0 { 1.0 / (n_features * var) } else { 1.0 }
            }
        }
    }
}

impl Default for SvmClassifier {
    fn default() -> Self {
        Self::new(SvmParams::default())
    }
}

fn rbf(a: &[f64], b: &[f64], gamma: f64) -> f64 {
    let sq_dist: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (-gamma * sq_dist).exp()
}

impl Classifier for SvmClassifier {
    fn name(&self) -> &str {
        "svm"
    }

    fn input_representation(&self) -> InputRepresentation {
        InputRepresentation::Scaled
    }

    fn fit(&mut self, data: &TrainingSet<'_>) -> Result<()> {
        data.validate()?;
        if self.params.c <= 0.0 {
            return Err(MedisightError::training("SVM C must be positive"));
        }
        if data.n_classes() < 2 {
            return Err(MedisightError::training("SVM needs at least two classes"));
        }

        let rows = data.rows;
        let gamma = self.resolve_gamma(rows);
        let gram: Vec<Vec<f64>> = rows
            .par_iter()
            .map(|a| rows.iter().map(|b| rbf(a, b, gamma)).collect())
            .collect();

        let solutions: Vec<SmoSolution> = (0..data.n_classes())
            .into_par_iter()
            .map(|class| {
                let labels: Vec<f64> = data
                    .targets
                    .iter()
                    .map(|&t| if t == class { 1.0 } else { -1.0 })
                    .collect();
                smo(&gram, &labels, &self.params, self.params.seed.wrapping_add(class as u64))
            })
            .collect();

        // Support vectors are shared between machines.
        let mut compact = vec![usize::MAX; rows.len()];
        let mut support_vectors = Vec::new();
        let mut machines = Vec::with_capacity(solutions.len());
        for solution in solutions {
            let mut coefficients = Vec::new();
            for (i, (&alpha, &y)) in solution.alpha.iter().zip(&solution.labels).enumerate() {
                if alpha <= 1e-8 {
                    continue;
                }
                if compact[i] == usize::MAX {
                    compact[i] = support_vectors.len();
                    support_vectors.push(rows[i].clone());
                }
                coefficients.push((compact[i], alpha * y));
            }

            let decisions: Vec<f64> = solution
                .errors
                .iter()
                .zip(&solution.labels)
                .map(|(e, y)| e + y)
                .collect();
            let positives: Vec<bool> = solution.labels.iter().map(|&y| y > 0.0).collect();
            machines.push(BinaryMachine {
                coefficients,
                bias: solution.bias,
                sigmoid: fit_platt(&decisions, &positives),
            });
        }

        log::debug!(
            "SVM fitted {} machines with {} support vectors (gamma {:.5})",
            machines.len(),
            support_vectors.len(),
            gamma
        );

        self.classes = data.classes.to_vec();
        self.n_features = data.n_features();
        self.gamma = gamma;
        self.support_vectors = support_vectors;
        self.machines = machines;
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.machines.is_empty()
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_input(self.name(), self.is_fitted(), self.n_features, x)?;

        let kernel_row: Vec<f64> = self
            .support_vectors
            .iter()
            .map(|sv| rbf(x, sv, self.gamma))
            .collect();
        let mut probs: Vec<f64> = self
            .machines
            .iter()
            .map(|m| m.sigmoid.probability(m.decision(&kernel_row)))
            .collect();

        let sum: f64 = probs.iter().sum();
        if sum > 0.0 {
            probs.iter_mut().for_each(|p| *p /= sum);
        } else {
            let uniform = 1.0 / probs.len() as f64;
            probs.iter_mut().for_each(|p| *p = uniform);
        }
        ensure_finite(self.name(), probs)
    }
}

struct SmoSolution {
    alpha: Vec<f64>,
    labels: Vec<f64>,
    bias: f64,
    /// `f(xᵢ) - yᵢ` at convergence.
    errors: Vec<f64>,
}

/// Simplified SMO with an error cache over a precomputed Gram matrix.
fn smo(gram: &[Vec<f64>], labels: &[f64], params: &SvmParams, seed: u64) -> SmoSolution {
    let n = labels.len();
    let c = params.c;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut alpha = vec![0.0; n];
    let mut bias = 0.0;
    let mut errors: Vec<f64> = labels.iter().map(|y| -y).collect();

    let mut passes = 0;
    let mut sweeps = 0;
    while passes < params.max_passes && sweeps < params.max_iter && n > 1 {
        let mut changed = 0;
        for i in 0..n {
            let (yi, ei) = (labels[i], errors[i]);
            let violates = (yi * ei < -params.tol && alpha[i] < c) || (yi * ei > params.tol && alpha[i] > 0.0);
            if !violates {
                continue;
            }

            let mut j = rng.random_range(0..n - 1);
            if j >= i {
                j += 1;
            }
            let (yj, ej) = (labels[j], errors[j]);
            let (ai_old, aj_old) = (alpha[i], alpha[j]);

            let (low, high) = if yi != yj {
                ((aj_old - ai_old).max(0.0), (c + aj_old - ai_old).min(c))
            } else {
                ((ai_old + aj_old - c).max(0.0), (ai_old + aj_old).min(c))
            };
            if (high - low).abs() < 1e-12 {
                continue;
            }

            let eta = 2.0 * gram[i][j] - gram[i][i] - gram[j][j];
            if eta >= 0.0 {
                continue;
            }

            let aj = (aj_old - yj * (ei - ej) / eta).clamp(low, high);
            if (aj - aj_old).abs() < 1e-5 {
                continue;
            }
            let ai = ai_old + yi * yj * (aj_old - aj);
            let (dai, daj) = (ai - ai_old, aj - aj_old);

            let b1 = bias - ei - yi * dai * gram[i][i] - yj * daj * gram[i][j];
            let b2 = bias - ej - yi * dai * gram[i][j] - yj * daj * gram[j][j];
            let new_bias = if ai > 0.0 && ai < c {
                b1
            } else if aj > 0.0 && aj < c {
                b2
            } else {
                (b1 + b2) / 2.0
            };

            let db = new_bias - bias;
            for (k, e) in errors.iter_mut().enumerate() {
                *e += yi * dai * gram[i][k] + yj * daj * gram[j][k] + db;
            }
            alpha[i] = ai;
            alpha[j] = aj;
            bias = new_bias;
            changed += 1;
        }

        sweeps += 1;
        passes = if changed == 0 { passes + 1 } else { 0 };
    }

    SmoSolution {
        alpha,
        labels: labels.to_vec(),
        bias,
        errors,
    }
}

/// Fit a Platt sigmoid with Newton's method and backtracking line search.
fn fit_platt(decisions: &[f64], positives: &[bool]) -> PlattSigmoid {
    const MAX_ITER: usize = 100;
    const MIN_STEP: f64 = 1e-10;
    const SIGMA: f64 = 1e-12;
    const EPS: f64 = 1e-5;

    let prior1 = positives.iter().filter(|&&p| p).count() as f64;
    let prior0 = positives.len() as f64 - prior1;
    let hi = (prior1 + 1.0) / (prior1 + 2.0);
    let lo = 1.0 / (prior0 + 2.0);
    let targets: Vec<f64> = positives.iter().map(|&p| if p { hi } else { lo }).collect();

    let objective = |a: f64, b: f64| -> f64 {
        decisions
            .iter()
            .zip(&targets)
            .map(|(f, t)| {
                let f_apb = f * a + b;
                if f_apb >= 0.0 {
                    t * f_apb + (1.0 + (-f_apb).exp()).ln()
                } else {
                    (t - 1.0) * f_apb + (1.0 + f_apb.exp()).ln()
                }
            })
            .sum()
    };

    let mut a = 0.0;
    let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
    let mut fval = objective(a, b);

    for _ in 0..MAX_ITER {
        let (mut h11, mut h22, mut h21, mut g1, mut g2) = (SIGMA, SIGMA, 0.0, 0.0, 0.0);
        for (f, t) in decisions.iter().zip(&targets) {
            let f_apb = f * a + b;
            let (p, q) = if f_apb >= 0.0 {
                let e = (-f_apb).exp();
                (e / (1.0 + e), 1.0 / (1.0 + e))
            } else {
                let e = f_apb.exp();
                (1.0 / (1.0 + e), e / (1.0 + e))
            };
            let d2 = p * q;
            h11 += f * f * d2;
            h22 += d2;
            h21 += f * d2;
            let d1 = t - p;
            g1 += f * d1;
            g2 += d1;
        }
        if g1.abs() < EPS && g2.abs() < EPS {
            break;
        }

        let det = h11 * h22 - h21 * h21;
        let da = -(h22 * g1 - h21 * g2) / det;
        let db = -(-h21 * g1 + h11 * g2) / det;
        let gd = g1 * da + g2 * db;

        let mut step = 1.0;
        while step >= MIN_STEP {
            let (new_a, new_b) = (a + step * da, b + step * db);
            let new_f = objective(new_a, new_b);
            if new_f < fval + 1e-4 * step * gd {
                a = new_a;
                b = new_b;
                fval = new_f;
                break;
            }
            step /= 2.0;
        }
        if step < MIN_STEP {
            break;
        }
    }

    PlattSigmoid { a, b }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::accuracy;
    use crate::classifier::test_support::{assert_distribution, three_class_data};
    use crate::scaler::StandardScaler;

    fn fitted() -> (SvmClassifier, StandardScaler) {
        let (rows, targets, classes) = three_class_data();
        let scaler = StandardScaler::fit(&rows).unwrap();
        let scaled = scaler.transform_all(&rows).unwrap();
        let mut svm = SvmClassifier::default();
        svm.fit(&TrainingSet {
            rows: &scaled,
            targets: &targets,
            classes: &classes,
        })
        .unwrap();
        (svm, scaler)
    }

    #[test]
    fn test_svm_separates_classes() {
        let (svm, scaler) = fitted();
        let (rows, targets, _) = three_class_data();
        let scaled = scaler.transform_all(&rows).unwrap();
        assert!(accuracy(&svm, &scaled, &targets).unwrap() >= 0.8);
        assert!(svm.n_support_vectors() > 0);
        assert!(svm.gamma() > 0.0);
    }

    #[test]
    fn test_svm_probabilities_normalized() {
        let (svm, scaler) = fitted();
        for x in [[1.0, 1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0], [1.0, 1.0, 1.0, 1.0]] {
            let probs = svm.predict_proba(&scaler.transform(&x).unwrap()).unwrap();
            assert_distribution(&probs, 3);
        }
    }

    #[test]
    fn test_single_class_rejected() {
        let rows = vec![vec![0.0], vec![1.0]];
        let classes = vec!["only".to_string()];
        let mut svm = SvmClassifier::default();
        let err = svm
            .fit(&TrainingSet {
                rows: &rows,
                targets: &[0, 0],
                classes: &classes,
            })
            .unwrap_err();
        assert_eq!(err.kind(), "training");
    }

    #[test]
    fn test_platt_orders_decisions() {
        let decisions = [-2.0, -1.5, -1.0, 1.0, 1.5, 2.0];
        let positives = [false, false, false, true, true, true];
        let sigmoid = fit_platt(&decisions, &positives);
        assert!(sigmoid.probability(2.0) > 0.5);
        assert!(sigmoid.probability(-2.0) < 0.5);
        assert!(sigmoid.probability(1.0) > sigmoid.probability(-1.0));
    }
}
