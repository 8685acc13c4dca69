//! Multinomial logistic regression with L2 regularization.
//!
//! Minimizes `mean(cross_entropy) + ||W||² / (2·C·n)` by gradient descent
//! with a backtracking (Armijo) line search. Intercepts are not penalized.
//! Expects standardized input.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::classifier::{
    Classifier, InputRepresentation, TrainingSet, check_input, ensure_finite, softmax_in_place,
};
use crate::error::{MedisightError, Result};

/// Rows per work unit when evaluating the objective. Partial sums are
/// combined in chunk order so the result does not depend on thread count.
const CHUNK_SIZE: usize = 256;

/// Logistic regression hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegressionParams {
    /// Inverse regularization strength.
    pub c: f64,
    /// Maximum gradient steps.
    pub max_iter: usize,
    /// Stop once the largest gradient component falls below this.
    pub tol: f64,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-4,
        }
    }
}

/// Softmax regression classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegressionClassifier {
    params: LogisticRegressionParams,
    classes: Vec<String>,
    n_features: usize,
    /// Per class: `n_features` weights followed by the intercept.
    coefficients: Vec<f64>,
    n_iter: usize,
}

impl LogisticRegressionClassifier {
    /// Create an unfitted model.
    pub fn new(params: LogisticRegressionParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            n_features: 0,
            coefficients: Vec::new(),
            n_iter: 0,
        }
    }

    /// Gradient steps taken by the last fit.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }
}

impl Default for LogisticRegressionClassifier {
    fn default() -> Self {
        Self::new(LogisticRegressionParams::default())
    }
}

fn class_scores(coefficients: &[f64], x: &[f64]) -> Vec<f64> {
    let stride = x.len() + 1;
    coefficients
        .chunks(stride)
        .map(|w| w[..x.len()].iter().zip(x).map(|(a, b)| a * b).sum::<f64>() + w[x.len()])
        .collect()
}

/// Penalized objective and its gradient.
struct Objective<'a> {
    data: &'a TrainingSet<'a>,
    n_features: usize,
    c: f64,
}

impl Objective<'_> {
    fn penalty_scale(&self) -> f64 {
        1.0 / (self.c * self.data.rows.len() as f64)
    }

    fn penalty(&self, coefficients: &[f64]) -> f64 {
        let stride = self.n_features + 1;
        let sq: f64 = coefficients
            .chunks(stride)
            .flat_map(|w| &w[..self.n_features])
            .map(|v| v * v)
            .sum();
        0.5 * sq * self.penalty_scale()
    }

    fn value(&self, coefficients: &[f64]) -> f64 {
        let partials: Vec<f64> = self
            .data
            .rows
            .par_chunks(CHUNK_SIZE)
            .zip(self.data.targets.par_chunks(CHUNK_SIZE))
            .map(|(rows, targets)| {
                rows.iter()
                    .zip(targets)
                    .map(|(row, &t)| {
                        let scores = class_scores(coefficients, row);
                        log_sum_exp(&scores) - scores[t]
                    })
                    .sum::<f64>()
            })
            .collect();
        partials.iter().sum::<f64>() / self.data.rows.len() as f64 + self.penalty(coefficients)
    }

    fn value_and_gradient(&self, coefficients: &[f64]) -> (f64, Vec<f64>) {
        let stride = self.n_features + 1;
        let partials: Vec<(f64, Vec<f64>)> = self
            .data
            .rows
            .par_chunks(CHUNK_SIZE)
            .zip(self.data.targets.par_chunks(CHUNK_SIZE))
            .map(|(rows, targets)| {
                let mut loss = 0.0;
                let mut grad = vec![0.0; coefficients.len()];
                for (row, &t) in rows.iter().zip(targets) {
                    let mut scores = class_scores(coefficients, row);
                    loss += log_sum_exp(&scores) - scores[t];
                    softmax_in_place(&mut scores);
                    for (class, p) in scores.iter().enumerate() {
                        let d = p - if class == t { 1.0 } else { 0.0 };
                        let w = &mut grad[class * stride..(class + 1) * stride];
                        for (g, v) in w[..self.n_features].iter_mut().zip(row) {
                            *g += d * v;
                        }
                        w[self.n_features] += d;
                    }
                }
                (loss, grad)
            })
            .collect();

        let n = self.data.rows.len() as f64;
        let mut loss = 0.0;
        let mut grad = vec![0.0; coefficients.len()];
        for (l, g) in partials {
            loss += l;
            grad.iter_mut().zip(g).for_each(|(a, b)| *a += b);
        }

        let scale = self.penalty_scale();
        for (i, g) in grad.iter_mut().enumerate() {
            *g /= n;
            if i % stride != self.n_features {
                *g += coefficients[i] * scale;
            }
        }
        (loss / n + self.penalty(coefficients), grad)
    }
}

fn log_sum_exp(scores: &[f64]) -> f64 {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    max + scores.iter().map(|s| (s - max).exp()).sum::<f64>().ln()
}

impl Classifier for LogisticRegressionClassifier {
    fn name(&self) -> &str {
        "logistic_regression"
    }

    fn input_representation(&self) -> InputRepresentation {
        InputRepresentation::Scaled
    }

    fn fit(&mut self, data: &TrainingSet<'_>) -> Result<()> {
        data.validate()?;
        if self.params.c <= 0.0 {
            return Err(MedisightError::training("logistic regression C must be positive"));
        }

        let n_features = data.n_features();
        let objective = Objective {
            data,
            n_features,
            c: self.params.c,
        };
        let mut coefficients = vec![0.0; data.n_classes() * (n_features + 1)];
        let (mut loss, mut grad) = objective.value_and_gradient(&coefficients);
        let mut step = 1.0_f64;
        let mut n_iter = 0;

        while n_iter < self.params.max_iter {
            let grad_max = grad.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
            if grad_max < self.params.tol {
                break;
            }
            let grad_sq: f64 = grad.iter().map(|g| g * g).sum();

            // Start from twice the last accepted step, halve until Armijo holds.
            step = (step * 2.0).min(1e3);
            let mut candidate;
            loop {
                candidate = coefficients
                    .iter()
                    .zip(&grad)
                    .map(|(w, g)| w - step * g)
                    .collect::<Vec<_>>();
                if objective.value(&candidate) <= loss - 1e-4 * step * grad_sq || step < 1e-12 {
                    break;
                }
                step /= 2.0;
            }
            if step < 1e-12 {
                break;
            }

            coefficients = candidate;
            (loss, grad) = objective.value_and_gradient(&coefficients);
            n_iter += 1;
        }

        if n_iter == self.params.max_iter {
            log::warn!(
                "Logistic regression stopped at max_iter={} (loss {:.6})",
                self.params.max_iter,
                loss
            );
        } else {
            log::debug!("Logistic regression converged after {} steps (loss {:.6})", n_iter, loss);
        }

        self.classes = data.classes.to_vec();
        self.n_features = n_features;
        self.coefficients = coefficients;
        self.n_iter = n_iter;
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.coefficients.is_empty()
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_input(self.name(), self.is_fitted(), self.n_features, x)?;
        let mut scores = class_scores(&self.coefficients, x);
        softmax_in_place(&mut scores);
        ensure_finite(self.name(), scores)
    }
}
