//! Standardization of feature vectors.

use serde::{Deserialize, Serialize};

use crate::error::{MedisightError, Result};

/// Removes the per-feature mean and divides by the per-feature standard
/// deviation observed at fit time.
///
/// Columns with zero variance keep a scale of `1.0`, so constant features
/// map to `0.0` instead of dividing by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on a row-major matrix. All rows must share one length.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| MedisightError::training("cannot fit scaler on zero rows"))?;
        let n_features = first.len();
        let n = rows.len() as f64;

        let mut mean = vec![0.0; n_features];
        for row in rows {
            if row.len() != n_features {
                return Err(MedisightError::training(format!(
                    "scaler expected {n_features} features, got a row with {}",
                    row.len()
                )));
            }
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance = vec![0.0; n_features];
        for row in rows {
            for ((var, v), m) in variance.iter_mut().zip(row).zip(&mean) {
                *var += (v - m) * (v - m);
            }
        }
        let scale = variance
            .into_iter()
            .map(|var| {
                let std = (var / n).sqrt();
                if std > f64::EPSILON { std } else { 1.0 }
            })
            .collect();

        Ok(StandardScaler { mean, scale })
    }

    /// Number of features the scaler was fitted on.
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Standardize one vector.
    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.mean.len() {
            return Err(MedisightError::schema_mismatch(self.mean.len(), row.len()));
        }
        row.iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .enumerate()
            .map(|(i, ((v, m), s))| {
                let scaled = (v - m) / s;
                if scaled.is_finite() {
                    Ok(scaled)
                } else {
                    Err(MedisightError::invalid_input(format!(
                        "feature {i} value {v} is out of range after scaling"
                    )))
                }
            })
            .collect()
    }

    /// Standardize a matrix.
    pub fn transform_all(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|row| self.transform(row)).collect()
    }
}
