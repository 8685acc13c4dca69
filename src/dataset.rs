//! Labeled training data.
//!
//! A [`Dataset`] is a dense matrix aligned to a [`FeatureSchema`] plus one
//! label per row. Datasets usually come from a "pivoted" CSV file: one
//! numeric column per feature and one label column:
//!
//! ```csv
//! ,fever,cough,headache,Source
//! 0,1,1,0,flu
//! 1,0,0,1,migraine
//! ```
//!
//! A leading unnamed index column (as written by dataframe tools) is dropped.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{MedisightError, Result};
use crate::schema::FeatureSchema;

/// Default name of the label column in pivoted datasets.
pub const DEFAULT_LABEL_COLUMN: &str = "Source";

/// Header names treated as a leftover row-index column.
const INDEX_COLUMNS: &[&str] = &["", "Unnamed: 0"];

/// Labeled samples aligned to a feature schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: FeatureSchema,
    rows: Vec<Vec<f64>>,
    labels: Vec<String>,
}

/// Targets encoded as indices into a sorted label list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedTargets {
    /// Sorted distinct labels.
    pub classes: Vec<String>,
    /// Class index of each row.
    pub targets: Vec<usize>,
}

impl Dataset {
    /// Create a dataset, checking that every row has `schema.len()` values.
    pub fn new(schema: FeatureSchema, rows: Vec<Vec<f64>>, labels: Vec<String>) -> Result<Self> {
        if schema.is_empty() {
            return Err(MedisightError::invalid_input("dataset has no feature columns"));
        }
        if rows.len() != labels.len() {
            return Err(MedisightError::invalid_input(format!(
                "{} rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != schema.len() {
                return Err(MedisightError::invalid_input(format!(
                    "row {i} has {} values, schema has {} features",
                    row.len(),
                    schema.len()
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(MedisightError::invalid_input(format!(
                    "row {i} contains a non-finite value"
                )));
            }
        }
        if labels.iter().any(|l| l.is_empty()) {
            return Err(MedisightError::invalid_input("empty label"));
        }

        Ok(Dataset {
            schema,
            rows,
            labels,
        })
    }

    /// Load a pivoted CSV file.
    pub fn from_csv_path<P: AsRef<Path>>(path: P, label_column: &str) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading dataset from {}", path.display());
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file, label_column)
    }

    /// Load pivoted CSV data from any reader.
    pub fn from_csv_reader<R: Read>(reader: R, label_column: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = reader.headers()?.clone();

        let label_index = headers
            .iter()
            .position(|h| h == label_column)
            .ok_or_else(|| {
                MedisightError::invalid_input(format!("label column '{label_column}' not found"))
            })?;

        let feature_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != label_index && !(*i == 0 && INDEX_COLUMNS.contains(h)))
            .map(|(i, h)| (i, h.to_string()))
            .collect();
        let schema = FeatureSchema::new(feature_columns.iter().map(|(_, h)| h.clone()))?;

        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let mut row = Vec::with_capacity(feature_columns.len());
            for (column, name) in &feature_columns {
                let raw = record.get(*column).unwrap_or("");
                if raw.is_empty() {
                    return Err(MedisightError::invalid_input(format!(
                        "row {line}, column '{name}': missing value"
                    )));
                }
                let value = raw.parse::<f64>().map_err(|_| {
                    MedisightError::invalid_input(format!(
                        "row {line}, column '{name}': '{raw}' is not numeric"
                    ))
                })?;
                row.push(value);
            }
            let label = record.get(label_index).unwrap_or("").to_string();
            rows.push(row);
            labels.push(label);
        }

        log::info!(
            "Loaded {} samples with {} features",
            rows.len(),
            schema.len()
        );
        Dataset::new(schema, rows, labels)
    }

    /// The feature schema.
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Feature rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Row labels.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no samples.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Encode labels as indices into the sorted set of distinct labels.
    pub fn encode_targets(&self) -> EncodedTargets {
        let classes: Vec<String> = self
            .labels
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let targets = self
            .labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or_default())
            .collect();
        EncodedTargets { classes, targets }
    }
}
