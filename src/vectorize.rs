//! Turning observed features into dense vectors aligned to a
//! [`FeatureSchema`].
//!
//! Two input shapes are supported:
//!
//! - symptom lists, where each recognized identifier sets its position to `1.0`;
//! - named measurements, where each schema identifier takes the supplied
//!   value or `0.0` when absent.
//!
//! Both always produce a vector of exactly `schema.len()` values. Identifiers
//! that are not part of the schema never reach the vector; they are returned
//! in [`Vectorized::unrecognized`] so callers can surface them.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{MedisightError, Result};
use crate::schema::FeatureSchema;

/// Observed features for one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureInput {
    /// Symptom-style input: identifiers that are present.
    Symptoms(Vec<String>),
    /// Clinical-measurement input: identifier to numeric value.
    Measurements(BTreeMap<String, f64>),
}

impl FeatureInput {
    /// Symptom input from anything string-like.
    pub fn symptoms<I, S>(symptoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FeatureInput::Symptoms(symptoms.into_iter().map(Into::into).collect())
    }
}

/// A dense feature vector plus the identifiers it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vectorized {
    /// Dense vector of length F.
    pub vector: Vec<f64>,
    /// Observed identifiers found in the schema, in input order.
    pub recognized: Vec<String>,
    /// Observed identifiers not found in the schema, in input order.
    pub unrecognized: Vec<String>,
}

/// Vectorize any [`FeatureInput`] against a schema.
pub fn vectorize(input: &FeatureInput, schema: &FeatureSchema) -> Result<Vectorized> {
    match input {
        FeatureInput::Symptoms(symptoms) => Ok(vectorize_symptoms(symptoms, schema)),
        FeatureInput::Measurements(values) => vectorize_measurements(values, schema),
    }
}

/// One-hot encode a symptom list.
///
/// Repeated identifiers are reported once. This cannot fail: unknown
/// identifiers are dropped from the vector and listed as unrecognized.
pub fn vectorize_symptoms<S: AsRef<str>>(symptoms: &[S], schema: &FeatureSchema) -> Vectorized {
    let mut vector = vec![0.0; schema.len()];
    let mut recognized = Vec::new();
    let mut unrecognized = Vec::new();
    let mut seen = HashSet::new();

    for symptom in symptoms {
        let symptom = symptom.as_ref();
        if !seen.insert(symptom) {
            continue;
        }
        match schema.position(symptom) {
            Some(position) => {
                vector[position] = 1.0;
                recognized.push(symptom.to_string());
            }
            None => unrecognized.push(symptom.to_string()),
        }
    }

    if !unrecognized.is_empty() {
        log::warn!("Dropped {} unrecognized symptom(s): {:?}", unrecognized.len(), unrecognized);
    }

    Vectorized {
        vector,
        recognized,
        unrecognized,
    }
}

/// Lay out named measurements in schema order, defaulting missing fields to 0.
pub fn vectorize_measurements(
    values: &BTreeMap<String, f64>,
    schema: &FeatureSchema,
) -> Result<Vectorized> {
    let mut vector = Vec::with_capacity(schema.len());
    let mut recognized = Vec::new();

    for (_, name) in schema.iter() {
        match values.get(name) {
            Some(&value) => {
                if !value.is_finite() {
                    return Err(MedisightError::invalid_input(format!(
                        "field '{name}' has a non-finite value"
                    )));
                }
                vector.push(value);
                recognized.push(name.to_string());
            }
            None => vector.push(0.0),
        }
    }

    let unrecognized = values
        .keys()
        .filter(|name| !schema.contains(name))
        .cloned()
        .collect();

    Ok(Vectorized {
        vector,
        recognized,
        unrecognized,
    })
}
