//! Feature schema: the ordered list of feature identifiers shared by
//! training and serving.
//!
//! Position `i` of every feature vector holds the value of
//! `schema.names()[i]`. The schema is fixed when a bundle is trained and is
//! persisted with it, so a serving process can rebuild exactly the vectors
//! the classifiers were fitted on.

use std::fmt;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{MedisightError, Result};

/// Ordered, duplicate-free list of feature identifiers.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureSchema {
    /// Identifiers in vector order.
    names: Vec<String>,
    /// Identifier to position lookup.
    positions: AHashMap<String, usize>,
}

impl FeatureSchema {
    /// Build a schema from identifiers in vector order.
    ///
    /// Empty identifiers and duplicates are rejected.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut positions = AHashMap::with_capacity(names.len());

        for (position, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(MedisightError::invalid_input(format!(
                    "feature identifier at position {position} is empty"
                )));
            }
            if positions.insert(name.clone(), position).is_some() {
                return Err(MedisightError::invalid_input(format!(
                    "feature identifier '{name}' appears more than once"
                )));
            }
        }

        Ok(FeatureSchema { names, positions })
    }

    /// Number of features (F).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the schema has no features.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of an identifier in the vector, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Check if an identifier is part of the schema.
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Identifiers in vector order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Iterate over `(position, identifier)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().enumerate().map(|(i, n)| (i, n.as_str()))
    }
}

impl PartialEq for FeatureSchema {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

impl Eq for FeatureSchema {}

impl fmt::Debug for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureSchema")
            .field("len", &self.names.len())
            .field("names", &self.names)
            .finish()
    }
}

impl TryFrom<Vec<String>> for FeatureSchema {
    type Error = MedisightError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        FeatureSchema::new(names)
    }
}

impl From<FeatureSchema> for Vec<String> {
    fn from(schema: FeatureSchema) -> Self {
        schema.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_follow_insertion_order() {
        let schema = FeatureSchema::new(["fever", "cough", "headache"]).unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.position("fever"), Some(0));
        assert_eq!(schema.position("headache"), Some(2));
        assert_eq!(schema.position("rash"), None);
        assert!(schema.contains("cough"));
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let err = FeatureSchema::new(["fever", "cough", "fever"]).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_empty_identifier_rejected() {
        assert!(FeatureSchema::new(["fever", ""]).is_err());
    }

    #[test]
    fn test_json_form_is_plain_list() {
        let schema = FeatureSchema::new(["a", "b"]).unwrap();
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(json, r#"["a","b"]"#);

        let back: FeatureSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
        assert_eq!(back.position("b"), Some(1));

        assert!(serde_json::from_str::<FeatureSchema>(r#"["a","a"]"#).is_err());
    }
}
