//! Soft voting ensemble.

use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, InputRepresentation, Model, TrainingSet, check_input};
use crate::error::{MedisightError, Result};

/// Averages the probability distributions of its members.
///
/// All members consume the raw representation and share one class list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftVotingClassifier {
    members: Vec<Model>,
    classes: Vec<String>,
    n_features: usize,
}

impl SoftVotingClassifier {
    /// Create an ensemble over unfitted members; call [`Classifier::fit`]
    /// before predicting.
    pub fn new(members: Vec<Model>) -> Self {
        Self {
            members,
            classes: Vec::new(),
            n_features: 0,
        }
    }

    /// Build an ensemble from members that were already fitted on the same data.
    pub fn from_fitted(members: Vec<Model>) -> Result<Self> {
        let first = members
            .first()
            .ok_or_else(|| MedisightError::training("voting ensemble needs at least one member"))?
            .as_classifier();
        let classes = first.classes().to_vec();
        let n_features = first.n_features();

        for member in &members {
            let clf = member.as_classifier();
            Self::check_member(clf)?;
            if !clf.is_fitted() {
                return Err(MedisightError::untrained(format!(
                    "ensemble member {} has not been fitted",
                    clf.name()
                )));
            }
            if clf.classes() != classes.as_slice() || clf.n_features() != n_features {
                return Err(MedisightError::training(format!(
                    "ensemble member {} was fitted on different data",
                    clf.name()
                )));
            }
        }

        Ok(Self {
            members,
            classes,
            n_features,
        })
    }

    /// Names of the members, in voting order.
    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.as_classifier().name()).collect()
    }

    fn check_member(clf: &dyn Classifier) -> Result<()> {
        if clf.input_representation() != InputRepresentation::Raw {
            return Err(MedisightError::training(format!(
                "ensemble member {} consumes {} input; only raw members are supported",
                clf.name(),
                clf.input_representation()
            )));
        }
        Ok(())
    }
}

impl Classifier for SoftVotingClassifier {
    fn name(&self) -> &str {
        "ensemble"
    }

    fn input_representation(&self) -> InputRepresentation {
        InputRepresentation::Raw
    }

    fn fit(&mut self, data: &TrainingSet<'_>) -> Result<()> {
        data.validate()?;
        if self.members.is_empty() {
            return Err(MedisightError::training("voting ensemble needs at least one member"));
        }
        for member in &mut self.members {
            let clf = member.as_classifier_mut();
            Self::check_member(clf)?;
            clf.fit(data)?;
        }
        self.classes = data.classes.to_vec();
        self.n_features = data.n_features();
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.classes.is_empty() && self.members.iter().all(|m| m.as_classifier().is_fitted())
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
        for member in &self.members {
            for (p, v) in probs.iter_mut().zip(member.as_classifier().predict_proba(x)?) {
                *p += v;
            }
        }
        let n = self.members.len() as f64;
        probs.iter_mut().for_each(|p| *p /= n);
        Ok(probs)
    }
}
