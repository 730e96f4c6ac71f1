//! The classifier boundary.
//!
//! A [`Classifier`] maps one panel-ordered feature vector to one
//! probability vector in class-label order. Any closure
//! `Fn(&[f64]) -> Vec<f64>` is a classifier, which keeps the pipeline
//! testable with stubs of known behavior.

use cellphase_core::{CellphaseError, Result};

/// Pure function from a feature vector to class probabilities.
pub trait Classifier: Send + Sync {
    /// Class probabilities for one cell.
    fn classify(&self, features: &[f64]) -> Result<Vec<f64>>;

    /// Expected input length, when the model knows it.
    fn input_len(&self) -> Option<usize> {
        None
    }

    /// Output length, when the model knows it.
    fn output_len(&self) -> Option<usize> {
        None
    }
}

impl<F> Classifier for F
where
    F: Fn(&[f64]) -> Vec<f64> + Send + Sync,
{
    fn classify(&self, features: &[f64]) -> Result<Vec<f64>> {
        Ok(self(features))
    }
}

/// Check declared model dimensions against the panel and label set.
pub fn check_dimensions<C: Classifier + ?Sized>(
    classifier: &C,
    n_features: usize,
    n_classes: usize,
) -> Result<()> {
    if let Some(n) = classifier.input_len() {
        if n != n_features {
            return Err(CellphaseError::ShapeMismatch {
                context: "classifier input (marker panel length)",
                expected: n_features,
                found: n,
            });
        }
    }
    if let Some(n) = classifier.output_len() {
        if n != n_classes {
            return Err(CellphaseError::ShapeMismatch {
                context: "classifier output (class label count)",
                expected: n_classes,
                found: n,
            });
        }
    }
    Ok(())
}

/// Classify one vector, enforcing both sides of the boundary contract.
pub fn classify_checked<C: Classifier + ?Sized>(
    classifier: &C,
    features: &[f64],
    n_features: usize,
    n_classes: usize,
) -> Result<Vec<f64>> {
    if features.len() != n_features {
        return Err(CellphaseError::ShapeMismatch {
            context: "classifier input",
            expected: n_features,
            found: features.len(),
        });
    }
    let probs = classifier.classify(features)?;
    if probs.len() != n_classes {
        return Err(CellphaseError::ShapeMismatch {
            context: "classifier output",
            expected: n_classes,
            found: probs.len(),
        });
    }
    Ok(probs)
}
