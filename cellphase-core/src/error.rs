//! Structured error types for the cellphase workspace.

use thiserror::Error;

/// Unified error type for all cellphase operations.
#[derive(Debug, Error)]
pub enum CellphaseError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed resource file or value)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values, empty matrices)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A vector crossing the classifier boundary has the wrong length.
    ///
    /// This is a contract breach between the marker panel, the label set and
    /// the model, and is never recovered from.
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the cellphase workspace.
pub type Result<T> = std::result::Result<T, CellphaseError>;
