//! Shared primitives for the cellphase cell-cycle state classifier.
//!
//! `cellphase-core` provides the foundation the other cellphase crates build on:
//!
//! - **Error types** — [`CellphaseError`] and [`Result`] for structured error handling
//! - **Traits** — [`Summarizable`] and [`Annotated`] for the typed records

pub mod error;
pub mod traits;

pub use error::{CellphaseError, Result};
pub use traits::*;
