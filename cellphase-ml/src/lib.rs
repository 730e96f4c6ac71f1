//! Cell-cycle state classification for single-cell and spatial expression.
//!
//! - **Classifier** — the per-cell feature vector → probability contract, with
//!   a frozen [`DenseNetwork`] implementation loaded from JSON
//! - **Inference** — batch classification into a [`ProbabilityTable`]
//! - **Decision** — arg-max, optional G0/G1 collapse and the confidence
//!   threshold that turns probabilities into a [`StateAssignment`]
//! - **Sweep** — label frequencies across a grid of thresholds
//! - **Pipeline** — normalize, align, classify and decide in one call
//!
//! ```
//! use std::sync::Arc;
//! use cellphase_ml::{DecisionEngine, ProbabilityTable, Threshold};
//! use cellphase_omics::ClassLabelSet;
//!
//! let labels = Arc::new(ClassLabelSet::new(vec!["A".into(), "B".into()]).unwrap());
//! let table = Arc::new(
//!     ProbabilityTable::new(Arc::clone(&labels), vec!["c1".into()], vec![vec![0.3, 0.7]]).unwrap(),
//! );
//! let engine = DecisionEngine::new(labels).unwrap();
//!
//! let calls = engine.decide_table(&table, Threshold::new(0.5).unwrap(), true).unwrap();
//! assert_eq!(calls.label(0), Some("B"));
//! let strict = engine.decide_table(&table, Threshold::new(0.8).unwrap(), true).unwrap();
//! assert_eq!(strict.label(0), Some("Unknown"));
//! ```

pub mod classifier;
pub mod decision;
pub mod inference;
pub mod network;
pub mod pipeline;
pub mod sweep;

pub use classifier::{check_dimensions, classify_checked, Classifier};
pub use decision::{
    CellStateRecord, CollapseMap, Decision, DecisionEngine, StateAssignment, Threshold,
};
pub use inference::{classify_matrix, ProbabilityTable, PROBABILITY_SUM_TOLERANCE};
pub use network::{softmax, Activation, DenseLayer, DenseNetwork};
pub use pipeline::{Assay, AssayStore, Pipeline, PredictConfig, Prediction};
pub use sweep::{SweepConfig, SweepRow, ThresholdSweep};
