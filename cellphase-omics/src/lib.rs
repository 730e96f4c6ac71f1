//! Omics data structures for the cellphase cell-cycle classifier.
//!
//! This crate provides everything upstream of the classifier:
//!
//! - **Expression matrices** — Dense [`ExpressionMatrix`] (genes × cells)
//! - **Resources** — [`MarkerPanel`], [`ClassLabelSet`] and the [`AnnotationTable`] they load from
//! - **Normalization** — the [`Normalizer`] contract, [`LogNormalizer`] and [`scale_genes`]
//! - **Alignment** — [`FeatureAligner`] onto the panel, with an [`AlignmentReport`]
//! - **Module scores** — per-state gene module means via [`module_scores`]
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use cellphase_omics::{ExpressionMatrix, FeatureAligner, MarkerPanel};
//!
//! let panel = Arc::new(MarkerPanel::new(vec!["g1".into(), "g2".into(), "g3".into()]).unwrap());
//! let expr = ExpressionMatrix::new(
//!     vec![vec![2.0], vec![-1.0]],
//!     vec!["g1".into(), "g2".into()],
//!     vec!["c1".into()],
//! ).unwrap();
//!
//! let (aligned, report) = FeatureAligner::new(panel).align(&expr).unwrap();
//! assert_eq!(aligned.cell_vector(0), Some(vec![2.0, -1.0, -1.0]));
//! assert_eq!(report.missing_genes, vec!["g3"]);
//! ```

pub mod align;
pub mod annotation;
pub mod expr;
pub mod modules;
pub mod normalize;
pub mod panel;

pub use align::{
    replace_non_finite, AlignedFeatureMatrix, AlignmentReport, FeatureAligner, MIN_PANEL_OVERLAP,
};
pub use annotation::{AnnotationTable, ModuleGenes};
pub use expr::ExpressionMatrix;
pub use modules::{module_scores, ModuleScore};
pub use normalize::{
    scale_genes, GeneScaler, LogNormalizeConfig, LogNormalizer, Normalizer, ScaleConfig,
};
pub use panel::{
    identifier_column, ClassLabelSet, GeneIdScheme, MarkerPanel, Species, DEFAULT_CLASS_LABELS,
    UNKNOWN_LABEL,
};
