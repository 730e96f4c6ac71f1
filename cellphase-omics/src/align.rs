//! Alignment of an arbitrary expression matrix onto the marker panel.
//!
//! [`FeatureAligner`] produces an [`AlignedFeatureMatrix`] whose rows are
//! exactly the panel genes, in panel order, for every call:
//!
//! 1. genes present in both the input and the panel are copied verbatim;
//! 2. panel genes absent from the input are filled, in every cell, with the
//!    minimum finite value of the common-gene submatrix;
//! 3. any non-finite value left in the assembled matrix is replaced by 0.
//!
//! Extra input genes are ignored. The input is never mutated.

use std::sync::Arc;

use cellphase_core::{CellphaseError, Result, Summarizable};
use tracing::{debug, warn};

use crate::expr::ExpressionMatrix;
use crate::panel::MarkerPanel;

/// Fraction of the panel that must be present in the input before a
/// low-overlap warning is emitted.
pub const MIN_PANEL_OVERLAP: f64 = 0.8;

/// Counts describing how well an input matrix covers the marker panel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlignmentReport {
    /// Number of genes in the panel.
    pub panel_size: usize,
    /// Panel genes found in the input.
    pub n_present: usize,
    /// Panel genes absent from the input, in panel order.
    pub missing_genes: Vec<String>,
    /// Value written to every cell of every missing gene.
    pub imputed_value: f64,
    /// Entries floored to 0 by the non-finite cleanup.
    pub n_non_finite: usize,
}

impl AlignmentReport {
    pub fn n_missing(&self) -> usize {
        self.missing_genes.len()
    }

    /// Fraction of panel genes present in the input.
    pub fn overlap_fraction(&self) -> f64 {
        if self.panel_size == 0 {
            return 0.0;
        }
        self.n_present as f64 / self.panel_size as f64
    }

    /// Whether the overlap meets [`MIN_PANEL_OVERLAP`].
    pub fn passes_overlap_check(&self) -> bool {
        self.overlap_fraction() >= MIN_PANEL_OVERLAP
    }
}

impl Summarizable for AlignmentReport {
    fn summary(&self) -> String {
        format!(
            "{} of {} marker genes present ({:.1}%), {} imputed",
            self.n_present,
            self.panel_size,
            self.overlap_fraction() * 100.0,
            self.n_missing()
        )
    }
}

/// Panel-ordered, fully populated feature matrix (panel genes × cells).
#[derive(Debug, Clone)]
pub struct AlignedFeatureMatrix {
    matrix: ExpressionMatrix,
}

impl AlignedFeatureMatrix {
    /// Number of cells.
    pub fn n_cells(&self) -> usize {
        self.matrix.n_cells()
    }

    /// Number of features (equals the panel length).
    pub fn n_features(&self) -> usize {
        self.matrix.n_genes()
    }

    /// Row keys; identical to the panel genes.
    pub fn genes(&self) -> &[String] {
        self.matrix.gene_names()
    }

    pub fn cell_names(&self) -> &[String] {
        self.matrix.cell_names()
    }

    /// Feature vector of one cell, in panel order.
    pub fn cell_vector(&self, cell_idx: usize) -> Option<Vec<f64>> {
        self.matrix.column(cell_idx)
    }

    /// Values of one panel gene across cells.
    pub fn feature(&self, feature_idx: usize) -> Option<&[f64]> {
        self.matrix.row(feature_idx)
    }

    pub fn as_matrix(&self) -> &ExpressionMatrix {
        &self.matrix
    }
}

/// Maps expression matrices onto a fixed marker panel.
#[derive(Debug, Clone)]
pub struct FeatureAligner {
    panel: Arc<MarkerPanel>,
}

impl FeatureAligner {
    pub fn new(panel: Arc<MarkerPanel>) -> Self {
        Self { panel }
    }

    pub fn panel(&self) -> &MarkerPanel {
        &self.panel
    }

    /// Row indices of the input genes that belong to the panel, in input order.
    pub fn common_gene_indices(&self, expr: &ExpressionMatrix) -> Vec<usize> {
        expr.gene_names()
            .iter()
            .enumerate()
            .filter(|(_, g)| self.panel.contains(g))
            .map(|(i, _)| i)
            .collect()
    }

    /// Align `expr` onto the panel.
    ///
    /// An input sharing no gene with the panel still aligns: every row is
    /// imputed, with 0 as the imputed value since there is no finite value
    /// to take a minimum from. An input with no cells is rejected.
    pub fn align(&self, expr: &ExpressionMatrix) -> Result<(AlignedFeatureMatrix, AlignmentReport)> {
        let n_cells = expr.n_cells();
        if n_cells == 0 {
            return Err(CellphaseError::InvalidInput(
                "expression matrix has no cells".into(),
            ));
        }

        let panel_size = self.panel.len();
        let input_index = expr.gene_index();
        let sources: Vec<Option<usize>> = self
            .panel
            .genes()
            .iter()
            .map(|g| input_index.get(g.as_str()).copied())
            .collect();

        let imputed_value = sources
            .iter()
            .flatten()
            .filter_map(|&r| expr.row(r))
            .flat_map(|row| row.iter().copied())
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))))
            .unwrap_or(0.0);

        let mut data = Vec::with_capacity(panel_size * n_cells);
        let mut missing_genes = Vec::new();
        for (gene, source) in self.panel.genes().iter().zip(&sources) {
            match source.and_then(|r| expr.row(r)) {
                Some(row) => data.extend_from_slice(row),
                None => {
                    missing_genes.push(gene.clone());
                    data.extend(std::iter::repeat(imputed_value).take(n_cells));
                }
            }
        }

        let mut matrix = ExpressionMatrix::from_flat(
            data,
            self.panel.genes().to_vec(),
            expr.cell_names().to_vec(),
        )?;
        let n_non_finite = replace_non_finite(matrix.as_mut_slice());

        let report = AlignmentReport {
            panel_size,
            n_present: panel_size - missing_genes.len(),
            missing_genes,
            imputed_value,
            n_non_finite,
        };

        if report.passes_overlap_check() {
            debug!("{}", report.summary());
        } else {
            warn!(
                present = report.n_present,
                panel = report.panel_size,
                "low marker gene overlap: {}; missing genes are imputed",
                report.summary()
            );
        }

        Ok((AlignedFeatureMatrix { matrix }, report))
    }
}

/// Replace every NaN and ±infinity with 0. Returns the number of entries changed.
pub fn replace_non_finite(data: &mut [f64]) -> usize {
    let mut n = 0;
    for v in data.iter_mut().filter(|v| !v.is_finite()) {
        *v = 0.0;
        n += 1;
    }
    n
}
