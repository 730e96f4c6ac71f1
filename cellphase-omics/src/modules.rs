//! Per-cell state module scores over the aligned marker panel.

use cellphase_core::Result;
use tracing::debug;

use crate::align::{AlignedFeatureMatrix, AlignmentReport};
use crate::annotation::ModuleGenes;

/// Mean aligned value of a module's genes in every cell.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleScore {
    pub name: String,
    /// Module genes that were measured in the input (imputed genes excluded).
    pub n_genes_used: usize,
    /// One score per cell, in aligned cell order.
    pub scores: Vec<f64>,
}

/// Score each module as the mean of its measured genes per cell.
///
/// Genes imputed during alignment or absent from the panel do not
/// contribute. A module with no measured gene scores 0 in every cell.
pub fn module_scores(
    aligned: &AlignedFeatureMatrix,
    report: &AlignmentReport,
    modules: &[ModuleGenes],
) -> Result<Vec<ModuleScore>> {
    let n_cells = aligned.n_cells();
    let genes = aligned.genes();

    Ok(modules
        .iter()
        .map(|module| {
            let rows: Vec<usize> = module
                .genes
                .iter()
                .filter(|g| !report.missing_genes.contains(g))
                .filter_map(|g| genes.iter().position(|p| p == g))
                .collect();

            let mut scores = vec![0.0; n_cells];
            if rows.is_empty() {
                debug!(module = %module.name, "no measured genes; module scores are 0");
            } else {
                for &r in &rows {
                    if let Some(values) = aligned.feature(r) {
                        for (s, v) in scores.iter_mut().zip(values) {
                            *s += v;
                        }
                    }
                }
                let n = rows.len() as f64;
                scores.iter_mut().for_each(|s| *s /= n);
            }

            ModuleScore {
                name: module.name.clone(),
                n_genes_used: rows.len(),
                scores,
            }
        })
        .collect())
}
