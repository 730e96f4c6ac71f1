//! Batch inference: aligned features → per-cell class probabilities.
//!
//! [`classify_matrix`] invokes the classifier exactly once per cell and
//! collects a [`ProbabilityTable`]. With the `parallel` feature the per-cell
//! calls are spread across the rayon pool; output order always follows the
//! aligned cell order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cellphase_core::{CellphaseError, Result, Summarizable};
use cellphase_omics::{AlignedFeatureMatrix, ClassLabelSet};
use tracing::debug;

use crate::classifier::{classify_checked, Classifier};

/// Allowed deviation of a probability row's sum from 1.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-3;

/// Per-cell class probabilities (cells × classes), indexed by cell identifier.
#[derive(Debug, Clone)]
pub struct ProbabilityTable {
    labels: Arc<ClassLabelSet>,
    cell_names: Vec<String>,
    data: Vec<f64>,
}

impl ProbabilityTable {
    /// Build a table from one probability row per cell.
    ///
    /// Every row must have one finite, non-negative value per class and sum to
    /// 1 within [`PROBABILITY_SUM_TOLERANCE`]. Cell identifiers must be unique
    /// and there must be at least one cell.
    pub fn new(
        labels: Arc<ClassLabelSet>,
        cell_names: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if rows.len() != cell_names.len() {
            return Err(CellphaseError::InvalidInput(format!(
                "{} probability rows for {} cells",
                rows.len(),
                cell_names.len()
            )));
        }
        let n_classes = labels.len();
        let mut data = Vec::with_capacity(rows.len() * n_classes);
        for (row, cell) in rows.iter().zip(&cell_names) {
            if row.len() != n_classes {
                return Err(CellphaseError::ShapeMismatch {
                    context: "probability row",
                    expected: n_classes,
                    found: row.len(),
                });
            }
            check_distribution(row, cell)?;
            data.extend_from_slice(row);
        }

        if cell_names.is_empty() {
            return Err(CellphaseError::InvalidInput(
                "probability table has no cells".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(cell_names.len());
        for cell in &cell_names {
            if !seen.insert(cell.as_str()) {
                return Err(CellphaseError::InvalidInput(format!(
                    "duplicate cell identifier '{cell}'"
                )));
            }
        }

        Ok(Self {
            labels,
            cell_names,
            data,
        })
    }

    /// Rebuild a table from per-class columns keyed by exact label string.
    ///
    /// This is how probabilities already attached to a caller's per-cell
    /// metadata come back in. Column names are matched verbatim against the
    /// label set; nothing is renamed or sanitized. Extra columns are ignored.
    pub fn from_columns(
        labels: Arc<ClassLabelSet>,
        cell_names: Vec<String>,
        columns: &HashMap<String, Vec<f64>>,
    ) -> Result<Self> {
        let mut per_class = Vec::with_capacity(labels.len());
        for label in labels.iter() {
            let column = columns.get(label).ok_or_else(|| {
                CellphaseError::InvalidInput(format!("no probability column for class '{label}'"))
            })?;
            if column.len() != cell_names.len() {
                return Err(CellphaseError::InvalidInput(format!(
                    "probability column '{label}' has {} values for {} cells",
                    column.len(),
                    cell_names.len()
                )));
            }
            per_class.push(column);
        }

        let rows = (0..cell_names.len())
            .map(|i| per_class.iter().map(|c| c[i]).collect())
            .collect();
        Self::new(labels, cell_names, rows)
    }

    pub fn labels(&self) -> &ClassLabelSet {
        &self.labels
    }

    pub fn shared_labels(&self) -> Arc<ClassLabelSet> {
        Arc::clone(&self.labels)
    }

    pub fn cell_names(&self) -> &[String] {
        &self.cell_names
    }

    pub fn n_cells(&self) -> usize {
        self.cell_names.len()
    }

    pub fn n_classes(&self) -> usize {
        self.labels.len()
    }

    /// Probability row of one cell, in label order.
    pub fn row(&self, cell_idx: usize) -> Option<&[f64]> {
        let n = self.n_classes();
        if cell_idx < self.n_cells() {
            Some(&self.data[cell_idx * n..(cell_idx + 1) * n])
        } else {
            None
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks(self.n_classes())
    }

    /// Probabilities of one class across all cells.
    pub fn column(&self, label: &str) -> Option<Vec<f64>> {
        let j = self.labels.position(label)?;
        Some(self.rows().map(|r| r[j]).collect())
    }

    /// Columns keyed by exact label string, the inverse of [`from_columns`](Self::from_columns).
    pub fn to_columns(&self) -> HashMap<String, Vec<f64>> {
        self.labels
            .iter()
            .enumerate()
            .map(|(j, label)| (label.to_string(), self.rows().map(|r| r[j]).collect()))
            .collect()
    }
}

impl Summarizable for ProbabilityTable {
    fn summary(&self) -> String {
        format!(
            "ProbabilityTable: {} cells \u{00d7} {} classes",
            self.n_cells(),
            self.n_classes()
        )
    }
}

fn check_distribution(row: &[f64], cell: &str) -> Result<()> {
    if let Some(p) = row.iter().find(|p| !p.is_finite() || **p < 0.0) {
        return Err(CellphaseError::InvalidInput(format!(
            "cell '{cell}' has invalid probability {p}"
        )));
    }
    let sum: f64 = row.iter().sum();
    if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        return Err(CellphaseError::InvalidInput(format!(
            "probabilities of cell '{cell}' sum to {sum}, expected 1"
        )));
    }
    Ok(())
}

/// Classify every cell of an aligned matrix.
///
/// A vector of the wrong length on either side of the classifier boundary
/// aborts the whole run with [`CellphaseError::ShapeMismatch`].
pub fn classify_matrix<C: Classifier + ?Sized>(
    classifier: &C,
    aligned: &AlignedFeatureMatrix,
    labels: Arc<ClassLabelSet>,
) -> Result<ProbabilityTable> {
    let n_cells = aligned.n_cells();
    let n_features = aligned.n_features();
    let n_classes = labels.len();

    let classify_cell = |j: usize| -> Result<Vec<f64>> {
        let features = aligned.cell_vector(j).ok_or_else(|| {
            CellphaseError::Other(format!("cell index {j} out of range"))
        })?;
        classify_checked(classifier, &features, n_features, n_classes)
    };

    #[cfg(feature = "parallel")]
    let rows = {
        use rayon::prelude::*;
        (0..n_cells)
            .into_par_iter()
            .map(classify_cell)
            .collect::<Result<Vec<Vec<f64>>>>()?
    };
    #[cfg(not(feature = "parallel"))]
    let rows = (0..n_cells)
        .map(classify_cell)
        .collect::<Result<Vec<Vec<f64>>>>()?;

    debug!(cells = n_cells, classes = n_classes, "classified cells");
    ProbabilityTable::new(labels, aligned.cell_names().to_vec(), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellphase_omics::{ExpressionMatrix, FeatureAligner, MarkerPanel};

    fn labels() -> Arc<ClassLabelSet> {
        Arc::new(ClassLabelSet::new(vec!["A".into(), "B".into(), "C".into()]).unwrap())
    }

    fn aligned() -> AlignedFeatureMatrix {
        let panel = Arc::new(
            MarkerPanel::new(vec!["g1".into(), "g2".into(), "g3".into()]).unwrap(),
        );
        let expr = ExpressionMatrix::new(
            vec![vec![2.0, 0.0], vec![-1.0, 1.0]],
            vec!["g1".into(), "g2".into()],
            vec!["c1".into(), "c2".into()],
        )
        .unwrap();
        FeatureAligner::new(panel).align(&expr).unwrap().0
    }

    #[test]
    fn test_table_construction() {
        let t = ProbabilityTable::new(
            labels(),
            vec!["c1".into(), "c2".into()],
            vec![vec![0.2, 0.7, 0.1], vec![1.0, 0.0, 0.0]],
        )
        .unwrap();
        assert_eq!(t.n_cells(), 2);
        assert_eq!(t.row(0), Some(&[0.2, 0.7, 0.1][..]));
        assert_eq!(t.row(2), None);
        assert_eq!(t.column("A"), Some(vec![0.2, 1.0]));
        assert_eq!(t.column("D"), None);
        assert_eq!(t.summary(), "ProbabilityTable: 2 cells \u{00d7} 3 classes");
    }

    #[test]
    fn test_table_rejects_bad_rows() {
        let cells = vec!["c1".to_string()];
        assert!(ProbabilityTable::new(labels(), cells.clone(), vec![vec![0.5, 0.5]]).is_err());
        assert!(ProbabilityTable::new(labels(), cells.clone(), vec![vec![0.5, 0.6, -0.1]]).is_err());
        assert!(ProbabilityTable::new(labels(), cells.clone(), vec![vec![0.5, 0.5, 0.5]]).is_err());
        assert!(ProbabilityTable::new(labels(), cells, vec![vec![f64::NAN, 0.5, 0.5]]).is_err());
        assert!(ProbabilityTable::new(labels(), vec![], vec![]).is_err());
        assert!(ProbabilityTable::new(
            labels(),
            vec!["c".into(), "c".into()],
            vec![vec![1.0, 0.0, 0.0]; 2]
        )
        .is_err());
    }

    #[test]
    fn test_columns_round_trip_exact_labels() {
        let labels = Arc::new(
            ClassLabelSet::new(vec!["S/G2".into(), "M/Early G1".into()]).unwrap(),
        );
        let t = ProbabilityTable::new(
            Arc::clone(&labels),
            vec!["c1".into()],
            vec![vec![0.25, 0.75]],
        )
        .unwrap();

        let columns = t.to_columns();
        assert_eq!(columns["S/G2"], vec![0.25]);

        let back = ProbabilityTable::from_columns(labels, vec!["c1".into()], &columns).unwrap();
        assert_eq!(back.row(0), t.row(0));
    }

    #[test]
    fn test_from_columns_missing_label() {
        let mut columns = HashMap::new();
        columns.insert("A".to_string(), vec![1.0]);
        columns.insert("B".to_string(), vec![0.0]);
        // "S.G2"-style renamed columns do not match "C"
        columns.insert("c".to_string(), vec![0.0]);
        let err = ProbabilityTable::from_columns(labels(), vec!["c1".into()], &columns);
        assert!(err.is_err());
    }

    #[test]
    fn test_classify_matrix() {
        let stub = |x: &[f64]| {
            if x[0] > 1.0 {
                vec![0.2, 0.7, 0.1]
            } else {
                vec![0.6, 0.2, 0.2]
            }
        };
        let table = classify_matrix(&stub, &aligned(), labels()).unwrap();
        assert_eq!(table.cell_names(), &["c1", "c2"]);
        assert_eq!(table.row(0), Some(&[0.2, 0.7, 0.1][..]));
        assert_eq!(table.row(1), Some(&[0.6, 0.2, 0.2][..]));
    }

    #[test]
    fn test_classify_matrix_shape_mismatch() {
        let wrong = |_: &[f64]| vec![0.5, 0.5];
        assert!(matches!(
            classify_matrix(&wrong, &aligned(), labels()),
            Err(CellphaseError::ShapeMismatch { expected: 3, found: 2, .. })
        ));
    }
}
