//! Dense expression matrix for single-cell data.
//!
//! [`ExpressionMatrix`] stores a row-major dense matrix of `f64` values
//! (n_genes × n_cells) with associated gene and cell identifiers. Gene
//! identifiers are the row keys used for marker-panel alignment, cell
//! identifiers the column keys carried through to the state table.

use std::collections::{HashMap, HashSet};

use cellphase_core::{CellphaseError, Result, Summarizable};

/// A dense, row-major expression matrix (genes × cells).
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    data: Vec<f64>,
    n_genes: usize,
    n_cells: usize,
    gene_names: Vec<String>,
    cell_names: Vec<String>,
}

impl ExpressionMatrix {
    /// Create a matrix from row-major 2D data.
    ///
    /// Each inner `Vec` is one gene (row) with `n_cells` values. Gene and cell
    /// identifiers must be unique. Non-finite values are accepted as-is.
    pub fn new(
        data: Vec<Vec<f64>>,
        gene_names: Vec<String>,
        cell_names: Vec<String>,
    ) -> Result<Self> {
        let n_genes = data.len();
        let n_cells = cell_names.len();

        if gene_names.len() != n_genes {
            return Err(CellphaseError::InvalidInput(format!(
                "gene_names length ({}) does not match row count ({n_genes})",
                gene_names.len()
            )));
        }

        let mut flat = Vec::with_capacity(n_genes * n_cells);
        for (i, row) in data.iter().enumerate() {
            if row.len() != n_cells {
                return Err(CellphaseError::InvalidInput(format!(
                    "row {i} has {} columns, expected {n_cells}",
                    row.len()
                )));
            }
            flat.extend_from_slice(row);
        }

        Self::from_flat(flat, gene_names, cell_names)
    }

    /// Create a matrix from an already-flattened row-major buffer.
    pub fn from_flat(
        data: Vec<f64>,
        gene_names: Vec<String>,
        cell_names: Vec<String>,
    ) -> Result<Self> {
        let n_genes = gene_names.len();
        let n_cells = cell_names.len();
        if data.len() != n_genes * n_cells {
            return Err(CellphaseError::InvalidInput(format!(
                "data length ({}) does not match {n_genes} genes \u{00d7} {n_cells} cells",
                data.len()
            )));
        }
        check_unique(&gene_names, "gene")?;
        check_unique(&cell_names, "cell")?;

        Ok(Self {
            data,
            n_genes,
            n_cells,
            gene_names,
            cell_names,
        })
    }

    /// (n_genes, n_cells).
    pub fn shape(&self) -> (usize, usize) {
        (self.n_genes, self.n_cells)
    }

    /// Number of genes (rows).
    pub fn n_genes(&self) -> usize {
        self.n_genes
    }

    /// Number of cells (columns).
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// True when the matrix has no genes or no cells.
    pub fn is_empty(&self) -> bool {
        self.n_genes == 0 || self.n_cells == 0
    }

    /// Get a single value by gene and cell index.
    pub fn get(&self, gene_idx: usize, cell_idx: usize) -> Option<f64> {
        if gene_idx < self.n_genes && cell_idx < self.n_cells {
            Some(self.data[gene_idx * self.n_cells + cell_idx])
        } else {
            None
        }
    }

    /// A slice of one gene's expression across all cells.
    pub fn row(&self, gene_idx: usize) -> Option<&[f64]> {
        if gene_idx < self.n_genes {
            let start = gene_idx * self.n_cells;
            Some(&self.data[start..start + self.n_cells])
        } else {
            None
        }
    }

    /// All gene values for a single cell (column copy, since data is row-major).
    pub fn column(&self, cell_idx: usize) -> Option<Vec<f64>> {
        if cell_idx >= self.n_cells {
            return None;
        }
        let col: Vec<f64> = (0..self.n_genes)
            .map(|r| self.data[r * self.n_cells + cell_idx])
            .collect();
        Some(col)
    }

    /// Row index of every gene, keyed by gene identifier.
    pub fn gene_index(&self) -> HashMap<&str, usize> {
        self.gene_names
            .iter()
            .enumerate()
            .map(|(i, g)| (g.as_str(), i))
            .collect()
    }

    /// Subset the matrix to the given gene (row) indices.
    pub fn filter_genes(&self, indices: &[usize]) -> Result<ExpressionMatrix> {
        let mut data = Vec::with_capacity(indices.len() * self.n_cells);
        let mut names = Vec::with_capacity(indices.len());

        for &i in indices {
            if i >= self.n_genes {
                return Err(CellphaseError::InvalidInput(format!(
                    "gene index {i} out of bounds (n_genes={})",
                    self.n_genes
                )));
            }
            let start = i * self.n_cells;
            data.extend_from_slice(&self.data[start..start + self.n_cells]);
            names.push(self.gene_names[i].clone());
        }

        Self::from_flat(data, names, self.cell_names.clone())
    }

    /// Apply `f` to every row, producing a new matrix with the same keys.
    ///
    /// `f` receives the gene's row and writes the transformed values into the
    /// output slice of equal length.
    pub fn map_rows<F>(&self, mut f: F) -> ExpressionMatrix
    where
        F: FnMut(&[f64], &mut [f64]),
    {
        let mut out = vec![0.0; self.data.len()];
        if self.n_cells > 0 {
            for (src, dst) in self
                .data
                .chunks(self.n_cells)
                .zip(out.chunks_mut(self.n_cells))
            {
                f(src, dst);
            }
        }
        ExpressionMatrix {
            data: out,
            n_genes: self.n_genes,
            n_cells: self.n_cells,
            gene_names: self.gene_names.clone(),
            cell_names: self.cell_names.clone(),
        }
    }

    /// The underlying flat data as a slice (row-major, n_genes × n_cells).
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Gene identifiers, in row order.
    pub fn gene_names(&self) -> &[String] {
        &self.gene_names
    }

    /// Cell identifiers, in column order.
    pub fn cell_names(&self) -> &[String] {
        &self.cell_names
    }
}

impl Summarizable for ExpressionMatrix {
    fn summary(&self) -> String {
        format!(
            "ExpressionMatrix: {} genes \u{00d7} {} cells",
            self.n_genes, self.n_cells
        )
    }
}

fn check_unique(names: &[String], kind: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(CellphaseError::InvalidInput(format!(
                "duplicate {kind} identifier '{name}'"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> ExpressionMatrix {
        ExpressionMatrix::new(
            vec![
                vec![1.0, 2.0, 3.0],
                vec![4.0, 5.0, 6.0],
            ],
            vec!["gene1".into(), "gene2".into()],
            vec!["c1".into(), "c2".into(), "c3".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_construction() {
        let m = sample_matrix();
        assert_eq!(m.shape(), (2, 3));
        assert!(!m.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = ExpressionMatrix::new(
            vec![vec![1.0, 2.0]],
            vec!["gene1".into(), "gene2".into()], // 2 names, 1 row
            vec!["c1".into(), "c2".into()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_row_length_mismatch() {
        let result = ExpressionMatrix::new(
            vec![vec![1.0, 2.0], vec![3.0]],
            vec!["gene1".into(), "gene2".into()],
            vec!["c1".into(), "c2".into()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let genes = ExpressionMatrix::new(
            vec![vec![1.0], vec![2.0]],
            vec!["g".into(), "g".into()],
            vec!["c1".into()],
        );
        assert!(genes.is_err());

        let cells = ExpressionMatrix::new(
            vec![vec![1.0, 2.0]],
            vec!["g".into()],
            vec!["c1".into(), "c1".into()],
        );
        assert!(cells.is_err());
    }

    #[test]
    fn test_from_flat_length_check() {
        let result = ExpressionMatrix::from_flat(
            vec![1.0, 2.0, 3.0],
            vec!["g1".into(), "g2".into()],
            vec!["c1".into(), "c2".into()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_get() {
        let m = sample_matrix();
        assert_eq!(m.get(0, 0), Some(1.0));
        assert_eq!(m.get(1, 2), Some(6.0));
        assert_eq!(m.get(2, 0), None);
    }

    #[test]
    fn test_row_and_column() {
        let m = sample_matrix();
        assert_eq!(m.row(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(m.row(2), None);
        assert_eq!(m.column(2), Some(vec![3.0, 6.0]));
        assert_eq!(m.column(3), None);
    }

    #[test]
    fn test_gene_index() {
        let m = sample_matrix();
        let idx = m.gene_index();
        assert_eq!(idx.get("gene2"), Some(&1));
        assert_eq!(idx.get("gene3"), None);
    }

    #[test]
    fn test_filter_genes() {
        let m = sample_matrix();
        let filtered = m.filter_genes(&[1]).unwrap();
        assert_eq!(filtered.shape(), (1, 3));
        assert_eq!(filtered.gene_names(), &["gene2"]);
        assert_eq!(filtered.get(0, 0), Some(4.0));

        let none = m.filter_genes(&[]).unwrap();
        assert_eq!(none.shape(), (0, 3));
        assert_eq!(none.cell_names().len(), 3);

        assert!(m.filter_genes(&[5]).is_err());
    }

    #[test]
    fn test_map_rows() {
        let m = sample_matrix();
        let doubled = m.map_rows(|src, dst| {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = s * 2.0;
            }
        });
        assert_eq!(doubled.as_slice(), &[2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
        assert_eq!(doubled.gene_names(), m.gene_names());
    }

    #[test]
    fn test_summary() {
        let m = sample_matrix();
        assert_eq!(m.summary(), "ExpressionMatrix: 2 genes \u{00d7} 3 cells");
    }

    #[test]
    fn test_empty_matrix() {
        let m = ExpressionMatrix::new(vec![], vec![], vec!["c1".into()]).unwrap();
        assert_eq!(m.shape(), (0, 1));
        assert!(m.is_empty());
    }
}
