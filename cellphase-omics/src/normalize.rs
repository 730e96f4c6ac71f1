//! Expression normalization applied upstream of feature alignment.
//!
//! [`Normalizer`] is the collaborator contract: it maps a matrix to a matrix
//! with the same gene and cell keys. Two implementations are provided:
//! [`LogNormalizer`] (per-cell total-count scaling followed by `ln(1 + x)`)
//! and [`GeneScaler`] (per-gene z-scoring across cells).

use cellphase_core::{CellphaseError, Result};

use crate::expr::ExpressionMatrix;

/// A transform producing normalized expression values with unchanged keys.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, matrix: &ExpressionMatrix) -> Result<ExpressionMatrix>;
}

// ── Log normalization ──────────────────────────────────────────────────────

/// Configuration for total-count log normalization.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogNormalizeConfig {
    /// Target sum per cell after scaling.
    pub target_sum: f64,
}

impl Default for LogNormalizeConfig {
    fn default() -> Self {
        Self { target_sum: 1e4 }
    }
}

/// Scale each cell to `target_sum` total counts, then apply `ln(1 + x)`.
///
/// Cells with a non-positive total are left at zero.
#[derive(Debug, Clone, Default)]
pub struct LogNormalizer {
    pub config: LogNormalizeConfig,
}

impl LogNormalizer {
    pub fn new(config: LogNormalizeConfig) -> Self {
        Self { config }
    }
}

impl Normalizer for LogNormalizer {
    fn normalize(&self, matrix: &ExpressionMatrix) -> Result<ExpressionMatrix> {
        if !(self.config.target_sum > 0.0 && self.config.target_sum.is_finite()) {
            return Err(CellphaseError::InvalidInput(format!(
                "target_sum must be a positive finite number, got {}",
                self.config.target_sum
            )));
        }

        let (n_genes, n_cells) = matrix.shape();
        let mut totals = vec![0.0; n_cells];
        for g in 0..n_genes {
            if let Some(row) = matrix.row(g) {
                for (t, &v) in totals.iter_mut().zip(row) {
                    if v.is_finite() {
                        *t += v;
                    }
                }
            }
        }

        let factors: Vec<f64> = totals
            .iter()
            .map(|&s| {
                if s > 0.0 {
                    self.config.target_sum / s
                } else {
                    0.0
                }
            })
            .collect();

        Ok(matrix.map_rows(|src, dst| {
            for ((d, &v), &f) in dst.iter_mut().zip(src).zip(&factors) {
                *d = (v * f).ln_1p();
            }
        }))
    }
}

// ── Per-gene scaling ───────────────────────────────────────────────────────

/// Configuration for per-gene scaling.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScaleConfig {
    /// Subtract each gene's mean.
    pub center: bool,
    /// Divide by each gene's sample standard deviation.
    pub scale: bool,
    /// Clip scaled values to `[-max_value, max_value]`.
    pub max_value: Option<f64>,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            center: true,
            scale: true,
            max_value: None,
        }
    }
}

/// Z-score every gene across cells.
///
/// Mean and sample standard deviation (n - 1 denominator) are computed over
/// the gene's finite values. A gene with zero variance, or a matrix with a
/// single cell, scales to non-finite values; feature alignment floors those
/// to zero afterwards.
pub fn scale_genes(matrix: &ExpressionMatrix, config: &ScaleConfig) -> Result<ExpressionMatrix> {
    if let Some(max) = config.max_value {
        if !(max > 0.0) {
            return Err(CellphaseError::InvalidInput(format!(
                "max_value must be positive, got {max}"
            )));
        }
    }

    Ok(matrix.map_rows(|src, dst| {
        let finite: Vec<f64> = src.iter().copied().filter(|v| v.is_finite()).collect();
        let n = finite.len() as f64;
        let mean = if config.center {
            finite.iter().sum::<f64>() / n
        } else {
            0.0
        };
        let sd = if config.scale {
            let ss: f64 = finite.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        } else {
            1.0
        };

        for (d, &v) in dst.iter_mut().zip(src) {
            let mut z = (v - mean) / sd;
            if let Some(max) = config.max_value {
                if z.is_finite() {
                    z = z.clamp(-max, max);
                }
            }
            *d = z;
        }
    }))
}

/// [`Normalizer`] wrapper around [`scale_genes`].
#[derive(Debug, Clone, Default)]
pub struct GeneScaler {
    pub config: ScaleConfig,
}

impl Normalizer for GeneScaler {
    fn normalize(&self, matrix: &ExpressionMatrix) -> Result<ExpressionMatrix> {
        scale_genes(matrix, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts() -> ExpressionMatrix {
        ExpressionMatrix::new(
            vec![vec![1.0, 0.0, 2.0], vec![3.0, 0.0, 2.0]],
            vec!["g1".into(), "g2".into()],
            vec!["c1".into(), "c2".into(), "c3".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_log_normalize() {
        let norm = LogNormalizer::new(LogNormalizeConfig { target_sum: 4.0 });
        let out = norm.normalize(&counts()).unwrap();
        // c1: total 4, factor 1 -> ln(2), ln(4)
        assert!((out.get(0, 0).unwrap() - 2.0_f64.ln()).abs() < 1e-12);
        assert!((out.get(1, 0).unwrap() - 4.0_f64.ln()).abs() < 1e-12);
        // c2 has zero total and stays at zero
        assert_eq!(out.get(0, 1), Some(0.0));
        assert_eq!(out.gene_names(), counts().gene_names());
    }

    #[test]
    fn test_log_normalize_bad_target() {
        let norm = LogNormalizer::new(LogNormalizeConfig { target_sum: 0.0 });
        assert!(norm.normalize(&counts()).is_err());
    }

    #[test]
    fn test_scale_genes() {
        let m = ExpressionMatrix::new(
            vec![vec![1.0, 2.0, 3.0]],
            vec!["g1".into()],
            vec!["c1".into(), "c2".into(), "c3".into()],
        )
        .unwrap();
        let out = scale_genes(&m, &ScaleConfig::default()).unwrap();
        // mean 2, sample sd 1
        assert_eq!(out.row(0), Some(&[-1.0, 0.0, 1.0][..]));
    }

    #[test]
    fn test_scale_constant_gene_is_non_finite() {
        let m = ExpressionMatrix::new(
            vec![vec![5.0, 5.0]],
            vec!["g1".into()],
            vec!["c1".into(), "c2".into()],
        )
        .unwrap();
        let out = scale_genes(&m, &ScaleConfig::default()).unwrap();
        assert!(out.row(0).unwrap().iter().all(|v| !v.is_finite()));
    }

    #[test]
    fn test_scale_ignores_non_finite_in_moments() {
        let m = ExpressionMatrix::new(
            vec![vec![1.0, f64::NAN, 3.0]],
            vec!["g1".into()],
            vec!["c1".into(), "c2".into(), "c3".into()],
        )
        .unwrap();
        let out = scale_genes(&m, &ScaleConfig::default()).unwrap();
        let sd = 2.0_f64.sqrt();
        assert!((out.get(0, 0).unwrap() + 1.0 / sd).abs() < 1e-12);
        assert!(out.get(0, 1).unwrap().is_nan());
        assert!((out.get(0, 2).unwrap() - 1.0 / sd).abs() < 1e-12);
    }

    #[test]
    fn test_scale_clip() {
        let m = ExpressionMatrix::new(
            vec![vec![0.0, 0.0, 0.0, 0.0, 10.0]],
            vec!["g1".into()],
            vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
        )
        .unwrap();
        let config = ScaleConfig {
            max_value: Some(1.0),
            ..Default::default()
        };
        let out = scale_genes(&m, &config).unwrap();
        assert_eq!(out.get(0, 4), Some(1.0));
        assert!(out.row(0).unwrap().iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_scale_bad_clip() {
        let config = ScaleConfig {
            max_value: Some(-1.0),
            ..Default::default()
        };
        assert!(scale_genes(&counts(), &config).is_err());
    }

    #[test]
    fn test_gene_scaler_is_normalizer() {
        let scaler: Box<dyn Normalizer> = Box::new(GeneScaler::default());
        let out = scaler.normalize(&counts()).unwrap();
        assert_eq!(out.shape(), (2, 3));
    }
}
