//! Label distribution as a function of the confidence threshold.
//!
//! The sweep re-decides a fixed [`ProbabilityTable`] at each candidate
//! threshold through [`DecisionEngine::decide_table`], so its frequencies are
//! exactly those of a direct call at the same threshold. The classifier is
//! never invoked.

use std::sync::Arc;

use cellphase_core::{CellphaseError, Result, Summarizable};
use tracing::debug;

use crate::decision::{DecisionEngine, Threshold};
use crate::inference::ProbabilityTable;

/// Thresholds and view for a sweep.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SweepConfig {
    /// Candidate thresholds, in output order.
    pub thresholds: Vec<Threshold>,
    /// Keep the fine-grained quiescence classes instead of the collapsed view.
    pub include_g0: bool,
}

impl Default for SweepConfig {
    /// 0.0, 0.1, …, 0.9 over the collapsed view.
    fn default() -> Self {
        Self {
            thresholds: (0..10).map(|i| Threshold(i as f64 / 10.0)).collect(),
            include_g0: false,
        }
    }
}

impl SweepConfig {
    /// Build from raw values, rejecting any outside `[0, 1]`.
    pub fn from_values(values: &[f64], include_g0: bool) -> Result<Self> {
        Ok(Self {
            thresholds: values
                .iter()
                .map(|&v| Threshold::new(v))
                .collect::<Result<Vec<_>>>()?,
            include_g0,
        })
    }
}

/// Frequency of one label at one threshold.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SweepRow {
    pub label: String,
    pub threshold: f64,
    pub frequency: f64,
}

/// Long-form sweep result: one row per (label, threshold) pair.
#[derive(Debug, Clone)]
pub struct ThresholdSweep {
    labels: Vec<String>,
    thresholds: Vec<Threshold>,
    rows: Vec<SweepRow>,
}

impl ThresholdSweep {
    /// Run the sweep.
    ///
    /// Rows are grouped by threshold, in the configured order, and within a
    /// threshold follow the view's declared labels. Labels absent at a
    /// threshold appear with frequency 0.
    pub fn run(
        engine: &DecisionEngine,
        table: &Arc<ProbabilityTable>,
        config: &SweepConfig,
    ) -> Result<Self> {
        if config.thresholds.is_empty() {
            return Err(CellphaseError::InvalidInput(
                "threshold sweep needs at least one threshold".into(),
            ));
        }

        let at_threshold = |&threshold: &Threshold| -> Result<Vec<SweepRow>> {
            let assignment = engine.decide_table(table, threshold, config.include_g0)?;
            Ok(assignment
                .label_frequencies()
                .into_iter()
                .map(|(label, frequency)| SweepRow {
                    label: label.to_string(),
                    threshold: threshold.value(),
                    frequency,
                })
                .collect())
        };

        #[cfg(feature = "parallel")]
        let groups = {
            use rayon::prelude::*;
            config
                .thresholds
                .par_iter()
                .map(at_threshold)
                .collect::<Result<Vec<_>>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let groups = config
            .thresholds
            .iter()
            .map(at_threshold)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            thresholds = config.thresholds.len(),
            cells = table.n_cells(),
            "threshold sweep complete"
        );

        Ok(Self {
            labels: engine.declared_labels(config.include_g0).to_vec(),
            thresholds: config.thresholds.clone(),
            rows: groups.into_iter().flatten().collect(),
        })
    }

    pub fn rows(&self) -> &[SweepRow] {
        &self.rows
    }

    /// Declared labels of the swept view.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    /// Frequency of `label` at the `i`-th configured threshold.
    pub fn frequency_at(&self, threshold_idx: usize, label: &str) -> Option<f64> {
        let j = self.labels.iter().position(|l| l == label)?;
        self.rows
            .get(threshold_idx * self.labels.len() + j)
            .map(|r| r.frequency)
    }

    /// Frequency of `label` at the first configured threshold equal to `threshold`.
    pub fn frequency(&self, threshold: f64, label: &str) -> Option<f64> {
        let i = self.thresholds.iter().position(|t| t.value() == threshold)?;
        self.frequency_at(i, label)
    }

    /// Rows of the first configured threshold of 0, the distribution before
    /// any override.
    pub fn baseline(&self) -> Option<&[SweepRow]> {
        let i = self.thresholds.iter().position(|t| t.value() == 0.0)?;
        let n = self.labels.len();
        self.rows.get(i * n..(i + 1) * n)
    }
}

impl Summarizable for ThresholdSweep {
    fn summary(&self) -> String {
        format!(
            "ThresholdSweep: {} thresholds \u{00d7} {} labels",
            self.thresholds.len(),
            self.labels.len()
        )
    }
}
