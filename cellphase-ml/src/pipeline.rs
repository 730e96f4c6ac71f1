//! End-to-end cell-cycle state prediction.
//!
//! ```text
//! expression ─▶ [normalize] ─▶ restrict to panel ─▶ scale ─▶ align ─▶ classify ─▶ decide
//! ```
//!
//! [`Pipeline::predict`] runs the whole chain and invokes the classifier once
//! per cell. [`Pipeline::adjust_threshold`] and [`Pipeline::sweep`] re-decide
//! an existing [`ProbabilityTable`] without touching the classifier.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cellphase_core::{CellphaseError, Result, Summarizable};
use cellphase_omics::{
    module_scores, scale_genes, AlignmentReport, ClassLabelSet, ExpressionMatrix,
    FeatureAligner, GeneIdScheme, LogNormalizer, MarkerPanel, ModuleGenes, ModuleScore,
    Normalizer, ScaleConfig, Species,
};
use tracing::{info, warn};

use crate::classifier::{check_dimensions, Classifier};
use crate::decision::{CollapseMap, DecisionEngine, StateAssignment, Threshold};
use crate::inference::{classify_matrix, ProbabilityTable};
use crate::sweep::{SweepConfig, ThresholdSweep};

// ── Configuration ──────────────────────────────────────────────────────────

/// Which expression layer of the caller's dataset to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Assay {
    /// Raw RNA counts.
    Rna,
    /// Variance-stabilized (SCT) values.
    #[default]
    Sct,
    /// Raw spatial counts.
    Spatial,
}

impl fmt::Display for Assay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assay::Rna => write!(f, "RNA"),
            Assay::Sct => write!(f, "SCT"),
            Assay::Spatial => write!(f, "Spatial"),
        }
    }
}

impl FromStr for Assay {
    type Err = CellphaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rna" => Ok(Assay::Rna),
            "sct" => Ok(Assay::Sct),
            "spatial" => Ok(Assay::Spatial),
            other => Err(CellphaseError::InvalidInput(format!(
                "unknown assay '{other}' (expected RNA, SCT or Spatial)"
            ))),
        }
    }
}

/// Explicit parameters of one prediction run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PredictConfig {
    /// Minimum arg-max probability for a call to be kept.
    pub threshold: Threshold,
    /// Report the quiescence and G1 classes separately instead of collapsed.
    pub include_g0: bool,
    /// Layer read when `renormalize` is false.
    pub assay: Assay,
    /// Organism of the input gene identifiers.
    pub species: Species,
    /// Identifier scheme of the input gene identifiers.
    pub gene_id: GeneIdScheme,
    /// Input is spatial; renormalization starts from the Spatial layer.
    pub spatial: bool,
    /// Re-run the upstream normalization on raw counts before alignment.
    pub renormalize: bool,
    /// Per-gene scaling applied to the panel genes before alignment.
    pub scale: ScaleConfig,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::DEFAULT,
            include_g0: false,
            assay: Assay::Sct,
            species: Species::Human,
            gene_id: GeneIdScheme::Ensembl,
            spatial: false,
            renormalize: true,
            scale: ScaleConfig::default(),
        }
    }
}

impl PredictConfig {
    /// Layer the run reads from.
    pub fn source_assay(&self) -> Assay {
        match (self.renormalize, self.spatial) {
            (true, true) => Assay::Spatial,
            (true, false) => Assay::Rna,
            (false, _) => self.assay,
        }
    }
}

/// Read access to the caller's per-assay expression layers.
pub trait AssayStore {
    fn expression(&self, assay: Assay) -> Option<&ExpressionMatrix>;
}

impl AssayStore for HashMap<Assay, ExpressionMatrix> {
    fn expression(&self, assay: Assay) -> Option<&ExpressionMatrix> {
        self.get(&assay)
    }
}

// ── Pipeline ───────────────────────────────────────────────────────────────

/// Result of a full prediction run.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub assignment: StateAssignment,
    pub alignment: AlignmentReport,
}

impl Prediction {
    /// The probability table, for later threshold adjustment or sweeps.
    pub fn probabilities(&self) -> &Arc<ProbabilityTable> {
        self.assignment.table()
    }
}

/// Marker panel, label set and classifier wired together.
pub struct Pipeline<C> {
    panel: Arc<MarkerPanel>,
    labels: Arc<ClassLabelSet>,
    classifier: C,
    aligner: FeatureAligner,
    engine: DecisionEngine,
    normalizer: Box<dyn Normalizer>,
}

impl<C: Classifier> Pipeline<C> {
    /// Wire a pipeline. Fails if the classifier declares dimensions that
    /// disagree with the panel or the label set.
    pub fn new(panel: Arc<MarkerPanel>, labels: Arc<ClassLabelSet>, classifier: C) -> Result<Self> {
        check_dimensions(&classifier, panel.len(), labels.len())?;
        Ok(Self {
            aligner: FeatureAligner::new(Arc::clone(&panel)),
            engine: DecisionEngine::new(Arc::clone(&labels))?,
            normalizer: Box::new(LogNormalizer::default()),
            panel,
            labels,
            classifier,
        })
    }

    /// Replace the collapse map used when `include_g0` is false.
    pub fn with_collapse(mut self, collapse: CollapseMap) -> Result<Self> {
        self.engine = DecisionEngine::with_collapse(Arc::clone(&self.labels), collapse)?;
        Ok(self)
    }

    /// Replace the normalizer applied when `renormalize` is set.
    pub fn with_normalizer(mut self, normalizer: Box<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn panel(&self) -> &MarkerPanel {
        &self.panel
    }

    pub fn labels(&self) -> &ClassLabelSet {
        &self.labels
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Predict a state for every cell of `expr`.
    ///
    /// With `renormalize` set, `expr` is treated as raw counts and passed
    /// through the normalizer first; otherwise it is used as normalized
    /// expression. Panel genes are then scaled per gene, aligned, classified
    /// and decided.
    pub fn predict(&self, expr: &ExpressionMatrix, config: &PredictConfig) -> Result<Prediction> {
        if expr.is_empty() {
            return Err(CellphaseError::InvalidInput(format!(
                "expression matrix is empty ({} genes \u{00d7} {} cells)",
                expr.n_genes(),
                expr.n_cells()
            )));
        }
        if let Some((species, scheme)) = self.panel.source() {
            if species != config.species || scheme != config.gene_id {
                warn!(
                    "panel was selected for {species}/{scheme} but the run is configured for {}/{}",
                    config.species, config.gene_id
                );
            }
        }
        info!(
            genes = expr.n_genes(),
            cells = expr.n_cells(),
            threshold = config.threshold.value(),
            "predicting cell-cycle states"
        );

        let scaled = self.prepare(expr, config)?;
        let (aligned, alignment) = self.aligner.align(&scaled)?;

        let table = Arc::new(classify_matrix(
            &self.classifier,
            &aligned,
            Arc::clone(&self.labels),
        )?);
        let assignment = self
            .engine
            .decide_table(&table, config.threshold, config.include_g0)?;
        info!("{}", assignment.summary());

        Ok(Prediction {
            assignment,
            alignment,
        })
    }

    /// Normalized, panel-restricted and scaled expression, ready to align.
    fn prepare(&self, expr: &ExpressionMatrix, config: &PredictConfig) -> Result<ExpressionMatrix> {
        let panel_genes = if config.renormalize {
            // Size factors need every gene, so normalize before restricting.
            let normalized = self.normalizer.normalize(expr)?;
            normalized.filter_genes(&self.aligner.common_gene_indices(&normalized))?
        } else {
            expr.filter_genes(&self.aligner.common_gene_indices(expr))?
        };
        scale_genes(&panel_genes, &config.scale)
    }

    /// Predict from a multi-assay dataset, reading the layer selected by
    /// [`PredictConfig::source_assay`].
    pub fn predict_dataset<S: AssayStore + ?Sized>(
        &self,
        store: &S,
        config: &PredictConfig,
    ) -> Result<Prediction> {
        let assay = config.source_assay();
        let expr = store.expression(assay).ok_or_else(|| {
            CellphaseError::InvalidInput(format!("dataset has no '{assay}' assay"))
        })?;
        self.predict(expr, config)
    }

    /// Re-decide an existing table at a new threshold/flag combination.
    ///
    /// Identical to the decision step of [`predict`](Self::predict) for the
    /// same inputs; the classifier is not invoked.
    pub fn adjust_threshold(
        &self,
        table: &Arc<ProbabilityTable>,
        threshold: Threshold,
        include_g0: bool,
    ) -> Result<StateAssignment> {
        self.engine.decide_table(table, threshold, include_g0)
    }

    /// Sweep thresholds over an existing table.
    pub fn sweep(&self, table: &Arc<ProbabilityTable>, config: &SweepConfig) -> Result<ThresholdSweep> {
        ThresholdSweep::run(&self.engine, table, config)
    }

    /// Per-state module scores of `expr` over the panel, after the same
    /// normalization and scaling as [`predict`](Self::predict).
    pub fn module_scores(
        &self,
        expr: &ExpressionMatrix,
        modules: &[ModuleGenes],
        config: &PredictConfig,
    ) -> Result<Vec<ModuleScore>> {
        let scaled = self.prepare(expr, config)?;
        let (aligned, report) = self.aligner.align(&scaled)?;
        module_scores(&aligned, &report, modules)
    }
}

impl<C> fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("panel", &self.panel.len())
            .field("labels", &self.labels.labels())
            .finish_non_exhaustive()
    }
}
