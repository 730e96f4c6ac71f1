//! Probability rows → discrete cell-cycle state labels.
//!
//! For every cell the [`DecisionEngine`] applies, in this order:
//!
//! 1. arg-max over the class probabilities (ties go to the first class in
//!    label order);
//! 2. the [`CollapseMap`], when fine-grained quiescence is not requested,
//!    relabeling the arg-max class only;
//! 3. the threshold override: if the pre-collapse arg-max probability is
//!    below the threshold the label becomes [`UNKNOWN_LABEL`].
//!
//! Collapsing therefore never changes which cells are Unknown. Full
//! prediction, threshold adjustment and the threshold sweep all go through
//! [`DecisionEngine::decide_table`].

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use cellphase_core::{CellphaseError, Result, Summarizable};
use cellphase_omics::{ClassLabelSet, UNKNOWN_LABEL};

use crate::inference::ProbabilityTable;

// ── Threshold ──────────────────────────────────────────────────────────────

/// Minimum arg-max probability for a call to be trusted, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "f64", into = "f64"))]
pub struct Threshold(pub(crate) f64);

impl Threshold {
    pub const DEFAULT: Threshold = Threshold(0.5);
    /// Threshold that never overrides a call.
    pub const NONE: Threshold = Threshold(0.0);

    pub fn new(value: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(CellphaseError::InvalidInput(format!(
                "threshold must lie in [0, 1], got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f64> for Threshold {
    type Error = CellphaseError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Threshold> for f64 {
    fn from(t: Threshold) -> f64 {
        t.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── CollapseMap ────────────────────────────────────────────────────────────

/// Many-to-one relabeling of the quiescence and G1 classes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CollapseMap {
    members: Vec<String>,
    merged: String,
}

impl CollapseMap {
    pub fn new(members: Vec<String>, merged: String) -> Result<Self> {
        if members.is_empty() {
            return Err(CellphaseError::InvalidInput(
                "collapse map needs at least one member class".into(),
            ));
        }
        if merged.is_empty() || merged == UNKNOWN_LABEL {
            return Err(CellphaseError::InvalidInput(format!(
                "'{merged}' cannot be used as the merged label"
            )));
        }
        if members.contains(&merged) {
            return Err(CellphaseError::InvalidInput(format!(
                "merged label '{merged}' must differ from the classes it replaces"
            )));
        }
        Ok(Self { members, merged })
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn merged(&self) -> &str {
        &self.merged
    }

    pub fn contains(&self, label: &str) -> bool {
        self.members.iter().any(|m| m == label)
    }

    /// The label after collapsing.
    pub fn apply<'a>(&'a self, label: &'a str) -> &'a str {
        if self.contains(label) {
            &self.merged
        } else {
            label
        }
    }
}

impl Default for CollapseMap {
    /// {Neural G0, G1, Late G1} → G0/G1.
    fn default() -> Self {
        Self {
            members: vec!["Neural G0".into(), "G1".into(), "Late G1".into()],
            merged: "G0/G1".into(),
        }
    }
}

// ── Label views ────────────────────────────────────────────────────────────

/// Declared output labels for one setting of the quiescence flag.
#[derive(Debug, Clone)]
struct LabelView {
    labels: Vec<String>,
    class_to_view: Vec<usize>,
    unknown: usize,
}

impl LabelView {
    fn full(classes: &ClassLabelSet) -> Self {
        let mut labels: Vec<String> = classes.labels().to_vec();
        let class_to_view = (0..labels.len()).collect();
        let unknown = labels.len();
        labels.push(UNKNOWN_LABEL.to_string());
        Self {
            labels,
            class_to_view,
            unknown,
        }
    }

    fn collapsed(classes: &ClassLabelSet, collapse: &CollapseMap) -> Self {
        let mut labels: Vec<String> = Vec::new();
        let mut class_to_view = Vec::with_capacity(classes.len());
        let mut merged_at = None;
        for class in classes.iter() {
            let idx = if collapse.contains(class) {
                *merged_at.get_or_insert_with(|| {
                    labels.push(collapse.merged().to_string());
                    labels.len() - 1
                })
            } else {
                labels.push(class.to_string());
                labels.len() - 1
            };
            class_to_view.push(idx);
        }
        let unknown = labels.len();
        labels.push(UNKNOWN_LABEL.to_string());
        Self {
            labels,
            class_to_view,
            unknown,
        }
    }
}

// ── Decision ───────────────────────────────────────────────────────────────

/// Outcome of the decision for one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Index of the arg-max class in the label set.
    pub argmax: usize,
    /// Probability of the arg-max class, before any collapsing.
    pub confidence: f64,
    /// Index of the emitted label in the view's declared labels.
    pub view_index: usize,
}

/// Stateless decision rule bound to a label set and a collapse map.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    classes: Arc<ClassLabelSet>,
    collapse: CollapseMap,
    full: LabelView,
    collapsed: LabelView,
}

impl DecisionEngine {
    /// Engine with the default collapse map.
    pub fn new(classes: Arc<ClassLabelSet>) -> Result<Self> {
        Self::with_collapse(classes, CollapseMap::default())
    }

    /// Engine with a custom collapse map. Collapse members absent from the
    /// label set are never matched; the merged label must not be a class.
    pub fn with_collapse(classes: Arc<ClassLabelSet>, collapse: CollapseMap) -> Result<Self> {
        if classes.position(collapse.merged()).is_some() {
            return Err(CellphaseError::InvalidInput(format!(
                "merged label '{}' collides with a class label",
                collapse.merged()
            )));
        }
        let full = LabelView::full(&classes);
        let collapsed = LabelView::collapsed(&classes, &collapse);
        Ok(Self {
            classes,
            collapse,
            full,
            collapsed,
        })
    }

    pub fn classes(&self) -> &ClassLabelSet {
        &self.classes
    }

    pub fn collapse_map(&self) -> &CollapseMap {
        &self.collapse
    }

    fn view(&self, include_g0: bool) -> &LabelView {
        if include_g0 {
            &self.full
        } else {
            &self.collapsed
        }
    }

    /// Every label the given view can emit, ending with [`UNKNOWN_LABEL`].
    pub fn declared_labels(&self, include_g0: bool) -> &[String] {
        &self.view(include_g0).labels
    }

    /// Decide one probability row. Values must be finite and non-negative.
    pub fn decide_row(&self, probs: &[f64], threshold: Threshold, include_g0: bool) -> Result<Decision> {
        if probs.len() != self.classes.len() {
            return Err(CellphaseError::ShapeMismatch {
                context: "probability row",
                expected: self.classes.len(),
                found: probs.len(),
            });
        }
        if let Some(p) = probs.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(CellphaseError::InvalidInput(format!(
                "invalid probability {p} in decision row"
            )));
        }

        let (argmax, confidence) = argmax_first(probs);
        let view = self.view(include_g0);
        let view_index = if confidence < threshold.value() {
            view.unknown
        } else {
            view.class_to_view[argmax]
        };

        Ok(Decision {
            argmax,
            confidence,
            view_index,
        })
    }

    /// Decide every cell of a table. The table is shared, not copied.
    pub fn decide_table(
        &self,
        table: &Arc<ProbabilityTable>,
        threshold: Threshold,
        include_g0: bool,
    ) -> Result<StateAssignment> {
        if table.labels() != self.classes.as_ref() {
            return Err(CellphaseError::InvalidInput(
                "probability table was built for a different class label set".into(),
            ));
        }
        let calls = table
            .rows()
            .map(|row| self.decide_row(row, threshold, include_g0).map(|d| d.view_index))
            .collect::<Result<Vec<usize>>>()?;

        Ok(StateAssignment {
            table: Arc::clone(table),
            labels: self.view(include_g0).labels.clone(),
            calls,
            threshold,
            include_g0,
        })
    }
}

/// Index and value of the maximum, keeping the first on ties.
fn argmax_first(values: &[f64]) -> (usize, f64) {
    let mut best = (0, values[0]);
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}

// ── StateAssignment ────────────────────────────────────────────────────────

/// One record of the caller-facing per-cell state table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellStateRecord {
    pub cell: String,
    pub state: String,
    /// Per-class probabilities, in class-label order.
    pub probabilities: Vec<f64>,
}

/// One label per cell, with the originating probabilities retained.
#[derive(Debug, Clone)]
pub struct StateAssignment {
    table: Arc<ProbabilityTable>,
    labels: Vec<String>,
    calls: Vec<usize>,
    threshold: Threshold,
    include_g0: bool,
}

impl StateAssignment {
    pub fn n_cells(&self) -> usize {
        self.calls.len()
    }

    pub fn cell_names(&self) -> &[String] {
        self.table.cell_names()
    }

    /// Label of one cell.
    pub fn label(&self, cell_idx: usize) -> Option<&str> {
        self.calls.get(cell_idx).map(|&v| self.labels[v].as_str())
    }

    /// Labels of all cells, in cell order.
    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.calls.iter().map(|&v| self.labels[v].as_str())
    }

    /// Probability row of one cell.
    pub fn probabilities(&self, cell_idx: usize) -> Option<&[f64]> {
        self.table.row(cell_idx)
    }

    pub fn table(&self) -> &Arc<ProbabilityTable> {
        &self.table
    }

    /// Declared labels of this view, ending with Unknown.
    pub fn declared_labels(&self) -> &[String] {
        &self.labels
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn include_g0(&self) -> bool {
        self.include_g0
    }

    /// Cell count per declared label, in declared order (zeros included).
    pub fn label_counts(&self) -> Vec<(&str, usize)> {
        let mut counts = vec![0usize; self.labels.len()];
        for &v in &self.calls {
            counts[v] += 1;
        }
        self.labels
            .iter()
            .map(String::as_str)
            .zip(counts)
            .collect()
    }

    /// Fraction of cells per declared label; sums to 1.
    pub fn label_frequencies(&self) -> Vec<(&str, f64)> {
        let n = self.n_cells() as f64;
        self.label_counts()
            .into_iter()
            .map(|(label, c)| (label, c as f64 / n))
            .collect()
    }

    /// Fraction of cells labeled Unknown.
    pub fn unknown_fraction(&self) -> f64 {
        let unknown = self.labels.len() - 1;
        self.calls.iter().filter(|&&v| v == unknown).count() as f64 / self.n_cells() as f64
    }

    /// Per-cell records for attaching to caller metadata by cell identifier.
    pub fn to_records(&self) -> Vec<CellStateRecord> {
        self.cell_names()
            .iter()
            .zip(self.states())
            .zip(self.table.rows())
            .map(|((cell, state), probs)| CellStateRecord {
                cell: cell.clone(),
                state: state.to_string(),
                probabilities: probs.to_vec(),
            })
            .collect()
    }

    /// Write the state table as CSV: `cell`, one column per class named by
    /// the exact label string, then `state`.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let csv_err = |e: csv::Error| CellphaseError::Other(format!("csv write: {e}"));

        let mut header = vec!["cell"];
        header.extend(self.table.labels().iter());
        header.push("state");
        wtr.write_record(&header).map_err(csv_err)?;

        for ((cell, state), probs) in self
            .cell_names()
            .iter()
            .zip(self.states())
            .zip(self.table.rows())
        {
            let mut record = Vec::with_capacity(probs.len() + 2);
            record.push(cell.clone());
            record.extend(probs.iter().map(|p| p.to_string()));
            record.push(state.to_string());
            wtr.write_record(&record).map_err(csv_err)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl Summarizable for StateAssignment {
    fn summary(&self) -> String {
        let counts: Vec<String> = self
            .label_counts()
            .into_iter()
            .filter(|(_, c)| *c > 0)
            .map(|(l, c)| format!("{l}={c}"))
            .collect();
        format!(
            "StateAssignment: {} cells at threshold {} ({})",
            self.n_cells(),
            self.threshold,
            counts.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Arc<ClassLabelSet> {
        Arc::new(ClassLabelSet::new(vec!["A".into(), "B".into(), "C".into()]).unwrap())
    }

    fn t(v: f64) -> Threshold {
        Threshold::new(v).unwrap()
    }

    fn cell_cycle_table(rows: Vec<Vec<f64>>) -> Arc<ProbabilityTable> {
        let cells = (0..rows.len()).map(|i| format!("cell{i}")).collect();
        Arc::new(
            ProbabilityTable::new(Arc::new(ClassLabelSet::cell_cycle()), cells, rows).unwrap(),
        )
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(Threshold::new(-0.1).is_err());
        assert!(Threshold::new(1.1).is_err());
        assert!(Threshold::new(f64::NAN).is_err());
        assert_eq!(Threshold::default().value(), 0.5);
        assert_eq!(Threshold::try_from(1.0).unwrap().value(), 1.0);
    }

    #[test]
    fn test_collapse_map_validation() {
        assert!(CollapseMap::new(vec![], "X".into()).is_err());
        assert!(CollapseMap::new(vec!["A".into()], "A".into()).is_err());
        assert!(CollapseMap::new(vec!["A".into()], UNKNOWN_LABEL.into()).is_err());
        let map = CollapseMap::new(vec!["A".into(), "B".into()], "AB".into()).unwrap();
        assert_eq!(map.apply("A"), "AB");
        assert_eq!(map.apply("C"), "C");
    }

    #[test]
    fn test_merged_label_collision() {
        let map = CollapseMap::new(vec!["A".into()], "B".into()).unwrap();
        assert!(DecisionEngine::with_collapse(abc(), map).is_err());
    }

    #[test]
    fn test_argmax_and_threshold() {
        let engine = DecisionEngine::new(abc()).unwrap();
        let probs = [0.2, 0.7, 0.1];

        let d = engine.decide_row(&probs, t(0.5), true).unwrap();
        assert_eq!(d.argmax, 1);
        assert_eq!(engine.declared_labels(true)[d.view_index], "B");

        let d = engine.decide_row(&probs, t(0.8), true).unwrap();
        assert_eq!(engine.declared_labels(true)[d.view_index], UNKNOWN_LABEL);
    }

    #[test]
    fn test_confidence_equal_to_threshold_is_kept() {
        let engine = DecisionEngine::new(abc()).unwrap();
        let d = engine.decide_row(&[0.5, 0.25, 0.25], t(0.5), true).unwrap();
        assert_eq!(engine.declared_labels(true)[d.view_index], "A");
    }

    #[test]
    fn test_tie_goes_to_first_class() {
        let engine = DecisionEngine::new(abc()).unwrap();
        let d = engine.decide_row(&[0.1, 0.45, 0.45], Threshold::NONE, true).unwrap();
        assert_eq!(d.argmax, 1);
        let d = engine.decide_row(&[1.0 / 3.0; 3], Threshold::NONE, true).unwrap();
        assert_eq!(d.argmax, 0);
    }

    #[test]
    fn test_row_width_checked() {
        let engine = DecisionEngine::new(abc()).unwrap();
        assert!(engine.decide_row(&[0.5, 0.5], t(0.5), true).is_err());
    }

    #[test]
    fn test_non_finite_row_rejected() {
        let engine = DecisionEngine::new(abc()).unwrap();
        assert!(matches!(
            engine.decide_row(&[f64::NAN, 0.9, 0.1], t(0.5), true),
            Err(CellphaseError::InvalidInput(_))
        ));
        assert!(engine.decide_row(&[0.2, f64::INFINITY, 0.1], t(0.5), true).is_err());
        assert!(engine.decide_row(&[-0.1, 0.9, 0.2], Threshold::NONE, false).is_err());
    }

    #[test]
    fn test_collapsed_view_labels() {
        let engine = DecisionEngine::new(Arc::new(ClassLabelSet::cell_cycle())).unwrap();
        assert_eq!(
            engine.declared_labels(false),
            &["G0/G1", "S", "S/G2", "G2/M", "M/Early G1", "Unknown"]
        );
        assert_eq!(engine.declared_labels(true).len(), 8);
    }

    #[test]
    fn test_collapse_never_rescues_low_confidence() {
        // arg-max is the quiescence class at 0.4
        let table = cell_cycle_table(vec![vec![0.4, 0.3, 0.1, 0.05, 0.05, 0.05, 0.05]]);
        let engine = DecisionEngine::new(table.shared_labels()).unwrap();

        let fine = engine.decide_table(&table, t(0.5), true).unwrap();
        assert_eq!(fine.label(0), Some(UNKNOWN_LABEL));

        // G0 + G1 together hold 0.7, but only the pre-collapse 0.4 counts
        let coarse = engine.decide_table(&table, t(0.5), false).unwrap();
        assert_eq!(coarse.label(0), Some(UNKNOWN_LABEL));
    }

    #[test]
    fn test_collapse_applies_to_label_only() {
        let table = cell_cycle_table(vec![
            vec![0.1, 0.1, 0.6, 0.05, 0.05, 0.05, 0.05],
            vec![0.0, 0.0, 0.0, 0.9, 0.1, 0.0, 0.0],
        ]);
        let engine = DecisionEngine::new(table.shared_labels()).unwrap();

        let fine = engine.decide_table(&table, t(0.5), true).unwrap();
        assert_eq!(fine.states().collect::<Vec<_>>(), vec!["Late G1", "S"]);

        let coarse = engine.decide_table(&table, t(0.5), false).unwrap();
        assert_eq!(coarse.states().collect::<Vec<_>>(), vec!["G0/G1", "S"]);
        assert_eq!(coarse.probabilities(0), table.row(0));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let table = cell_cycle_table(vec![
            vec![0.2, 0.2, 0.2, 0.1, 0.1, 0.1, 0.1],
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        ]);
        let engine = DecisionEngine::new(table.shared_labels()).unwrap();
        let a = engine.decide_table(&table, t(0.3), false).unwrap();
        let b = engine.decide_table(&table, t(0.3), false).unwrap();
        assert_eq!(a.states().collect::<Vec<_>>(), b.states().collect::<Vec<_>>());
    }

    #[test]
    fn test_unknown_fraction_monotone_in_threshold() {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| {
                let top = 0.3 + 0.035 * i as f64;
                let rest = (1.0 - top) / 6.0;
                let mut row = vec![rest; 7];
                row[i % 7] = top;
                row
            })
            .collect();
        let table = cell_cycle_table(rows);
        let engine = DecisionEngine::new(table.shared_labels()).unwrap();

        let mut previous = 0.0;
        for step in 0..=10 {
            let threshold = t(step as f64 / 10.0);
            let frac = engine
                .decide_table(&table, threshold, false)
                .unwrap()
                .unknown_fraction();
            assert!(frac >= previous);
            previous = frac;
        }
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn test_label_counts_include_zeros() {
        let table = Arc::new(
            ProbabilityTable::new(abc(), vec!["c1".into()], vec![vec![0.2, 0.7, 0.1]]).unwrap(),
        );
        let engine = DecisionEngine::new(abc()).unwrap();
        let s = engine.decide_table(&table, t(0.5), true).unwrap();
        assert_eq!(
            s.label_counts(),
            vec![("A", 0), ("B", 1), ("C", 0), (UNKNOWN_LABEL, 0)]
        );
        assert_eq!(s.summary(), "StateAssignment: 1 cells at threshold 0.5 (B=1)");
    }

    #[test]
    fn test_foreign_table_rejected() {
        let table = cell_cycle_table(vec![vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]]);
        let engine = DecisionEngine::new(abc()).unwrap();
        assert!(engine.decide_table(&table, t(0.5), true).is_err());
    }

    #[test]
    fn test_records_and_csv() {
        let labels = Arc::new(ClassLabelSet::new(vec!["S".into(), "S/G2".into()]).unwrap());
        let table = Arc::new(
            ProbabilityTable::new(
                Arc::clone(&labels),
                vec!["c1".into(), "c2".into()],
                vec![vec![0.9, 0.1], vec![0.5, 0.5]],
            )
            .unwrap(),
        );
        let engine = DecisionEngine::new(labels).unwrap();
        let s = engine.decide_table(&table, t(0.6), true).unwrap();

        let records = s.to_records();
        assert_eq!(records[0].cell, "c1");
        assert_eq!(records[0].state, "S");
        assert_eq!(records[1].state, UNKNOWN_LABEL);
        assert_eq!(records[1].probabilities, vec![0.5, 0.5]);

        let mut out = Vec::new();
        s.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "cell,S,S/G2,state\nc1,0.9,0.1,S\nc2,0.5,0.5,Unknown\n"
        );
    }
}
