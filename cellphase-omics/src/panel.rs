//! Marker gene panel and classifier label set.
//!
//! Both records are loaded once per run and shared read-only (usually behind
//! an `Arc`). Their order is significant: the panel order is the classifier's
//! input feature order, the label order is the index-to-label mapping of the
//! classifier's output.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use cellphase_core::{Annotated, CellphaseError, Result, Summarizable};

/// Label emitted when the arg-max class is not trusted.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Class labels of the reference cell-cycle model, in output order.
pub const DEFAULT_CLASS_LABELS: [&str; 7] = [
    "Neural G0",
    "G1",
    "Late G1",
    "S",
    "S/G2",
    "G2/M",
    "M/Early G1",
];

/// Organism whose gene identifiers the input matrix uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Species {
    #[default]
    Human,
    Mouse,
}

impl Species {
    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Human => "human",
            Species::Mouse => "mouse",
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Species {
    type Err = CellphaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" => Ok(Species::Human),
            "mouse" => Ok(Species::Mouse),
            other => Err(CellphaseError::InvalidInput(format!(
                "unknown species '{other}' (expected human or mouse)"
            ))),
        }
    }
}

/// Gene identifier scheme used for the input matrix row keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum GeneIdScheme {
    #[default]
    Ensembl,
    Symbol,
}

impl GeneIdScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeneIdScheme::Ensembl => "ensembl",
            GeneIdScheme::Symbol => "symbol",
        }
    }
}

impl fmt::Display for GeneIdScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeneIdScheme {
    type Err = CellphaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ensembl" => Ok(GeneIdScheme::Ensembl),
            "symbol" => Ok(GeneIdScheme::Symbol),
            other => Err(CellphaseError::InvalidInput(format!(
                "unknown gene identifier scheme '{other}' (expected ensembl or symbol)"
            ))),
        }
    }
}

/// Annotation-table column holding the identifiers for a species/scheme pair,
/// e.g. `human_ensembl`.
pub fn identifier_column(species: Species, scheme: GeneIdScheme) -> String {
    format!("{species}_{scheme}")
}

// ── ClassLabelSet ──────────────────────────────────────────────────────────

/// Ordered class names matching the classifier's output dimensionality.
///
/// Labels are exact strings: they are never trimmed, case-folded or
/// sanitized, so names such as `S/G2` survive any round trip untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabelSet {
    labels: Vec<String>,
}

impl ClassLabelSet {
    /// Build a label set. Labels must be non-empty, unique and must not
    /// collide with [`UNKNOWN_LABEL`].
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(CellphaseError::InvalidInput(
                "class label set must not be empty".into(),
            ));
        }
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if label.is_empty() {
                return Err(CellphaseError::InvalidInput(
                    "class labels must not be empty strings".into(),
                ));
            }
            if label == UNKNOWN_LABEL {
                return Err(CellphaseError::InvalidInput(format!(
                    "'{UNKNOWN_LABEL}' is reserved and cannot be a class label"
                )));
            }
            if !seen.insert(label.as_str()) {
                return Err(CellphaseError::InvalidInput(format!(
                    "duplicate class label '{label}'"
                )));
            }
        }
        Ok(Self { labels })
    }

    /// The reference model's seven cell-cycle states.
    pub fn cell_cycle() -> Self {
        Self {
            labels: DEFAULT_CLASS_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Read a single-column label list. With `has_header` the first record
    /// is skipped; otherwise every non-empty line is a label.
    pub fn from_reader<R: Read>(reader: R, has_header: bool) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(has_header)
            .flexible(true)
            .from_reader(reader);

        let mut labels = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| CellphaseError::Parse(e.to_string()))?;
            match record.get(0) {
                Some(field) if !field.is_empty() => labels.push(field.to_string()),
                _ => {}
            }
        }
        Self::new(labels)
    }

    /// Read a single-column label list from a file.
    pub fn from_path(path: impl AsRef<Path>, has_header: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            CellphaseError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        Self::from_reader(file, has_header)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Index of a label, matched exactly.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl Summarizable for ClassLabelSet {
    fn summary(&self) -> String {
        format!("ClassLabelSet: {} classes", self.labels.len())
    }
}

// ── MarkerPanel ────────────────────────────────────────────────────────────

/// Ordered marker genes forming the classifier's input feature vector.
#[derive(Debug, Clone)]
pub struct MarkerPanel {
    name: String,
    source: Option<(Species, GeneIdScheme)>,
    genes: Vec<String>,
    index: HashMap<String, usize>,
}

impl MarkerPanel {
    /// Build a panel from an ordered gene list. Genes must be non-empty and
    /// unique.
    pub fn new(genes: Vec<String>) -> Result<Self> {
        Self::build("custom".into(), None, genes)
    }

    /// Build a panel selected from an annotation table column.
    pub fn for_source(species: Species, scheme: GeneIdScheme, genes: Vec<String>) -> Result<Self> {
        Self::build(
            identifier_column(species, scheme),
            Some((species, scheme)),
            genes,
        )
    }

    fn build(
        name: String,
        source: Option<(Species, GeneIdScheme)>,
        genes: Vec<String>,
    ) -> Result<Self> {
        if genes.is_empty() {
            return Err(CellphaseError::InvalidInput(
                "marker panel must contain at least one gene".into(),
            ));
        }
        let mut index = HashMap::with_capacity(genes.len());
        for (i, gene) in genes.iter().enumerate() {
            if gene.is_empty() {
                return Err(CellphaseError::InvalidInput(format!(
                    "marker panel entry {i} is an empty identifier"
                )));
            }
            if index.insert(gene.clone(), i).is_some() {
                return Err(CellphaseError::InvalidInput(format!(
                    "duplicate marker gene '{gene}'"
                )));
            }
        }
        Ok(Self {
            name,
            source,
            genes,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Genes in panel order.
    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    /// Panel position of a gene.
    pub fn position(&self, gene: &str) -> Option<usize> {
        self.index.get(gene).copied()
    }

    pub fn contains(&self, gene: &str) -> bool {
        self.index.contains_key(gene)
    }

    /// Species and identifier scheme this panel was selected for, if any.
    pub fn source(&self) -> Option<(Species, GeneIdScheme)> {
        self.source
    }
}

impl Annotated for MarkerPanel {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Summarizable for MarkerPanel {
    fn summary(&self) -> String {
        format!("MarkerPanel ({}): {} genes", self.name, self.genes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_species_parse() {
        assert_eq!("human".parse::<Species>().unwrap(), Species::Human);
        assert_eq!(" Mouse ".parse::<Species>().unwrap(), Species::Mouse);
        assert!("zebrafish".parse::<Species>().is_err());
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!("ENSEMBL".parse::<GeneIdScheme>().unwrap(), GeneIdScheme::Ensembl);
        assert_eq!("symbol".parse::<GeneIdScheme>().unwrap(), GeneIdScheme::Symbol);
        assert!("entrez".parse::<GeneIdScheme>().is_err());
    }

    #[test]
    fn test_identifier_column() {
        assert_eq!(
            identifier_column(Species::Mouse, GeneIdScheme::Symbol),
            "mouse_symbol"
        );
    }

    #[test]
    fn test_label_set_validation() {
        assert!(ClassLabelSet::new(vec![]).is_err());
        assert!(ClassLabelSet::new(strings(&["A", "A"])).is_err());
        assert!(ClassLabelSet::new(strings(&["A", "Unknown"])).is_err());
        assert!(ClassLabelSet::new(strings(&["A", ""])).is_err());
        let set = ClassLabelSet::new(strings(&["A", "B"])).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.position("B"), Some(1));
    }

    #[test]
    fn test_cell_cycle_labels() {
        let set = ClassLabelSet::cell_cycle();
        assert_eq!(set.len(), 7);
        assert_eq!(set.get(0), Some("Neural G0"));
        assert_eq!(set.position("S/G2"), Some(4));
    }

    #[test]
    fn test_label_set_from_reader() {
        let text = "x\nNeural G0\nG1\nS/G2\n\n";
        let set = ClassLabelSet::from_reader(text.as_bytes(), true).unwrap();
        assert_eq!(set.labels(), &["Neural G0", "G1", "S/G2"]);
    }

    #[test]
    fn test_label_set_without_header() {
        let set = ClassLabelSet::from_reader("A\nB\nC\n".as_bytes(), false).unwrap();
        assert_eq!(set.labels(), &["A", "B", "C"]);
    }

    #[test]
    fn test_header_like_first_label_is_kept() {
        let set = ClassLabelSet::from_reader("label\nx\nS\n".as_bytes(), false).unwrap();
        assert_eq!(set.labels(), &["label", "x", "S"]);

        let set = ClassLabelSet::from_reader("label\nx\nS\n".as_bytes(), true).unwrap();
        assert_eq!(set.labels(), &["x", "S"]);
    }

    #[test]
    fn test_label_set_from_missing_file() {
        assert!(ClassLabelSet::from_path("/nonexistent/labels.csv", false).is_err());
    }

    #[test]
    fn test_panel() {
        let panel = MarkerPanel::new(strings(&["g1", "g2", "g3"])).unwrap();
        assert_eq!(panel.len(), 3);
        assert_eq!(panel.position("g3"), Some(2));
        assert!(!panel.contains("g4"));
        assert_eq!(panel.name(), "custom");
        assert_eq!(panel.summary(), "MarkerPanel (custom): 3 genes");
    }

    #[test]
    fn test_panel_validation() {
        assert!(MarkerPanel::new(vec![]).is_err());
        assert!(MarkerPanel::new(strings(&["g1", "g1"])).is_err());
        assert!(MarkerPanel::new(strings(&["g1", ""])).is_err());
    }

    #[test]
    fn test_panel_for_source() {
        let panel =
            MarkerPanel::for_source(Species::Human, GeneIdScheme::Symbol, strings(&["CCNB1"]))
                .unwrap();
        assert_eq!(panel.name(), "human_symbol");
        assert_eq!(panel.source(), Some((Species::Human, GeneIdScheme::Symbol)));
    }
}
