//! Gene annotation table backing the marker panel.
//!
//! The table is a CSV with one row per marker gene. Identifier columns are
//! named `{species}_{scheme}` (e.g. `human_ensembl`, `mouse_symbol`); every
//! other column is a boolean membership flag for one cell-cycle state gene
//! module. Row order defines the panel order.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use cellphase_core::{CellphaseError, Result, Summarizable};

use crate::panel::{identifier_column, GeneIdScheme, MarkerPanel, Species};

const SPECIES: [Species; 2] = [Species::Human, Species::Mouse];
const SCHEMES: [GeneIdScheme; 2] = [GeneIdScheme::Ensembl, GeneIdScheme::Symbol];

/// Genes flagged as members of one state module.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleGenes {
    pub name: String,
    pub genes: Vec<String>,
}

/// Parsed gene-by-annotation table.
#[derive(Debug, Clone)]
pub struct AnnotationTable {
    n_rows: usize,
    identifiers: HashMap<String, Vec<String>>,
    modules: Vec<(String, Vec<bool>)>,
}

impl AnnotationTable {
    /// Parse the table from CSV. At least one identifier column is required.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| CellphaseError::Parse(e.to_string()))?
            .clone();

        let id_columns: Vec<String> = SPECIES
            .iter()
            .flat_map(|&sp| SCHEMES.iter().map(move |&sc| identifier_column(sp, sc)))
            .collect();

        let mut identifiers: HashMap<String, Vec<String>> = HashMap::new();
        let mut modules: Vec<(String, Vec<bool>)> = Vec::new();
        let mut layout = Vec::with_capacity(headers.len());
        for header in headers.iter() {
            if id_columns.iter().any(|c| c == header) {
                identifiers.insert(header.to_string(), Vec::new());
                layout.push(Column::Identifier(header.to_string()));
            } else if header.is_empty() {
                // Unnamed leading row-name column written by some exporters.
                layout.push(Column::Ignored);
            } else {
                modules.push((header.to_string(), Vec::new()));
                layout.push(Column::Module(modules.len() - 1));
            }
        }

        if identifiers.is_empty() {
            return Err(CellphaseError::Parse(format!(
                "annotation table has no identifier column (expected one of {})",
                id_columns.join(", ")
            )));
        }

        let mut n_rows = 0;
        for (row, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| CellphaseError::Parse(e.to_string()))?;
            for (column, field) in layout.iter().zip(record.iter()) {
                match column {
                    Column::Identifier(name) => {
                        if let Some(ids) = identifiers.get_mut(name) {
                            ids.push(field.trim().to_string());
                        }
                    }
                    Column::Module(m) => {
                        let flag = parse_flag(field).ok_or_else(|| {
                            CellphaseError::Parse(format!(
                                "row {}: module column '{}' has non-boolean value '{field}'",
                                row + 1,
                                modules[*m].0
                            ))
                        })?;
                        modules[*m].1.push(flag);
                    }
                    Column::Ignored => {}
                }
            }
            n_rows += 1;
        }

        Ok(Self {
            n_rows,
            identifiers,
            modules,
        })
    }

    /// Parse the table from a CSV file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            CellphaseError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        Self::from_reader(file)
    }

    /// Number of genes (rows).
    pub fn n_genes(&self) -> usize {
        self.n_rows
    }

    /// Module column names, in file order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Identifier column for a species/scheme pair. Every row must name a
    /// gene; a blank entry would shift the panel against the classifier input.
    fn identifiers(&self, species: Species, scheme: GeneIdScheme) -> Result<&[String]> {
        let column = identifier_column(species, scheme);
        let ids = self.identifiers.get(&column).ok_or_else(|| {
            CellphaseError::InvalidInput(format!(
                "annotation table has no '{column}' identifier column"
            ))
        })?;
        if let Some(row) = ids.iter().position(|id| id.is_empty()) {
            return Err(CellphaseError::Parse(format!(
                "annotation row {} has a blank '{column}' identifier",
                row + 1
            )));
        }
        Ok(ids)
    }

    /// Select the marker panel for a species/identifier-scheme pair.
    pub fn panel(&self, species: Species, scheme: GeneIdScheme) -> Result<MarkerPanel> {
        let ids = self.identifiers(species, scheme)?;
        MarkerPanel::for_source(species, scheme, ids.to_vec())
    }

    /// Per-module gene lists for a species/identifier-scheme pair.
    pub fn module_genes(&self, species: Species, scheme: GeneIdScheme) -> Result<Vec<ModuleGenes>> {
        let ids = self.identifiers(species, scheme)?;
        Ok(self
            .modules
            .iter()
            .map(|(name, flags)| ModuleGenes {
                name: name.clone(),
                genes: ids
                    .iter()
                    .zip(flags)
                    .filter(|(_, flag)| **flag)
                    .map(|(id, _)| id.clone())
                    .collect(),
            })
            .collect())
    }
}

impl Summarizable for AnnotationTable {
    fn summary(&self) -> String {
        format!(
            "AnnotationTable: {} genes, {} identifier columns, {} modules",
            self.n_rows,
            self.identifiers.len(),
            self.modules.len()
        )
    }
}

enum Column {
    Identifier(String),
    Module(usize),
    Ignored,
}

fn parse_flag(field: &str) -> Option<bool> {
    match field.trim() {
        "" | "0" | "F" | "f" | "FALSE" | "False" | "false" | "NA" => Some(false),
        "1" | "T" | "t" | "TRUE" | "True" | "true" => Some(true),
        _ => None,
    }
}
