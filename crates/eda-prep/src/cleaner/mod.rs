//! Column renaming and value relabelling.
//!
//! Renames are applied first; relabel maps refer to columns by their new
//! names. Values without an entry in a map pass through unchanged.

pub(crate) mod sanitizers;

use crate::error::{PrepError, Result};
use crate::types::{ColumnData, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// What the normalizer changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizeReport {
    /// (old name, new name) in application order.
    pub renamed: Vec<(String, String)>,
    /// Relabelled cell count per column.
    pub relabelled: BTreeMap<String, usize>,
}

/// Renames columns and recodes labels under explicit mappings.
pub struct ColumnNormalizer;

impl ColumnNormalizer {
    /// Rename columns (old name → new name).
    ///
    /// Fails with a schema error if a source column is unknown, a target
    /// already exists, or two sources share a target. The input table is
    /// left untouched.
    pub fn rename(table: &Table, renames: &BTreeMap<String, String>) -> Result<Table> {
        let mut targets = HashSet::new();
        for (from, to) in renames {
            table.require(from)?;
            if from != to && table.has_column(to) {
                return Err(PrepError::Schema(format!(
                    "Cannot rename '{}' to '{}': column already exists",
                    from, to
                )));
            }
            if !targets.insert(to.as_str()) {
                return Err(PrepError::Schema(format!(
                    "More than one column renamed to '{}'",
                    to
                )));
            }
        }

        let mut renamed = table.clone();
        for (from, to) in renames {
            renamed.rename_column(from, to)?;
            debug!("Renamed column '{}' to '{}'", from, to);
        }
        Ok(renamed)
    }

    /// Replace listed labels per column. Returns the table and the number
    /// of changed cells per column.
    pub fn relabel(
        table: &Table,
        maps: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<(Table, BTreeMap<String, usize>)> {
        let mut relabelled = table.clone();
        let mut counts = BTreeMap::new();

        for (column, map) in maps {
            let kind = table.require(column)?;
            if !kind.is_text() {
                return Err(PrepError::Schema(format!(
                    "Cannot relabel {} column '{}'",
                    kind, column
                )));
            }
            let (values, changed) = sanitizers::relabel_values(table.text(column)?, map);
            relabelled.set_column(column, ColumnData::Text(values))?;
            debug!("Relabelled {} cells in '{}'", changed, column);
            counts.insert(column.clone(), changed);
        }

        Ok((relabelled, counts))
    }

    /// Rename, then relabel.
    pub fn apply(
        table: &Table,
        renames: &BTreeMap<String, String>,
        maps: &BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<(Table, NormalizeReport)> {
        let renamed = Self::rename(table, renames)?;
        let (relabelled, counts) = Self::relabel(&renamed, maps)?;

        let report = NormalizeReport {
            renamed: renames
                .iter()
                .filter(|(from, to)| from != to)
                .map(|(from, to)| (from.clone(), to.clone()))
                .collect(),
            relabelled: counts,
        };
        info!(
            "Column normalization: {} renamed, {} cells relabelled",
            report.renamed.len(),
            report.relabelled.values().sum::<usize>()
        );
        Ok((relabelled, report))
    }
}
