//! Descriptive statistics over a [`Table`].
//!
//! Everything here returns plain data (summaries, counts, matrices) for a
//! presentation layer to consume:
//! - Numeric summaries (count, mean, quartiles)
//! - Value counts and distinct counts, optionally ignoring placeholder labels
//! - Cross-tabulations and grouped means / distinct counts
//! - Pearson correlation matrices

mod statistics;

pub use statistics::NumericSummary;

use crate::config::{GroupSpec, StatisticsConfig};
use crate::error::{PrepError, Result};
use crate::types::{ColumnKind, Table};
use crate::utils::format_number;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinctCount {
    pub column: String,
    pub distinct: usize,
}

/// Row-label × column-label counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTab {
    pub row_column: String,
    pub col_column: String,
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
    /// `counts[i][j]` is the number of rows with `row_labels[i]` and
    /// `col_labels[j]`.
    pub counts: Vec<Vec<usize>>,
}

impl CrossTab {
    pub fn get(&self, row: &str, col: &str) -> Option<usize> {
        let i = self.row_labels.iter().position(|l| l == row)?;
        let j = self.col_labels.iter().position(|l| l == col)?;
        Some(self.counts[i][j])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMean {
    pub group: String,
    pub count: usize,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDistinct {
    pub group: String,
    pub distinct: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.values[i][j]
    }
}

/// Dataset-level summary attached to run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub columns: usize,
    pub kinds: BTreeMap<String, ColumnKind>,
    pub numeric: Vec<NumericSummary>,
    pub distinct: Vec<DistinctCount>,
}

/// Configured statistics of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub summary: DatasetSummary,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub value_counts: BTreeMap<String, Vec<ValueCount>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crosstabs: Vec<CrossTab>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub group_means: BTreeMap<String, Vec<GroupMean>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub group_distinct: BTreeMap<String, Vec<GroupDistinct>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlations: Option<CorrelationMatrix>,
}

/// Descriptive statistics.
pub struct DataProfiler;

impl DataProfiler {
    /// Compute every statistic listed in `config`. Grouped results are keyed
    /// `"<value> by <group>"`.
    pub fn compute(table: &Table, config: &StatisticsConfig) -> Result<Statistics> {
        let mut value_counts = BTreeMap::new();
        for column in &config.value_counts {
            require_columns(table, &[column])?;
            value_counts.insert(
                column.clone(),
                Self::value_counts(table, column, &config.exclude_labels)?,
            );
        }

        let mut crosstabs = Vec::with_capacity(config.crosstabs.len());
        for spec in &config.crosstabs {
            require_columns(table, &[&spec.group, &spec.value])?;
            crosstabs.push(Self::crosstab(table, &spec.group, &spec.value)?);
        }

        let mut group_means = BTreeMap::new();
        for spec in &config.group_means {
            require_columns(table, &[&spec.group, &spec.value])?;
            group_means.insert(
                group_key(spec),
                Self::group_mean(table, &spec.group, &spec.value)?,
            );
        }

        let mut group_distinct = BTreeMap::new();
        for spec in &config.group_distinct {
            require_columns(table, &[&spec.group, &spec.value])?;
            group_distinct.insert(
                group_key(spec),
                Self::group_distinct(table, &spec.group, &spec.value)?,
            );
        }

        let correlations = if config.correlations.is_empty() {
            None
        } else {
            Some(Self::correlation_matrix(table, &config.correlations)?)
        };

        Ok(Statistics {
            summary: Self::summarize(table, &config.exclude_labels)?,
            value_counts,
            crosstabs,
            group_means,
            group_distinct,
            correlations,
        })
    }

    /// Summary of a numeric column.
    pub fn describe(table: &Table, column: &str) -> Result<NumericSummary> {
        Ok(statistics::describe(column, &table.numeric(column)?))
    }

    /// Label frequencies, most frequent first.
    pub fn value_counts(table: &Table, column: &str, exclude: &[String]) -> Result<Vec<ValueCount>> {
        Ok(statistics::value_counts(&table.labels(column)?, exclude)
            .into_iter()
            .map(|(label, count)| ValueCount { label, count })
            .collect())
    }

    /// Distinct non-missing values per column. Labels in `exclude` are not
    /// counted in text columns.
    pub fn distinct_counts(table: &Table, exclude: &[String]) -> Result<Vec<DistinctCount>> {
        table
            .column_names()
            .into_iter()
            .map(|column| {
                let is_text = table.require(&column)?.is_text();
                let distinct: HashSet<String> = table
                    .labels(&column)?
                    .into_iter()
                    .flatten()
                    .filter(|label| !is_text || !exclude.contains(label))
                    .collect();
                Ok(DistinctCount {
                    column,
                    distinct: distinct.len(),
                })
            })
            .collect()
    }

    /// Count rows per (row label, column label) pair.
    pub fn crosstab(table: &Table, row: &str, col: &str) -> Result<CrossTab> {
        let row_values = table.labels(row)?;
        let col_values = table.labels(col)?;
        let row_labels = sorted_labels(table, row)?;
        let col_labels = sorted_labels(table, col)?;

        let row_index = index_of(&row_labels);
        let col_index = index_of(&col_labels);
        let mut counts = vec![vec![0usize; col_labels.len()]; row_labels.len()];
        for (r, c) in row_values.iter().zip(&col_values) {
            if let (Some(r), Some(c)) = (r, c) {
                counts[row_index[r.as_str()]][col_index[c.as_str()]] += 1;
            }
        }

        Ok(CrossTab {
            row_column: row.to_string(),
            col_column: col.to_string(),
            row_labels,
            col_labels,
            counts,
        })
    }

    /// Mean of a numeric column per group label.
    pub fn group_mean(table: &Table, group: &str, value: &str) -> Result<Vec<GroupMean>> {
        let groups = table.labels(group)?;
        let values = table.numeric(value)?;

        let mut sums: HashMap<&str, (f64, usize)> = HashMap::new();
        for (g, v) in groups.iter().zip(&values) {
            if let (Some(g), Some(v)) = (g, v) {
                let entry = sums.entry(g.as_str()).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
            }
        }

        Ok(sorted_labels(table, group)?
            .into_iter()
            .map(|label| {
                let (sum, count) = sums.get(label.as_str()).copied().unwrap_or((0.0, 0));
                GroupMean {
                    group: label,
                    count,
                    mean: (count > 0).then(|| sum / count as f64),
                }
            })
            .collect())
    }

    /// Distinct values of `value` per group label (e.g. families per class).
    pub fn group_distinct(table: &Table, group: &str, value: &str) -> Result<Vec<GroupDistinct>> {
        let groups = table.labels(group)?;
        let values = table.labels(value)?;

        let mut sets: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (g, v) in groups.iter().zip(&values) {
            if let (Some(g), Some(v)) = (g, v) {
                sets.entry(g.as_str()).or_default().insert(v.as_str());
            }
        }

        Ok(sorted_labels(table, group)?
            .into_iter()
            .map(|label| {
                let distinct = sets.get(label.as_str()).map_or(0, HashSet::len);
                GroupDistinct {
                    group: label,
                    distinct,
                }
            })
            .collect())
    }

    /// Pairwise Pearson correlations between numeric columns.
    pub fn correlation_matrix(table: &Table, columns: &[String]) -> Result<CorrelationMatrix> {
        let data = columns
            .iter()
            .map(|c| table.numeric(c))
            .collect::<Result<Vec<_>>>()?;
        let values = data
            .iter()
            .map(|a| data.iter().map(|b| statistics::pearson(a, b)).collect())
            .collect();
        Ok(CorrelationMatrix {
            columns: columns.to_vec(),
            values,
        })
    }

    /// Shape, kinds, numeric summaries and distinct counts of a table.
    pub fn summarize(table: &Table, exclude: &[String]) -> Result<DatasetSummary> {
        let mut numeric = Vec::new();
        let mut kinds = BTreeMap::new();
        for column in table.column_names() {
            let kind = table.require(&column)?;
            if kind == ColumnKind::Numeric {
                numeric.push(Self::describe(table, &column)?);
            }
            kinds.insert(column, kind);
        }
        Ok(DatasetSummary {
            rows: table.height(),
            columns: table.width(),
            kinds,
            numeric,
            distinct: Self::distinct_counts(table, exclude)?,
        })
    }
}

/// Distinct non-missing labels of a column, ordered by value for numeric
/// columns and lexically otherwise.
fn sorted_labels(table: &Table, column: &str) -> Result<Vec<String>> {
    match table.require(column)? {
        ColumnKind::Numeric => {
            let mut values: Vec<f64> = table.numeric(column)?.into_iter().flatten().collect();
            values.sort_by(f64::total_cmp);
            values.dedup();
            Ok(values.into_iter().map(format_number).collect())
        }
        ColumnKind::Code => {
            let mut codes: Vec<u32> = table.codes(column)?.into_iter().flatten().collect();
            codes.sort_unstable();
            codes.dedup();
            Ok(codes.into_iter().map(|c| c.to_string()).collect())
        }
        ColumnKind::Categorical | ColumnKind::Ordinal => {
            let mut labels: Vec<String> = table.text(column)?.into_iter().flatten().collect();
            labels.sort();
            labels.dedup();
            Ok(labels)
        }
    }
}

fn group_key(spec: &GroupSpec) -> String {
    format!("{} by {}", spec.value, spec.group)
}

fn index_of(labels: &[String]) -> HashMap<&str, usize> {
    labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect()
}

/// Fail early when a statistic names a column the table does not have.
pub fn require_columns(table: &Table, columns: &[impl AsRef<str>]) -> Result<()> {
    for column in columns {
        let column = column.as_ref();
        if !table.has_column(column) {
            return Err(PrepError::Schema(format!("Unknown column '{}'", column)));
        }
    }
    Ok(())
}
