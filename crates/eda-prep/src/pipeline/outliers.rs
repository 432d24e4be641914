//! Outlier handling module.
//!
//! Bounds are computed once per designated column, then a single pass
//! detects, filters or clips. Missing values are never outliers.

use crate::config::{OutlierConfig, OutlierMode, OutlierRule, QuantileMethod, RowSubset};
use crate::error::{PrepError, Result};
use crate::types::{ColumnData, ColumnKind, Table};
use crate::utils::{quantile_sorted, sorted_present};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Minimum non-missing values for quartiles to be meaningful.
pub const MIN_QUARTILE_VALUES: usize = 4;

/// Fitted bounds for one column. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierBounds {
    pub column: String,
    pub q1: f64,
    pub q3: f64,
    pub lower: f64,
    pub upper: f64,
    /// Rows outside the subset are never classified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<RowSubset>,
}

impl OutlierBounds {
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }

    pub fn is_outlier(&self, value: f64) -> bool {
        value < self.lower || value > self.upper
    }

    /// Winsorize a value to the bounds.
    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }
}

/// Outliers found in one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnOutliers {
    pub bounds: OutlierBounds,
    pub count: usize,
    /// Row indices (in the stage's input table) of the outliers.
    pub rows: Vec<usize>,
}

/// Result of the outlier stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierReport {
    pub mode: OutlierMode,
    pub columns: Vec<ColumnOutliers>,
    pub rows_removed: usize,
    pub values_clipped: usize,
}

impl OutlierReport {
    pub fn total_outliers(&self) -> usize {
        self.columns.iter().map(|c| c.count).sum()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnOutliers> {
        self.columns.iter().find(|c| c.bounds.column == name)
    }
}

/// Handles outlier detection and treatment.
pub struct OutlierFilter;

impl OutlierFilter {
    /// Fit bounds for one numeric column.
    pub fn fit_column(
        table: &Table,
        column: &str,
        rule: OutlierRule,
        method: QuantileMethod,
        subset: Option<&RowSubset>,
    ) -> Result<OutlierBounds> {
        let kind = table.require(column)?;
        if kind != ColumnKind::Numeric {
            return Err(PrepError::Schema(format!(
                "Outlier bounds need a numeric column, '{}' is {}",
                column, kind
            )));
        }

        let values = table.numeric(column)?;
        let in_subset = subset_mask(table, subset)?;
        let considered: Vec<Option<f64>> = values
            .into_iter()
            .zip(&in_subset)
            .map(|(v, keep)| if *keep { v } else { None })
            .collect();

        let sorted = sorted_present(&considered);
        if sorted.len() < MIN_QUARTILE_VALUES {
            return Err(PrepError::InsufficientData {
                column: column.to_string(),
                available: sorted.len(),
                required: MIN_QUARTILE_VALUES,
            });
        }

        let quantile = |p: f64| {
            quantile_sorted(&sorted, p, method).ok_or_else(|| {
                PrepError::InvalidConfig(format!("Quantile {} out of range", p))
            })
        };
        let q1 = quantile(0.25)?;
        let q3 = quantile(0.75)?;
        let (lower, upper) = match rule {
            OutlierRule::Iqr { multiplier } => {
                let iqr = q3 - q1;
                (q1 - multiplier * iqr, q3 + multiplier * iqr)
            }
            OutlierRule::Percentile { lower, upper } => (quantile(lower)?, quantile(upper)?),
        };

        debug!(
            "Outlier bounds for '{}': Q1={}, Q3={}, [{}, {}]",
            column, q1, q3, lower, upper
        );
        Ok(OutlierBounds {
            column: column.to_string(),
            q1,
            q3,
            lower,
            upper,
            subset: subset.cloned(),
        })
    }

    /// Fit bounds for every designated column.
    pub fn fit(table: &Table, columns: &[String], config: &OutlierConfig) -> Result<Vec<OutlierBounds>> {
        columns
            .iter()
            .map(|column| {
                Self::fit_column(
                    table,
                    column,
                    config.rule,
                    config.quantile_method,
                    config.subsets.get(column),
                )
            })
            .collect()
    }

    /// Classify without touching the table.
    pub fn detect(table: &Table, bounds: &[OutlierBounds]) -> Result<OutlierReport> {
        let columns = bounds
            .iter()
            .map(|b| Self::classify(table, b))
            .collect::<Result<Vec<_>>>()?;
        Ok(OutlierReport {
            mode: OutlierMode::Detect,
            columns,
            rows_removed: 0,
            values_clipped: 0,
        })
    }

    /// Apply fitted bounds under `mode`. The input table is not modified.
    pub fn apply(
        table: &Table,
        bounds: &[OutlierBounds],
        mode: OutlierMode,
    ) -> Result<(Table, OutlierReport)> {
        let mut report = Self::detect(table, bounds)?;
        report.mode = mode;

        let out = match mode {
            OutlierMode::Detect => table.clone(),
            OutlierMode::Filter => {
                let mut keep = vec![true; table.height()];
                for column in &report.columns {
                    for &row in &column.rows {
                        keep[row] = false;
                    }
                }
                let filtered = table.filter_rows(&keep)?;
                report.rows_removed = table.height() - filtered.height();
                if report.rows_removed > 0 {
                    warn!("Removed {} rows containing outliers", report.rows_removed);
                }
                filtered
            }
            OutlierMode::Clip => {
                let mut clipped = table.clone();
                for column in &report.columns {
                    if column.count == 0 {
                        continue;
                    }
                    let mut values = table.numeric(&column.bounds.column)?;
                    for &row in &column.rows {
                        values[row] = values[row].map(|v| column.bounds.clip(v));
                    }
                    clipped.set_column(&column.bounds.column, ColumnData::Numeric(values))?;
                    report.values_clipped += column.count;
                }
                if report.values_clipped > 0 {
                    warn!("Clipped {} outlier values to bounds", report.values_clipped);
                }
                clipped
            }
        };

        info!(
            "Outliers ({:?}): {} found in {} columns",
            mode,
            report.total_outliers(),
            report.columns.len()
        );
        Ok((out, report))
    }

    /// Fit bounds and apply the configured mode.
    pub fn run(
        table: &Table,
        columns: &[String],
        config: &OutlierConfig,
    ) -> Result<(Table, OutlierReport, Vec<OutlierBounds>)> {
        let bounds = Self::fit(table, columns, config)?;
        let (out, report) = Self::apply(table, &bounds, config.mode)?;
        Ok((out, report, bounds))
    }

    fn classify(table: &Table, bounds: &OutlierBounds) -> Result<ColumnOutliers> {
        let values = table.numeric(&bounds.column)?;
        let in_subset = subset_mask(table, bounds.subset.as_ref())?;
        let rows: Vec<usize> = values
            .iter()
            .zip(&in_subset)
            .enumerate()
            .filter_map(|(row, (v, keep))| match v {
                Some(v) if *keep && bounds.is_outlier(*v) => Some(row),
                _ => None,
            })
            .collect();

        if !rows.is_empty() {
            debug!("{} outliers in '{}'", rows.len(), bounds.column);
        }
        Ok(ColumnOutliers {
            bounds: bounds.clone(),
            count: rows.len(),
            rows,
        })
    }
}

/// Rows belonging to a subset (all rows when there is none).
pub(crate) fn subset_mask(table: &Table, subset: Option<&RowSubset>) -> Result<Vec<bool>> {
    match subset {
        None => Ok(vec![true; table.height()]),
        Some(subset) => Ok(table
            .labels(&subset.column)?
            .iter()
            .map(|label| label.as_deref() == Some(subset.equals.as_str()))
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn scenario() -> Table {
        let df = df![
            "x" => [1.0, 2.0, 2.0, 3.0, 3.0, 3.0, 4.0, 4.0, 5.0, 100.0],
        ]
        .unwrap();
        Table::from_frame(df).unwrap()
    }

    fn iqr_config(mode: OutlierMode) -> OutlierConfig {
        OutlierConfig {
            mode,
            ..OutlierConfig::default()
        }
    }

    #[test]
    fn test_iqr_bounds_scenario() {
        let table = scenario();
        let bounds = OutlierFilter::fit_column(
            &table,
            "x",
            OutlierRule::default(),
            QuantileMethod::NearestRank,
            None,
        )
        .unwrap();
        assert_eq!(bounds.q1, 2.0);
        assert_eq!(bounds.q3, 4.0);
        assert_eq!(bounds.iqr(), 2.0);
        assert_eq!((bounds.lower, bounds.upper), (-1.0, 7.0));
        assert!(bounds.lower <= bounds.q1 && bounds.q3 <= bounds.upper);
    }

    #[test]
    fn test_detect_does_not_mutate() {
        let table = scenario();
        let columns = vec!["x".to_string()];
        let (out, report, _) =
            OutlierFilter::run(&table, &columns, &iqr_config(OutlierMode::Detect)).unwrap();
        assert_eq!(out.height(), 10);
        assert_eq!(report.column("x").unwrap().rows, vec![9]);
        assert_eq!(report.total_outliers(), 1);
    }

    #[test]
    fn test_filter_drops_outlier_row() {
        let table = scenario();
        let columns = vec!["x".to_string()];
        let (out, report, _) =
            OutlierFilter::run(&table, &columns, &iqr_config(OutlierMode::Filter)).unwrap();
        assert_eq!(out.height(), 9);
        assert_eq!(report.rows_removed, 1);
        assert!(!out.numeric("x").unwrap().contains(&Some(100.0)));
    }

    #[test]
    fn test_clip_winsorizes() {
        let table = scenario();
        let columns = vec!["x".to_string()];
        let (out, report, bounds) =
            OutlierFilter::run(&table, &columns, &iqr_config(OutlierMode::Clip)).unwrap();
        let values = out.numeric("x").unwrap();
        assert_eq!(values[9], Some(7.0));
        assert_eq!(report.values_clipped, 1);
        assert!(values
            .iter()
            .flatten()
            .all(|v| *v >= bounds[0].lower && *v <= bounds[0].upper));
    }

    #[test]
    fn test_missing_values_pass_filter() {
        let df = df![
            "x" => [Some(1.0), None, Some(2.0), Some(3.0), Some(4.0), Some(500.0)],
        ]
        .unwrap();
        let table = Table::from_frame(df).unwrap();
        let columns = vec!["x".to_string()];
        let (out, _, _) =
            OutlierFilter::run(&table, &columns, &iqr_config(OutlierMode::Filter)).unwrap();
        assert_eq!(out.null_count("x").unwrap(), 1);
        assert_eq!(out.height(), 5);
    }

    #[test]
    fn test_insufficient_data() {
        let df = df!["x" => [Some(1.0), None, Some(2.0), Some(3.0)]].unwrap();
        let table = Table::from_frame(df).unwrap();
        let err = OutlierFilter::fit_column(
            &table,
            "x",
            OutlierRule::default(),
            QuantileMethod::NearestRank,
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PrepError::InsufficientData {
                available: 3,
                required: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_non_numeric_column_rejected() {
        let df = df!["s" => ["a", "b", "c", "d"]].unwrap();
        let table = Table::from_frame(df).unwrap();
        let err = OutlierFilter::fit_column(
            &table,
            "s",
            OutlierRule::default(),
            QuantileMethod::NearestRank,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PrepError::Schema(_)));
    }

    #[test]
    fn test_percentile_rule() {
        let values: Vec<f64> = (1..=20).map(f64::from).collect();
        let df = df!["x" => values].unwrap();
        let table = Table::from_frame(df).unwrap();
        let bounds = OutlierFilter::fit_column(
            &table,
            "x",
            OutlierRule::Percentile {
                lower: 0.05,
                upper: 0.95,
            },
            QuantileMethod::NearestRank,
            None,
        )
        .unwrap();
        assert_eq!((bounds.lower, bounds.upper), (1.0, 19.0));
        let (out, _) = OutlierFilter::apply(&table, &[bounds], OutlierMode::Clip).unwrap();
        assert_eq!(out.numeric("x").unwrap()[19], Some(19.0));
    }

    #[test]
    fn test_subset_restricts_fit_and_classification() {
        let df = df![
            "Classe" => [1.0, 1.0, 1.0, 1.0, 1.0, 3.0],
            "Tarifa" => [80.0, 82.0, 84.0, 86.0, 500.0, 7.0],
        ]
        .unwrap();
        let table = Table::from_frame(df).unwrap();
        let subset = RowSubset::new("Classe", "1");
        let bounds = OutlierFilter::fit_column(
            &table,
            "Tarifa",
            OutlierRule::default(),
            QuantileMethod::NearestRank,
            Some(&subset),
        )
        .unwrap();
        assert_eq!((bounds.q1, bounds.q3), (82.0, 86.0));

        let report = OutlierFilter::detect(&table, &[bounds]).unwrap();
        // third-class fare of 7 is outside the bounds but not in the subset
        assert_eq!(report.columns[0].rows, vec![4]);
    }
}
