//! Missing-value handling.
//!
//! Sentinel markers in text columns become missing values first. Each
//! column's [`MissingPolicy`] is then applied: fills are computed (or taken
//! from a previous run), written, counted and logged, and `drop_rows`
//! columns remove the rows still missing.

mod statistical;

pub use statistical::{FillValue, FittedFill, StatisticalImputer};

use crate::cleaner::sanitizers::null_sentinels;
use crate::config::{MissingConfig, MissingPolicy};
use crate::error::{PrepError, Result};
use crate::types::{ColumnData, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// One fill applied to a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRecord {
    pub column: String,
    pub policy: String,
    pub value: String,
    /// Rows affected.
    pub rows: usize,
}

/// Counts of everything the missing-value stage changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingReport {
    /// Sentinel cells turned into missing values, per column.
    pub sentinels_replaced: BTreeMap<String, usize>,
    pub fills: Vec<FillRecord>,
    pub rows_dropped: usize,
    /// Missing values left in place after the stage, per column.
    pub still_missing: BTreeMap<String, usize>,
}

impl MissingReport {
    pub fn total_filled(&self) -> usize {
        self.fills.iter().map(|f| f.rows).sum()
    }

    pub fn total_sentinels(&self) -> usize {
        self.sentinels_replaced.values().sum()
    }
}

/// Resolves sentinels and missing values under per-column policies.
pub struct MissingValueHandler;

impl MissingValueHandler {
    /// Turn sentinel cells of every text column into missing values.
    pub fn replace_sentinels(
        table: &Table,
        config: &MissingConfig,
    ) -> Result<(Table, BTreeMap<String, usize>)> {
        let mut cleaned = table.clone();
        let mut counts = BTreeMap::new();

        for column in table.column_names() {
            if !table.require(&column)?.is_text() {
                continue;
            }
            let (values, replaced) =
                null_sentinels(table.text(&column)?, &config.sentinels, config.match_trimmed);
            if replaced > 0 {
                cleaned.set_column(&column, ColumnData::Text(values))?;
                debug!("Replaced {} sentinel cells in '{}'", replaced, column);
                counts.insert(column, replaced);
            }
        }
        Ok((cleaned, counts))
    }

    /// Fit fill values on `table` and apply every policy.
    ///
    /// Returns the cleaned table, the report and the fitted fills for
    /// replay on new data.
    pub fn apply(
        table: &Table,
        config: &MissingConfig,
        policies: &BTreeMap<String, MissingPolicy>,
    ) -> Result<(Table, MissingReport, Vec<FittedFill>)> {
        let (cleaned, sentinels) = Self::replace_sentinels(table, config)?;

        let mut fitted = Vec::new();
        for (column, policy) in policies {
            if let Some(value) =
                StatisticalImputer::fit(&cleaned, column, policy, &config.unknown_label)?
            {
                fitted.push(FittedFill {
                    column: column.clone(),
                    policy: policy.as_str().to_string(),
                    value,
                });
            }
        }

        let (out, mut report) = Self::fill_and_drop(cleaned, policies, &fitted)?;
        report.sentinels_replaced = sentinels;
        Ok((out, report, fitted))
    }

    /// Apply fills fitted on an earlier run.
    pub fn apply_fitted(
        table: &Table,
        config: &MissingConfig,
        policies: &BTreeMap<String, MissingPolicy>,
        fitted: &[FittedFill],
    ) -> Result<(Table, MissingReport)> {
        let (cleaned, sentinels) = Self::replace_sentinels(table, config)?;
        let (out, mut report) = Self::fill_and_drop(cleaned, policies, fitted)?;
        report.sentinels_replaced = sentinels;
        Ok((out, report))
    }

    fn fill_and_drop(
        table: Table,
        policies: &BTreeMap<String, MissingPolicy>,
        fitted: &[FittedFill],
    ) -> Result<(Table, MissingReport)> {
        let mut table = table;
        let mut report = MissingReport::default();

        for fill in fitted {
            let rows = match &fill.value {
                FillValue::Number(v) => {
                    let (values, rows) =
                        StatisticalImputer::fill_numeric(table.numeric(&fill.column)?, *v);
                    table.set_column(&fill.column, ColumnData::Numeric(values))?;
                    rows
                }
                FillValue::Label(label) => {
                    let (values, rows) =
                        StatisticalImputer::fill_text(table.text(&fill.column)?, label);
                    table.set_column(&fill.column, ColumnData::Text(values))?;
                    rows
                }
            };
            if rows > 0 {
                warn!(
                    "Filled {} missing values in '{}' with '{}' ({})",
                    rows, fill.column, fill.value, fill.policy
                );
            }
            report.fills.push(FillRecord {
                column: fill.column.clone(),
                policy: fill.policy.clone(),
                value: fill.value.to_string(),
                rows,
            });
        }

        let drop_columns: Vec<&String> = policies
            .iter()
            .filter(|(_, p)| **p == MissingPolicy::DropRows)
            .map(|(c, _)| c)
            .collect();
        if !drop_columns.is_empty() {
            let mut keep = vec![true; table.height()];
            for column in &drop_columns {
                table.require(column)?;
                let series = table.frame().column(column.as_str())?;
                for (row, is_null) in series.is_null().into_iter().enumerate() {
                    if is_null == Some(true) {
                        keep[row] = false;
                    }
                }
            }
            let before = table.height();
            table = table.filter_rows(&keep)?;
            report.rows_dropped = before - table.height();
            if report.rows_dropped > 0 {
                warn!(
                    "Dropped {} rows with missing values in {:?}",
                    report.rows_dropped, drop_columns
                );
            }
        }

        for column in table.column_names() {
            let missing = table.null_count(&column)?;
            if missing > 0 {
                report.still_missing.insert(column, missing);
            }
        }

        info!(
            "Missing values: {} filled, {} rows dropped, {} left missing",
            report.total_filled(),
            report.rows_dropped,
            report.still_missing.values().sum::<usize>()
        );
        Ok((table, report))
    }
}

/// Check that every policy names a column of the table.
pub(crate) fn check_policy_columns(
    table: &Table,
    policies: &BTreeMap<String, MissingPolicy>,
) -> Result<()> {
    for column in policies.keys() {
        if !table.has_column(column) {
            return Err(PrepError::Schema(format!(
                "Missing-value policy for unknown column '{}'",
                column
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn sample() -> Table {
        let df = df![
            "Idade" => [Some(39.0), None, Some(50.0), None],
            "Tipo_de_Emprego" => ["State-gov", "?", "Private", " ?"],
            "Cabine" => [Some("C85"), None, None, Some("E46")],
        ]
        .unwrap();
        Table::from_frame(df).unwrap()
    }

    fn config() -> MissingConfig {
        MissingConfig {
            sentinels: vec!["?".to_string()],
            ..MissingConfig::default()
        }
    }

    #[test]
    fn test_replace_sentinels() {
        let table = sample();
        let (out, counts) = MissingValueHandler::replace_sentinels(&table, &config()).unwrap();
        assert_eq!(counts["Tipo_de_Emprego"], 2);
        assert_eq!(out.null_count("Tipo_de_Emprego").unwrap(), 2);
        assert!(!counts.contains_key("Idade"));
        // input untouched
        assert_eq!(table.null_count("Tipo_de_Emprego").unwrap(), 0);
    }

    #[test]
    fn test_apply_policies() {
        let table = sample();
        let policies = BTreeMap::from([
            ("Idade".to_string(), MissingPolicy::Median),
            (
                "Tipo_de_Emprego".to_string(),
                MissingPolicy::Constant("Desconhecido".into()),
            ),
            ("Cabine".to_string(), MissingPolicy::Leave),
        ]);
        let (out, report, fitted) = MissingValueHandler::apply(&table, &config(), &policies).unwrap();

        assert_eq!(out.numeric("Idade").unwrap()[1], Some(44.5));
        assert_eq!(
            out.text("Tipo_de_Emprego").unwrap()[3].as_deref(),
            Some("Desconhecido")
        );
        assert_eq!(report.total_filled(), 4);
        assert_eq!(report.total_sentinels(), 2);
        assert_eq!(report.still_missing.get("Cabine"), Some(&2));
        assert_eq!(fitted.len(), 2);
    }

    #[test]
    fn test_drop_rows() {
        let table = sample();
        let policies = BTreeMap::from([("Idade".to_string(), MissingPolicy::DropRows)]);
        let (out, report, _) = MissingValueHandler::apply(&table, &config(), &policies).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(report.rows_dropped, 2);
    }

    #[test]
    fn test_apply_fitted_reuses_values() {
        let table = sample();
        let fitted = vec![FittedFill {
            column: "Idade".into(),
            policy: "median".into(),
            value: FillValue::Number(30.0),
        }];
        let policies = BTreeMap::from([("Idade".to_string(), MissingPolicy::Median)]);
        let (out, report) =
            MissingValueHandler::apply_fitted(&table, &config(), &policies, &fitted).unwrap();
        assert_eq!(out.numeric("Idade").unwrap()[3], Some(30.0));
        assert_eq!(report.fills[0].rows, 2);
    }

    #[test]
    fn test_unknown_policy_column() {
        let table = sample();
        let policies = BTreeMap::from([("Renda".to_string(), MissingPolicy::Mode)]);
        assert!(matches!(
            check_policy_columns(&table, &policies),
            Err(PrepError::Schema(_))
        ));
        assert!(MissingValueHandler::apply(&table, &config(), &policies).is_err());
    }
}
