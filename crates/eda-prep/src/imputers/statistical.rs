//! Fill values: fitting them from a column and writing them into it.

use crate::config::MissingPolicy;
use crate::error::{PrepError, Result};
use crate::types::{ColumnKind, Table};
use crate::utils::{format_number, mean, median, parse_numeric_string, string_mode};
use serde::{Deserialize, Serialize};

/// A value used to fill missing cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillValue {
    Number(f64),
    Label(String),
}

impl std::fmt::Display for FillValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => f.write_str(&format_number(*v)),
            Self::Label(s) => f.write_str(s),
        }
    }
}

/// Fill value fitted for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedFill {
    pub column: String,
    pub policy: String,
    pub value: FillValue,
}

/// Statistical fill computation.
pub struct StatisticalImputer;

impl StatisticalImputer {
    /// Compute the fill value of `policy` for `column`, or `None` for
    /// policies that do not fill (`leave`, `drop_rows`).
    pub fn fit(
        table: &Table,
        column: &str,
        policy: &MissingPolicy,
        unknown_label: &str,
    ) -> Result<Option<FillValue>> {
        let kind = table.require(column)?;
        if !policy.supports(kind) {
            return Err(PrepError::InvalidConfig(format!(
                "Missing policy '{}' does not apply to {} column '{}'",
                policy.as_str(),
                kind,
                column
            )));
        }

        let value = match policy {
            MissingPolicy::Leave | MissingPolicy::DropRows => return Ok(None),
            MissingPolicy::UnknownLabel => FillValue::Label(unknown_label.to_string()),
            MissingPolicy::Constant(literal) if kind == ColumnKind::Numeric => {
                let number = parse_numeric_string(literal).ok_or_else(|| {
                    PrepError::InvalidConfig(format!(
                        "Constant '{}' for numeric column '{}' is not a number",
                        literal, column
                    ))
                })?;
                FillValue::Number(number)
            }
            MissingPolicy::Constant(literal) => FillValue::Label(literal.clone()),
            MissingPolicy::Mean => {
                let values = table.numeric(column)?;
                FillValue::Number(mean(&values).ok_or_else(|| no_values(column))?)
            }
            MissingPolicy::Median => {
                let values = table.numeric(column)?;
                FillValue::Number(median(&values).ok_or_else(|| no_values(column))?)
            }
            MissingPolicy::Mode => {
                let values = table.text(column)?;
                FillValue::Label(string_mode(&values).ok_or_else(|| no_values(column))?)
            }
        };
        Ok(Some(value))
    }

    /// Fill missing numeric values. Returns the values and the fill count.
    pub fn fill_numeric(values: Vec<Option<f64>>, fill: f64) -> (Vec<Option<f64>>, usize) {
        let mut filled = 0;
        let out = values
            .into_iter()
            .map(|v| {
                v.or_else(|| {
                    filled += 1;
                    Some(fill)
                })
            })
            .collect();
        (out, filled)
    }

    /// Fill missing labels. Returns the values and the fill count.
    pub fn fill_text(values: Vec<Option<String>>, fill: &str) -> (Vec<Option<String>>, usize) {
        let mut filled = 0;
        let out = values
            .into_iter()
            .map(|v| {
                v.or_else(|| {
                    filled += 1;
                    Some(fill.to_string())
                })
            })
            .collect();
        (out, filled)
    }
}

fn no_values(column: &str) -> PrepError {
    PrepError::InsufficientData {
        column: column.to_string(),
        available: 0,
        required: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn sample() -> Table {
        let df = df![
            "Idade" => [Some(22.0), None, Some(38.0), Some(26.0)],
            "Embarque" => [Some("S"), Some("C"), None, Some("S")],
            "Vazia" => [None::<f64>, None, None, None],
        ]
        .unwrap();
        Table::from_frame(df).unwrap()
    }

    #[test]
    fn test_fit_mean_and_median() {
        let table = sample();
        let mean = StatisticalImputer::fit(&table, "Idade", &MissingPolicy::Mean, "Unknown").unwrap();
        assert_eq!(mean, Some(FillValue::Number(86.0 / 3.0)));
        let median =
            StatisticalImputer::fit(&table, "Idade", &MissingPolicy::Median, "Unknown").unwrap();
        assert_eq!(median, Some(FillValue::Number(26.0)));
    }

    #[test]
    fn test_fit_mode_and_labels() {
        let table = sample();
        let mode =
            StatisticalImputer::fit(&table, "Embarque", &MissingPolicy::Mode, "Unknown").unwrap();
        assert_eq!(mode, Some(FillValue::Label("S".into())));
        let unknown =
            StatisticalImputer::fit(&table, "Embarque", &MissingPolicy::UnknownLabel, "Desconhecido")
                .unwrap();
        assert_eq!(unknown, Some(FillValue::Label("Desconhecido".into())));
        let constant = StatisticalImputer::fit(
            &table,
            "Idade",
            &MissingPolicy::Constant("0".into()),
            "Unknown",
        )
        .unwrap();
        assert_eq!(constant, Some(FillValue::Number(0.0)));
    }

    #[test]
    fn test_fit_non_filling_policies() {
        let table = sample();
        assert_eq!(
            StatisticalImputer::fit(&table, "Idade", &MissingPolicy::Leave, "Unknown").unwrap(),
            None
        );
        assert_eq!(
            StatisticalImputer::fit(&table, "Idade", &MissingPolicy::DropRows, "Unknown").unwrap(),
            None
        );
    }

    #[test]
    fn test_fit_rejects_kind_mismatch() {
        let table = sample();
        let err =
            StatisticalImputer::fit(&table, "Embarque", &MissingPolicy::Median, "Unknown").unwrap_err();
        assert!(matches!(err, PrepError::InvalidConfig(_)));
    }

    #[test]
    fn test_fit_all_missing_is_insufficient() {
        let table = sample();
        let err = StatisticalImputer::fit(&table, "Vazia", &MissingPolicy::Mean, "Unknown").unwrap_err();
        assert!(matches!(err, PrepError::InsufficientData { available: 0, .. }));
    }

    #[test]
    fn test_fill_counts() {
        let (values, filled) = StatisticalImputer::fill_numeric(vec![Some(1.0), None, None], 5.0);
        assert_eq!(values, vec![Some(1.0), Some(5.0), Some(5.0)]);
        assert_eq!(filled, 2);

        let (labels, filled) = StatisticalImputer::fill_text(vec![None, Some("a".into())], "b");
        assert_eq!(labels, vec![Some("b".to_string()), Some("a".to_string())]);
        assert_eq!(filled, 1);
    }

    #[test]
    fn test_fill_value_display() {
        assert_eq!(FillValue::Number(28.0).to_string(), "28");
        assert_eq!(FillValue::Label("Unknown".into()).to_string(), "Unknown");
    }
}
