//! Z-score normalization with invertible, serializable scalers.

use crate::config::{RowSubset, ScalingConfig, ZeroVariancePolicy};
use crate::error::{PrepError, Result};
use crate::pipeline::outliers::subset_mask;
use crate::types::{ColumnData, ColumnKind, Table};
use crate::utils::{mean, std_dev};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Standard deviations below this are treated as zero.
pub const DEGENERATE_STD: f64 = 1e-12;

/// Fitted mean and population standard deviation of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub column: String,
    pub mean: f64,
    pub std: f64,
    /// Zero-variance column left unscaled.
    #[serde(default)]
    pub identity: bool,
}

impl Scaler {
    pub fn transform(&self, value: f64) -> f64 {
        if self.identity {
            value
        } else {
            (value - self.mean) / self.std
        }
    }

    pub fn inverse(&self, value: f64) -> f64 {
        if self.identity {
            value
        } else {
            value * self.std + self.mean
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalerSet {
    pub scalers: Vec<Scaler>,
}

impl ScalerSet {
    pub fn get(&self, column: &str) -> Option<&Scaler> {
        self.scalers.iter().find(|s| s.column == column)
    }

    pub fn len(&self) -> usize {
        self.scalers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scalers.is_empty()
    }
}

/// Rescales numeric columns to zero mean and unit variance.
pub struct Normalizer;

impl Normalizer {
    /// Fit a scaler on the non-missing values of `column`, optionally
    /// restricted to a row subset.
    pub fn fit_column(
        table: &Table,
        column: &str,
        policy: ZeroVariancePolicy,
        subset: Option<&RowSubset>,
    ) -> Result<Scaler> {
        let kind = table.require(column)?;
        if kind != ColumnKind::Numeric {
            return Err(PrepError::Schema(format!(
                "Cannot normalize {} column '{}'",
                kind, column
            )));
        }

        let in_subset = subset_mask(table, subset)?;
        let values: Vec<Option<f64>> = table
            .numeric(column)?
            .into_iter()
            .zip(in_subset)
            .map(|(v, keep)| if keep { v } else { None })
            .collect();

        let insufficient = || PrepError::InsufficientData {
            column: column.to_string(),
            available: 0,
            required: 1,
        };
        let mean = mean(&values).ok_or_else(insufficient)?;
        let std = std_dev(&values, 0).ok_or_else(insufficient)?;

        let identity = if std < DEGENERATE_STD {
            match policy {
                ZeroVariancePolicy::Fail => {
                    return Err(PrepError::DegenerateColumn {
                        column: column.to_string(),
                        std,
                    });
                }
                ZeroVariancePolicy::Identity => {
                    warn!("Column '{}' has zero variance; left unscaled", column);
                    true
                }
            }
        } else {
            false
        };

        debug!("Scaler for '{}': mean={}, std={}", column, mean, std);
        Ok(Scaler {
            column: column.to_string(),
            mean,
            std,
            identity,
        })
    }

    pub fn fit(table: &Table, columns: &[String], config: &ScalingConfig) -> Result<ScalerSet> {
        let scalers = columns
            .iter()
            .map(|c| Self::fit_column(table, c, config.zero_variance, config.subset.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(ScalerSet { scalers })
    }

    /// Apply `(v - mean) / std` in place of each fitted column.
    pub fn transform(table: &Table, scalers: &ScalerSet) -> Result<Table> {
        let out = Self::map_columns(table, scalers, Scaler::transform)?;
        if !scalers.is_empty() {
            info!("Normalized {} columns", scalers.len());
        }
        Ok(out)
    }

    /// Restore original values.
    pub fn inverse_transform(table: &Table, scalers: &ScalerSet) -> Result<Table> {
        Self::map_columns(table, scalers, Scaler::inverse)
    }

    pub fn fit_transform(
        table: &Table,
        columns: &[String],
        config: &ScalingConfig,
    ) -> Result<(Table, ScalerSet)> {
        let scalers = Self::fit(table, columns, config)?;
        let out = Self::transform(table, &scalers)?;
        Ok((out, scalers))
    }

    fn map_columns(
        table: &Table,
        scalers: &ScalerSet,
        f: fn(&Scaler, f64) -> f64,
    ) -> Result<Table> {
        let mut out = table.clone();
        for scaler in &scalers.scalers {
            let values = table
                .numeric(&scaler.column)?
                .into_iter()
                .map(|v| v.map(|v| f(scaler, v)))
                .collect();
            out.set_column(&scaler.column, ColumnData::Numeric(values))?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{mean, std_dev};
    use polars::df;

    fn sample() -> Table {
        let df = df![
            "Idade" => [Some(22.0), Some(38.0), None, Some(26.0), Some(35.0)],
            "Constante" => [5.0, 5.0, 5.0, 5.0, 5.0],
        ]
        .unwrap();
        Table::from_frame(df).unwrap()
    }

    #[test]
    fn test_transformed_mean_zero_std_one() {
        let table = sample();
        let (out, scalers) = Normalizer::fit_transform(
            &table,
            &["Idade".to_string()],
            &ScalingConfig::default(),
        )
        .unwrap();
        let values = out.numeric("Idade").unwrap();
        assert!(mean(&values).unwrap().abs() < 1e-9);
        assert!((std_dev(&values, 0).unwrap() - 1.0).abs() < 1e-9);
        assert!(values[2].is_none());
        assert_eq!(scalers.get("Idade").unwrap().mean, 30.25);
    }

    #[test]
    fn test_inverse_restores_values() {
        let table = sample();
        let (out, scalers) = Normalizer::fit_transform(
            &table,
            &["Idade".to_string()],
            &ScalingConfig::default(),
        )
        .unwrap();
        let restored = Normalizer::inverse_transform(&out, &scalers).unwrap();
        for (a, b) in restored
            .numeric("Idade")
            .unwrap()
            .iter()
            .zip(table.numeric("Idade").unwrap())
        {
            match (a, b) {
                (Some(a), Some(b)) => assert!((a - b).abs() < 1e-9),
                (None, None) => {}
                _ => panic!("missing pattern changed"),
            }
        }
    }

    #[test]
    fn test_zero_variance_fails_by_default() {
        let table = sample();
        let err = Normalizer::fit(&table, &["Constante".to_string()], &ScalingConfig::default())
            .unwrap_err();
        assert!(matches!(err, PrepError::DegenerateColumn { .. }));
    }

    #[test]
    fn test_zero_variance_identity() {
        let table = sample();
        let config = ScalingConfig {
            zero_variance: ZeroVariancePolicy::Identity,
            ..ScalingConfig::default()
        };
        let (out, scalers) =
            Normalizer::fit_transform(&table, &["Constante".to_string()], &config).unwrap();
        assert!(scalers.scalers[0].identity);
        assert_eq!(out.numeric("Constante").unwrap(), table.numeric("Constante").unwrap());
    }

    #[test]
    fn test_all_missing_is_insufficient() {
        let df = df!["x" => [None::<f64>, None]].unwrap();
        let table = Table::from_frame(df).unwrap();
        let err = Normalizer::fit(&table, &["x".to_string()], &ScalingConfig::default()).unwrap_err();
        assert!(matches!(err, PrepError::InsufficientData { .. }));
    }

    #[test]
    fn test_fit_on_subset() {
        let df = df![
            "g" => ["a", "a", "b"],
            "x" => [1.0, 3.0, 100.0],
        ]
        .unwrap();
        let table = Table::from_frame(df).unwrap();
        let config = ScalingConfig {
            subset: Some(RowSubset::new("g", "a")),
            ..ScalingConfig::default()
        };
        let scaler = &Normalizer::fit(&table, &["x".to_string()], &config).unwrap().scalers[0];
        assert_eq!((scaler.mean, scaler.std), (2.0, 1.0));
    }
}
