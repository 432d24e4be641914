//! Core data types: the [`Table`] every stage consumes and produces, column
//! kinds, and the run summary.

use crate::error::{PrepError, Result};
use crate::utils::{format_number, is_integer_dtype, is_numeric_dtype};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared semantic type of a column.
///
/// The kind decides how values are stored: `Numeric` as Float64,
/// `Categorical` and `Ordinal` as String, `Code` as UInt32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Continuous or count values
    Numeric,
    /// Unordered labels
    #[default]
    Categorical,
    /// Ordered labels (e.g. age bands)
    Ordinal,
    /// Integer codes produced by the categorical encoder
    Code,
}

impl ColumnKind {
    /// Storage dtype for this kind.
    pub fn storage_dtype(&self) -> DataType {
        match self {
            Self::Numeric => DataType::Float64,
            Self::Categorical | Self::Ordinal => DataType::String,
            Self::Code => DataType::UInt32,
        }
    }

    /// Numeric kinds can feed arithmetic and statistics.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Numeric | Self::Code)
    }

    /// Text kinds hold labels.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Categorical | Self::Ordinal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Categorical => "categorical",
            Self::Ordinal => "ordinal",
            Self::Code => "code",
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values of one column, detached from any table.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Codes(Vec<Option<u32>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Text(v) => v.len(),
            Self::Codes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this data can be stored under `kind`.
    pub fn fits(&self, kind: ColumnKind) -> bool {
        match self {
            Self::Numeric(_) => kind == ColumnKind::Numeric,
            Self::Text(_) => kind.is_text(),
            Self::Codes(_) => kind == ColumnKind::Code,
        }
    }

    fn into_series(self, name: &str) -> Series {
        match self {
            Self::Numeric(v) => Series::new(name.into(), v),
            Self::Text(v) => Series::new(name.into(), v),
            Self::Codes(v) => Series::new(name.into(), v),
        }
    }
}

/// A rectangular table of named, typed columns.
///
/// Wraps a polars [`DataFrame`] (which guarantees equal column lengths and
/// unique names) together with the declared [`ColumnKind`] of every column.
/// Missing values are nulls.
#[derive(Debug, Clone)]
pub struct Table {
    frame: DataFrame,
    kinds: HashMap<String, ColumnKind>,
}

impl Table {
    /// Build a table from a frame and a kind for every column.
    ///
    /// Columns are cast to the storage dtype of their kind. A `Numeric` or
    /// `Code` kind on a non-numeric column is a schema error; text must go
    /// through the [`TableLoader`](crate::TableLoader) to be parsed.
    pub fn new(frame: DataFrame, kinds: HashMap<String, ColumnKind>) -> Result<Self> {
        let mut frame = frame;
        let names = frame_column_names(&frame);

        for declared in kinds.keys() {
            if !names.contains(declared) {
                return Err(PrepError::Schema(format!(
                    "Kind declared for unknown column '{}'",
                    declared
                )));
            }
        }

        for name in &names {
            let kind = *kinds.get(name).ok_or_else(|| {
                PrepError::Schema(format!("Column '{}' has no declared kind", name))
            })?;
            let series = frame.column(name)?.as_materialized_series().clone();
            let dtype = series.dtype().clone();
            let target = kind.storage_dtype();
            if dtype == target {
                continue;
            }
            let compatible = match kind {
                ColumnKind::Numeric => is_numeric_dtype(&dtype),
                ColumnKind::Code => is_integer_dtype(&dtype),
                ColumnKind::Categorical | ColumnKind::Ordinal => true,
            };
            if !compatible {
                return Err(PrepError::Schema(format!(
                    "Column '{}' of dtype {} cannot hold {} values",
                    name, dtype, kind
                )));
            }
            let cast = series.cast(&target)?;
            frame.replace(name, cast)?;
        }

        Ok(Self { frame, kinds })
    }

    /// Build a table from a frame, deriving kinds from dtypes: numeric
    /// dtypes become `Numeric`, everything else `Categorical`.
    pub fn from_frame(frame: DataFrame) -> Result<Self> {
        let kinds = frame
            .get_columns()
            .iter()
            .map(|col| {
                let kind = if is_numeric_dtype(col.dtype()) {
                    ColumnKind::Numeric
                } else {
                    ColumnKind::Categorical
                };
                (col.name().to_string(), kind)
            })
            .collect();
        Self::new(frame, kinds)
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    /// Column names in table order.
    pub fn column_names(&self) -> Vec<String> {
        frame_column_names(&self.frame)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<ColumnKind> {
        self.kinds.get(name).copied()
    }

    pub fn kinds(&self) -> &HashMap<String, ColumnKind> {
        &self.kinds
    }

    /// Kind of a column, or a schema error if the column is unknown.
    pub fn require(&self, name: &str) -> Result<ColumnKind> {
        self.kind(name)
            .ok_or_else(|| PrepError::Schema(format!("Unknown column '{}'", name)))
    }

    /// Values of a numeric (or code) column as floats.
    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let kind = self.require(name)?;
        if !kind.is_numeric() {
            return Err(PrepError::Schema(format!(
                "Column '{}' is {}, numeric expected",
                name, kind
            )));
        }
        let series = self.frame.column(name)?.as_materialized_series();
        let cast = series.cast(&DataType::Float64)?;
        Ok(cast.f64()?.into_iter().collect())
    }

    /// Values of a text column.
    pub fn text(&self, name: &str) -> Result<Vec<Option<String>>> {
        let kind = self.require(name)?;
        if !kind.is_text() {
            return Err(PrepError::Schema(format!(
                "Column '{}' is {}, text expected",
                name, kind
            )));
        }
        let series = self.frame.column(name)?.as_materialized_series();
        Ok(series
            .str()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect())
    }

    /// Values of an encoded column.
    pub fn codes(&self, name: &str) -> Result<Vec<Option<u32>>> {
        let kind = self.require(name)?;
        if kind != ColumnKind::Code {
            return Err(PrepError::Schema(format!(
                "Column '{}' is {}, code expected",
                name, kind
            )));
        }
        let series = self.frame.column(name)?.as_materialized_series();
        Ok(series.u32()?.into_iter().collect())
    }

    /// Values of any column rendered as labels (for grouping and counting).
    pub fn labels(&self, name: &str) -> Result<Vec<Option<String>>> {
        match self.require(name)? {
            ColumnKind::Numeric => Ok(self
                .numeric(name)?
                .into_iter()
                .map(|v| v.map(format_number))
                .collect()),
            ColumnKind::Code => Ok(self
                .codes(name)?
                .into_iter()
                .map(|v| v.map(|c| c.to_string()))
                .collect()),
            ColumnKind::Categorical | ColumnKind::Ordinal => self.text(name),
        }
    }

    /// Number of missing values in a column.
    pub fn null_count(&self, name: &str) -> Result<usize> {
        self.require(name)?;
        Ok(self.frame.column(name)?.null_count())
    }

    /// Replace the values of an existing column, keeping its kind.
    pub(crate) fn set_column(&mut self, name: &str, data: ColumnData) -> Result<()> {
        let kind = self.require(name)?;
        if !data.fits(kind) {
            return Err(PrepError::Schema(format!(
                "Replacement values do not fit {} column '{}'",
                kind, name
            )));
        }
        self.check_len(name, &data)?;
        self.frame.replace(name, data.into_series(name))?;
        Ok(())
    }

    /// Append a new column. Fails if the name is taken.
    pub(crate) fn add_column(&mut self, name: &str, data: ColumnData, kind: ColumnKind) -> Result<()> {
        if self.has_column(name) {
            return Err(PrepError::Schema(format!("Column '{}' already exists", name)));
        }
        if !data.fits(kind) {
            return Err(PrepError::Schema(format!(
                "Values for new column '{}' do not fit kind {}",
                name, kind
            )));
        }
        self.check_len(name, &data)?;
        self.frame.with_column(data.into_series(name))?;
        self.kinds.insert(name.to_string(), kind);
        Ok(())
    }

    /// Return a copy of the table with one more column.
    pub fn with_column(&self, name: &str, data: ColumnData, kind: ColumnKind) -> Result<Table> {
        let mut table = self.clone();
        table.add_column(name, data, kind)?;
        Ok(table)
    }

    /// Rename a column in place. Fails if the target name is taken.
    pub(crate) fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let kind = self.require(from)?;
        if from == to {
            return Ok(());
        }
        if self.has_column(to) {
            return Err(PrepError::Schema(format!(
                "Cannot rename '{}' to '{}': column already exists",
                from, to
            )));
        }
        self.frame.rename(from, to.into())?;
        self.kinds.remove(from);
        self.kinds.insert(to.to_string(), kind);
        Ok(())
    }

    /// Keep only the rows where `keep` is true.
    pub fn filter_rows(&self, keep: &[bool]) -> Result<Table> {
        if keep.len() != self.height() {
            return Err(PrepError::Schema(format!(
                "Row mask has {} entries for {} rows",
                keep.len(),
                self.height()
            )));
        }
        let mask = BooleanChunked::from_slice("mask".into(), keep);
        Ok(Table {
            frame: self.frame.filter(&mask)?,
            kinds: self.kinds.clone(),
        })
    }

    /// Fraction of non-missing cells (1.0 for an empty table).
    pub fn completeness(&self) -> f32 {
        let cells = self.height() * self.width();
        if cells == 0 {
            return 1.0;
        }
        let nulls: usize = self.frame.get_columns().iter().map(|c| c.null_count()).sum();
        (cells - nulls) as f32 / cells as f32
    }

    fn check_len(&self, name: &str, data: &ColumnData) -> Result<()> {
        if self.width() > 0 && data.len() != self.height() {
            return Err(PrepError::Schema(format!(
                "Column '{}' has {} values, table has {} rows",
                name,
                data.len(),
                self.height()
            )));
        }
        Ok(())
    }
}

fn frame_column_names(frame: &DataFrame) -> Vec<String> {
    frame
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ============================================================================
// Run Summary Types
// ============================================================================

/// Human-readable summary of what a pipeline run did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Total execution time in milliseconds.
    pub duration_ms: u64,

    pub rows_before: usize,
    pub rows_after: usize,
    pub rows_removed: usize,

    pub columns_before: usize,
    pub columns_after: usize,
    /// Columns added by encoding and derivation.
    pub columns_added: usize,

    /// Fraction of non-missing cells before and after the run (0.0 - 1.0).
    pub completeness_before: f32,
    pub completeness_after: f32,

    /// Audit trail of the actions taken, in order.
    pub actions: Vec<PipelineAction>,

    /// Warnings about potentially lossy results.
    pub warnings: Vec<String>,
}

impl PipelineSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&mut self, action: PipelineAction) {
        self.actions.push(action);
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Percentage of rows removed by the run.
    pub fn rows_removed_percentage(&self) -> f32 {
        if self.rows_before == 0 {
            0.0
        } else {
            (self.rows_removed as f32 / self.rows_before as f32) * 100.0
        }
    }

    /// Actions of a given type.
    pub fn actions_of(&self, action_type: ActionType) -> impl Iterator<Item = &PipelineAction> {
        self.actions
            .iter()
            .filter(move |a| a.action_type == action_type)
    }
}

/// A single action taken during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineAction {
    pub action_type: ActionType,
    /// Column name, or "dataset".
    pub target: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl PipelineAction {
    pub fn new(
        action_type: ActionType,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action_type,
            target: target.into(),
            description: description.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Types of actions recorded in a [`PipelineSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ColumnRenamed,
    ValuesRelabelled,
    SentinelsReplaced,
    ValuesImputed,
    RowsRemoved,
    OutliersDetected,
    OutliersRemoved,
    OutliersClipped,
    CategoriesEncoded,
    DataNormalized,
    FeatureDerived,
}

impl ActionType {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ColumnRenamed => "Column Renamed",
            Self::ValuesRelabelled => "Values Relabelled",
            Self::SentinelsReplaced => "Sentinels Replaced",
            Self::ValuesImputed => "Values Imputed",
            Self::RowsRemoved => "Rows Removed",
            Self::OutliersDetected => "Outliers Detected",
            Self::OutliersRemoved => "Outliers Removed",
            Self::OutliersClipped => "Outliers Clipped",
            Self::CategoriesEncoded => "Categories Encoded",
            Self::DataNormalized => "Data Normalized",
            Self::FeatureDerived => "Feature Derived",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
