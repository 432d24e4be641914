//! Exploratory Data Preparation Library
//!
//! A configurable cleaning and feature-derivation pipeline for tabular
//! datasets, built on Polars.
//!
//! # Overview
//!
//! A [`PipelineConfig`] declares the columns of a delimited file and what to
//! do with each of them. The [`Pipeline`] then runs these stages in order:
//!
//! - **Loading**: [`TableLoader`] reads the file, checks field counts and types
//!   declared numeric columns
//! - **Column normalization**: [`ColumnNormalizer`] renames columns and relabels values
//! - **Missing values**: [`MissingValueHandler`] turns sentinels into missing values
//!   and fills or drops them per column
//! - **Outliers**: [`OutlierFilter`] detects, filters or clips values outside IQR or
//!   percentile bounds
//! - **Encoding**: [`CategoricalEncoder`] adds integer code columns
//! - **Normalization**: [`Normalizer`] rescales to z-scores
//! - **Derivation**: [`FeatureDeriver`] computes new columns from existing ones
//! - **Statistics**: [`DataProfiler`] summarizes the final table
//!
//! Every fitted stage is captured in a [`FittedPipeline`], so the cleaning
//! learned on one file can be replayed on another.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use eda_prep::{ColumnSpec, MissingPolicy, OutlierMode, Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::builder()
//!     .column(ColumnSpec::numeric("Age").renamed("Idade").with_missing(MissingPolicy::Median))
//!     .column(ColumnSpec::numeric("Fare").renamed("Tarifa").with_outliers())
//!     .column(ColumnSpec::categorical("Sex").renamed("Sexo").encoded())
//!     .outlier_mode(OutlierMode::Filter)
//!     .build()?;
//!
//! let pipeline = Pipeline::builder().config(config).build()?;
//! let result = pipeline.run_path("train.csv")?;
//!
//! println!("{} rows left", result.table.height());
//! for action in &result.summary.actions {
//!     println!("[{}] {}", action.action_type.display_name(), action.description);
//! }
//! ```
//!
//! # Custom Derivations
//!
//! Configured derivations cover combining, binning, regex extraction and
//! label lookups. Anything else implements [`Derivation`], or wraps a
//! closure in [`FnDerivation`], and is registered on the builder.

pub mod cleaner;
pub mod config;
pub mod encoding;
pub mod error;
pub mod features;
pub mod imputers;
pub mod loader;
pub mod pipeline;
pub mod profiler;
pub mod reporting;
pub mod scaling;
pub mod types;
pub mod utils;

// Re-exports for convenient access
pub use cleaner::{ColumnNormalizer, NormalizeReport};
pub use config::{
    ColumnSpec, ConfigValidationError, EncodingPolicy, GroupSpec, MissingPolicy, OutlierMode,
    OutlierRule, PipelineConfig, PipelineConfigBuilder, QuantileMethod, RowSubset,
    StatisticsConfig, ZeroVariancePolicy,
};
pub use encoding::{CategoricalEncoder, EncoderSet, EncodingMap};
pub use error::{PrepError, Result, ResultExt};
pub use features::{
    Bin, Combine, CombineOp, Comparison, Derivation, DerivationSpec, Extract, FeatureDeriver,
    FnDerivation, InputKind, Lookup, Requirement, Threshold, ThresholdRule, Translate,
};
pub use imputers::{FillValue, FittedFill, MissingReport, MissingValueHandler};
pub use loader::{LoadOptions, TableLoader};
pub use pipeline::{
    ClosureProgressReporter, ExportPaths, FittedPipeline, OutlierBounds, OutlierFilter,
    OutlierReport, Pipeline, PipelineBuilder, PipelineResult, PipelineStage, ProgressReporter,
    ProgressUpdate,
};
pub use profiler::{DataProfiler, NumericSummary, Statistics};
pub use reporting::{ReportGenerator, RunReport};
pub use scaling::{Normalizer, Scaler, ScalerSet};
pub use types::{
    ActionType, ColumnData, ColumnKind, PipelineAction, PipelineSummary, Table,
};
