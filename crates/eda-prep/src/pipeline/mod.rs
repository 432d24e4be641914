//! Pipeline module.
//!
//! [`Pipeline`] runs the stages of [`PipelineStage::ALL`] over a table,
//! fitting them or replaying a [`FittedPipeline`].

mod builder;
mod executor;
pub mod outliers;
pub mod progress;

pub use builder::{ExportPaths, Pipeline, PipelineBuilder};
pub use executor::{FittedPipeline, PipelineResult};
pub use outliers::{ColumnOutliers, OutlierBounds, OutlierFilter, OutlierReport};
pub use progress::{ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate};
