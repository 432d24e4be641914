//! Pipeline stages and progress reporting.
//!
//! A run walks through [`PipelineStage::ALL`] in order. Callers that want to
//! follow along register a [`ProgressReporter`] (or a closure through
//! [`PipelineBuilder::on_progress`](super::PipelineBuilder::on_progress)).

use serde::{Deserialize, Serialize};

/// Stages of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Reading the source file
    Loading,
    /// Renaming columns and relabelling values
    ColumnNormalization,
    /// Resolving sentinels and missing values
    MissingValues,
    /// Detecting, filtering or clipping outliers
    Outliers,
    /// Encoding categorical columns
    Encoding,
    /// Z-score normalization
    Normalization,
    /// Computing derived features
    FeatureDerivation,
    /// Descriptive statistics on the final table
    Statistics,
    /// Run finished
    Complete,
    /// Run stopped on an error
    Failed,
}

impl PipelineStage {
    /// Processing stages in execution order.
    pub const ALL: [PipelineStage; 8] = [
        Self::Loading,
        Self::ColumnNormalization,
        Self::MissingValues,
        Self::Outliers,
        Self::Encoding,
        Self::Normalization,
        Self::FeatureDerivation,
        Self::Statistics,
    ];

    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Loading => "Loading Data",
            Self::ColumnNormalization => "Normalizing Columns",
            Self::MissingValues => "Handling Missing Values",
            Self::Outliers => "Handling Outliers",
            Self::Encoding => "Encoding Categories",
            Self::Normalization => "Normalizing Values",
            Self::FeatureDerivation => "Deriving Features",
            Self::Statistics => "Computing Statistics",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }

    /// 1-based position in [`PipelineStage::ALL`]; 0 for terminal stages.
    pub fn step(&self) -> usize {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .map_or(0, |i| i + 1)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A stage transition during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: PipelineStage,
    /// Overall progress (0.0 - 1.0)
    pub progress: f32,
    pub message: String,
}

impl ProgressUpdate {
    /// Update for a stage about to start.
    pub fn new(stage: PipelineStage, message: impl Into<String>) -> Self {
        let done = stage.step().saturating_sub(1) as f32;
        Self {
            stage,
            progress: done / PipelineStage::ALL.len() as f32,
            message: message.into(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            stage: PipelineStage::Complete,
            progress: 1.0,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stage: PipelineStage::Failed,
            progress: 0.0,
            message: message.into(),
        }
    }
}

/// Receives progress updates from a running pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// [`ProgressReporter`] backed by a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_stage_order() {
        assert_eq!(PipelineStage::Loading.step(), 1);
        assert_eq!(PipelineStage::Outliers.step(), 4);
        assert_eq!(PipelineStage::Statistics.step(), PipelineStage::ALL.len());
        assert_eq!(PipelineStage::Complete.step(), 0);
        assert!(PipelineStage::Failed.is_terminal());
    }

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_string(&PipelineStage::FeatureDerivation).unwrap();
        assert_eq!(json, "\"feature_derivation\"");
        assert_eq!(PipelineStage::Encoding.to_string(), "Encoding Categories");
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(ProgressUpdate::new(PipelineStage::Loading, "").progress, 0.0);
        assert_eq!(ProgressUpdate::new(PipelineStage::Encoding, "").progress, 0.5);
        assert_eq!(ProgressUpdate::complete("done").progress, 1.0);
    }

    #[test]
    fn test_closure_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ClosureProgressReporter::new(move |u: ProgressUpdate| {
            sink.lock().unwrap().push(u.stage);
        });
        reporter.report(ProgressUpdate::new(PipelineStage::Outliers, "x"));
        reporter.report(ProgressUpdate::complete("done"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![PipelineStage::Outliers, PipelineStage::Complete]
        );
    }
}
