//! Stage execution.
//!
//! Runs the cleaning stages in order on a [`Table`], either fitting every
//! stage on the table itself or replaying the state of an earlier run.

use crate::cleaner::{ColumnNormalizer, NormalizeReport};
use crate::config::{EncodingPolicy, MissingPolicy, OutlierMode, PipelineConfig};
use crate::encoding::{CategoricalEncoder, EncoderSet};
use crate::error::{PrepError, Result, ResultExt};
use crate::features::FeatureDeriver;
use crate::imputers::{check_policy_columns, FittedFill, MissingReport, MissingValueHandler};
use crate::pipeline::outliers::{OutlierBounds, OutlierFilter, OutlierReport};
use crate::pipeline::progress::{PipelineStage, ProgressReporter, ProgressUpdate};
use crate::profiler::{DataProfiler, Statistics};
use crate::scaling::{Normalizer, ScalerSet};
use crate::types::{ActionType, PipelineAction, PipelineSummary, Table};
use crate::utils::format_number;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Share of removed rows above which a run is flagged.
const ROWS_REMOVED_WARNING_PCT: f32 = 30.0;

/// Everything a run learned from its input: fill values, outlier bounds,
/// label encoders and scalers. Replaying it on new data gives the same
/// transformation without refitting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub fills: Vec<FittedFill>,
    pub bounds: Vec<OutlierBounds>,
    pub encoders: EncoderSet,
    pub scalers: ScalerSet,
}

impl FittedPipeline {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PrepError::NotFound(path.display().to_string()));
        }
        Self::from_json(&std::fs::read_to_string(path)?)
            .context(format!("Fitted state '{}'", path.display()))
    }
}

/// Output of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// The cleaned, encoded, normalized and extended table.
    pub table: Table,
    /// State to replay the run on other data.
    pub fitted: FittedPipeline,
    pub normalization: NormalizeReport,
    pub missing: MissingReport,
    pub outliers: OutlierReport,
    /// Derived columns in computation order.
    pub derived_columns: Vec<String>,
    pub statistics: Option<Statistics>,
    pub summary: PipelineSummary,
}

/// Whether stages learn their state or reuse a fitted one.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FitMode<'a> {
    Fit,
    Replay(&'a FittedPipeline),
}

/// Runs the configured stages on a loaded table.
pub(crate) struct StageExecutor<'a> {
    pub config: &'a PipelineConfig,
    pub deriver: &'a FeatureDeriver,
    pub progress: Option<&'a dyn ProgressReporter>,
}

impl StageExecutor<'_> {
    pub fn execute(&self, input: &Table, mode: FitMode<'_>) -> Result<PipelineResult> {
        let start = Instant::now();
        let config = self.config;
        let mut summary = PipelineSummary::new();
        summary.rows_before = input.height();
        summary.columns_before = input.width();
        summary.completeness_before = input.completeness();

        // Step 2: names and labels
        let stage = self.enter(PipelineStage::ColumnNormalization);
        let (table, normalization) =
            ColumnNormalizer::apply(input, &config.rename_map(), &config.value_maps)
                .context(stage.display_name())?;
        for (from, to) in &normalization.renamed {
            summary.add_action(PipelineAction::new(
                ActionType::ColumnRenamed,
                to,
                format!("Renamed '{}' to '{}'", from, to),
            ));
        }
        for (column, count) in &normalization.relabelled {
            summary.add_action(PipelineAction::new(
                ActionType::ValuesRelabelled,
                column,
                format!("Relabelled {} values", count),
            ));
        }

        // Step 3: sentinels and missing values
        let stage = self.enter(PipelineStage::MissingValues);
        let policies: BTreeMap<String, MissingPolicy> = config
            .columns
            .iter()
            .map(|c| (c.output_name().to_string(), c.missing.clone()))
            .collect();
        check_policy_columns(&table, &policies).context(stage.display_name())?;
        let (table, missing, fills) = match mode {
            FitMode::Fit => MissingValueHandler::apply(&table, &config.missing, &policies),
            FitMode::Replay(fitted) => {
                MissingValueHandler::apply_fitted(&table, &config.missing, &policies, &fitted.fills)
                    .map(|(t, r)| (t, r, fitted.fills.clone()))
            }
        }
        .context(stage.display_name())?;
        record_missing(&mut summary, &missing);

        // Step 4: outliers
        let stage = self.enter(PipelineStage::Outliers);
        let outlier_columns = config.outlier_columns();
        let (table, outliers, bounds) = if outlier_columns.is_empty() {
            let report = OutlierReport {
                mode: config.outliers.mode,
                columns: Vec::new(),
                rows_removed: 0,
                values_clipped: 0,
            };
            (table, report, Vec::new())
        } else {
            match mode {
                FitMode::Fit => OutlierFilter::run(&table, &outlier_columns, &config.outliers),
                FitMode::Replay(fitted) => {
                    OutlierFilter::apply(&table, &fitted.bounds, config.outliers.mode)
                        .map(|(t, r)| (t, r, fitted.bounds.clone()))
                }
            }
            .context(stage.display_name())?
        };
        record_outliers(&mut summary, &outliers);

        // Step 5: categorical codes
        let stage = self.enter(PipelineStage::Encoding);
        let encode: Vec<(String, EncodingPolicy)> = config
            .columns
            .iter()
            .filter(|c| c.encoding.is_enabled())
            .map(|c| (c.output_name().to_string(), c.encoding.clone()))
            .collect();
        let (table, encoders) = match mode {
            FitMode::Fit => CategoricalEncoder::fit_transform(
                &table,
                &encode,
                &config.encoding.suffix,
                config.encoding.unseen_code,
            ),
            FitMode::Replay(fitted) => CategoricalEncoder::transform(&table, &fitted.encoders)
                .map(|t| (t, fitted.encoders.clone())),
        }
        .context(stage.display_name())?;
        for map in &encoders.maps {
            let pairs: Vec<String> = map
                .labels()
                .iter()
                .enumerate()
                .map(|(code, label)| format!("{}={}", label, code))
                .collect();
            summary.add_action(
                PipelineAction::new(
                    ActionType::CategoriesEncoded,
                    map.column(),
                    format!(
                        "Encoded {} labels into '{}'",
                        map.len(),
                        encoders.output_name(map.column())
                    ),
                )
                .with_details(pairs.join(", ")),
            );
        }

        // Step 6: z-scores
        let stage = self.enter(PipelineStage::Normalization);
        let normalize = config.normalize_columns();
        let (table, scalers) = match mode {
            FitMode::Fit => Normalizer::fit_transform(&table, &normalize, &config.scaling),
            FitMode::Replay(fitted) => {
                Normalizer::transform(&table, &fitted.scalers).map(|t| (t, fitted.scalers.clone()))
            }
        }
        .context(stage.display_name())?;
        for scaler in &scalers.scalers {
            if scaler.identity {
                summary.add_warning(format!(
                    "Column '{}' has zero variance and was left unscaled",
                    scaler.column
                ));
                continue;
            }
            summary.add_action(PipelineAction::new(
                ActionType::DataNormalized,
                &scaler.column,
                format!(
                    "Standardized with mean {} and std {}",
                    format_number(scaler.mean),
                    format_number(scaler.std)
                ),
            ));
        }

        // Step 7: derived features
        let stage = self.enter(PipelineStage::FeatureDerivation);
        let (table, derived_columns) = self.deriver.apply(&table).context(stage.display_name())?;
        for name in &derived_columns {
            let kind = table.kind(name).map(|k| k.as_str()).unwrap_or("unknown");
            summary.add_action(PipelineAction::new(
                ActionType::FeatureDerived,
                name,
                format!("Derived {} column", kind),
            ));
        }

        // Step 8: statistics
        let statistics = if config.statistics.is_empty() {
            None
        } else {
            let stage = self.enter(PipelineStage::Statistics);
            Some(DataProfiler::compute(&table, &config.statistics).context(stage.display_name())?)
        };

        summary.rows_after = table.height();
        summary.rows_removed = summary.rows_before.saturating_sub(table.height());
        summary.columns_after = table.width();
        summary.columns_added = table.width().saturating_sub(summary.columns_before);
        summary.completeness_after = table.completeness();
        if summary.rows_removed_percentage() > ROWS_REMOVED_WARNING_PCT {
            let warning = format!(
                "{:.1}% of rows were removed ({} of {})",
                summary.rows_removed_percentage(),
                summary.rows_removed,
                summary.rows_before
            );
            warn!("{}", warning);
            summary.add_warning(warning);
        }
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Pipeline finished in {}ms: {} -> {} rows, {} -> {} columns",
            summary.duration_ms,
            summary.rows_before,
            summary.rows_after,
            summary.columns_before,
            summary.columns_after
        );

        Ok(PipelineResult {
            table,
            fitted: FittedPipeline {
                fills,
                bounds,
                encoders,
                scalers,
            },
            normalization,
            missing,
            outliers,
            derived_columns,
            statistics,
            summary,
        })
    }

    /// Log and report the start of a stage.
    pub fn enter(&self, stage: PipelineStage) -> PipelineStage {
        info!(
            "Step {}/{}: {}...",
            stage.step(),
            PipelineStage::ALL.len(),
            stage.display_name()
        );
        if let Some(progress) = self.progress {
            progress.report(ProgressUpdate::new(stage, stage.display_name()));
        }
        stage
    }
}

fn record_missing(summary: &mut PipelineSummary, report: &MissingReport) {
    for (column, count) in &report.sentinels_replaced {
        summary.add_action(PipelineAction::new(
            ActionType::SentinelsReplaced,
            column,
            format!("Replaced {} sentinel values with missing", count),
        ));
    }
    for fill in report.fills.iter().filter(|f| f.rows > 0) {
        summary.add_action(
            PipelineAction::new(
                ActionType::ValuesImputed,
                &fill.column,
                format!("Filled {} missing values ({})", fill.rows, fill.policy),
            )
            .with_details(format!("value: {}", fill.value)),
        );
    }
    if report.rows_dropped > 0 {
        summary.add_action(PipelineAction::new(
            ActionType::RowsRemoved,
            "dataset",
            format!("Dropped {} rows with missing values", report.rows_dropped),
        ));
    }
}

fn record_outliers(summary: &mut PipelineSummary, report: &OutlierReport) {
    let action_type = match report.mode {
        OutlierMode::Detect => ActionType::OutliersDetected,
        OutlierMode::Filter => ActionType::OutliersRemoved,
        OutlierMode::Clip => ActionType::OutliersClipped,
    };
    for column in report.columns.iter().filter(|c| c.count > 0) {
        let verb = match report.mode {
            OutlierMode::Detect => "Found",
            OutlierMode::Filter => "Removed",
            OutlierMode::Clip => "Clipped",
        };
        summary.add_action(PipelineAction::new(
            action_type,
            &column.bounds.column,
            format!(
                "{} {} values outside [{}, {}]",
                verb,
                column.count,
                format_number(column.bounds.lower),
                format_number(column.bounds.upper)
            ),
        ));
    }
    if report.rows_removed > 0 {
        summary.add_action(PipelineAction::new(
            ActionType::RowsRemoved,
            "dataset",
            format!("Dropped {} rows containing outliers", report.rows_removed),
        ));
    }
}
