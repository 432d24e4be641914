use crate::cleaner::NormalizeReport;
use crate::error::Result;
use crate::imputers::MissingReport;
use crate::pipeline::outliers::OutlierReport;
use crate::pipeline::{FittedPipeline, PipelineResult};
use crate::profiler::Statistics;
use crate::types::Table;
use chrono::Local;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Base file name used when neither an output name nor an input path is known.
pub const DEFAULT_OUTPUT_NAME: &str = "cleaned_dataset";

// ============================================================================
// Report Types
// ============================================================================

/// Full account of a pipeline run, for `--json` output and report files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Timestamp when the report was generated
    pub generated_at: String,
    pub input_file: Option<String>,
    pub output_file: Option<String>,

    pub processing_summary: RunSummaryReport,

    /// Actions in the order they were taken, one line each.
    pub actions: Vec<String>,

    pub normalization: NormalizeReport,
    pub missing: MissingReport,
    pub outliers: OutlierReport,
    pub derived_columns: Vec<String>,

    /// Column kinds of the final table.
    pub columns: Vec<ColumnEntry>,

    pub fitted: FittedPipeline,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
}

/// Shape and completeness numbers of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummaryReport {
    pub duration_ms: u64,
    pub rows_before: usize,
    pub rows_after: usize,
    pub rows_removed: usize,
    pub rows_removed_percent: f32,
    pub columns_before: usize,
    pub columns_after: usize,
    pub columns_added: usize,
    pub completeness_before: f32,
    pub completeness_after: f32,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnEntry {
    pub name: String,
    pub kind: String,
    pub missing: usize,
}

// ============================================================================
// Generator
// ============================================================================

/// Writes cleaned tables, fitted state and run reports.
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    output_dir: PathBuf,
    output_name: Option<String>,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            output_name: None,
        }
    }
}

impl ReportGenerator {
    pub fn new(output_dir: PathBuf, output_name: Option<String>) -> Self {
        Self {
            output_dir,
            output_name,
        }
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Base name for output files: the configured name, else `fallback`,
    /// else [`DEFAULT_OUTPUT_NAME`].
    pub fn base_name(&self, fallback: Option<&str>) -> String {
        self.output_name
            .clone()
            .or_else(|| fallback.map(|s| format!("{}_cleaned", s)))
            .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string())
    }

    /// Assemble the report of a finished run.
    pub fn build_report(
        input_file: Option<&str>,
        output_file: Option<&str>,
        result: &PipelineResult,
    ) -> RunReport {
        let summary = &result.summary;
        let processing_summary = RunSummaryReport {
            duration_ms: summary.duration_ms,
            rows_before: summary.rows_before,
            rows_after: summary.rows_after,
            rows_removed: summary.rows_removed,
            rows_removed_percent: summary.rows_removed_percentage(),
            columns_before: summary.columns_before,
            columns_after: summary.columns_after,
            columns_added: summary.columns_added,
            completeness_before: summary.completeness_before,
            completeness_after: summary.completeness_after,
            warnings: summary.warnings.clone(),
        };

        let actions = summary
            .actions
            .iter()
            .map(|a| match &a.details {
                Some(details) => format!(
                    "[{}] {}: {} ({})",
                    a.action_type.display_name(),
                    a.target,
                    a.description,
                    details
                ),
                None => format!("[{}] {}: {}", a.action_type.display_name(), a.target, a.description),
            })
            .collect();

        RunReport {
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            input_file: input_file.map(String::from),
            output_file: output_file.map(String::from),
            processing_summary,
            actions,
            normalization: result.normalization.clone(),
            missing: result.missing.clone(),
            outliers: result.outliers.clone(),
            derived_columns: result.derived_columns.clone(),
            columns: column_entries(&result.table),
            fitted: result.fitted.clone(),
            statistics: result.statistics.clone(),
        }
    }

    /// Write the table as CSV to `<output_dir>/<base_name>.csv`.
    pub fn write_table(&self, table: &Table, base_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let output_path = self.output_dir.join(format!("{}.csv", base_name));
        let mut file = File::create(&output_path)?;

        let mut frame = table.frame().clone();
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b',')
            .with_quote_char(b'"')
            .finish(&mut frame)?;

        info!("Dataset saved: {}", output_path.display());
        Ok(output_path)
    }

    /// Write the report to `<output_dir>/<base_name>_report.json`.
    pub fn write_report(&self, report: &RunReport, base_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let report_path = self.output_dir.join(format!("{}_report.json", base_name));
        let mut file = File::create(&report_path)?;
        file.write_all(serde_json::to_string_pretty(report)?.as_bytes())?;

        info!("Report saved: {}", report_path.display());
        Ok(report_path)
    }

    /// Write the fitted state to `<output_dir>/<base_name>_fitted.json`.
    pub fn write_fitted(&self, fitted: &FittedPipeline, base_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}_fitted.json", base_name));
        fitted.save(&path)?;
        info!("Fitted state saved: {}", path.display());
        Ok(path)
    }
}

fn column_entries(table: &Table) -> Vec<ColumnEntry> {
    table
        .column_names()
        .into_iter()
        .map(|name| ColumnEntry {
            kind: table
                .kind(&name)
                .map(|k| k.as_str().to_string())
                .unwrap_or_default(),
            missing: table.null_count(&name).unwrap_or(0),
            name,
        })
        .collect()
}
