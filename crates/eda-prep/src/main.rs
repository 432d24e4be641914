//! CLI entry point for the cleaning and feature-derivation pipeline.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use eda_prep::{
    FittedPipeline, Pipeline, PipelineConfig, PipelineResult, ReportGenerator, RunReport, Table,
};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Configurable data cleaning and feature derivation",
    long_about = "Cleans a delimited file according to a JSON configuration: renames and \
                  relabels columns, resolves missing values, handles outliers, encodes \
                  categories, normalizes and derives new features.\n\n\
                  EXAMPLES:\n  \
                  # Clean with a configuration\n  \
                  eda-prep -i train.csv -c configs/titanic.json -o outputs/\n\n  \
                  # Preview the configured stages\n  \
                  eda-prep -i train.csv -c configs/titanic.json --dry-run\n\n  \
                  # Apply the state fitted on train to test\n  \
                  eda-prep -i test.csv -c configs/titanic.json --apply outputs/train_cleaned_fitted.json"
)]
struct Args {
    /// Path to the delimited file to process
    #[arg(short, long)]
    input: PathBuf,

    /// JSON pipeline configuration
    ///
    /// Without one, every column is read as categorical and left untouched
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory (overrides the configuration)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output file name without extension (overrides the configuration)
    #[arg(long)]
    output_name: Option<String>,

    /// Replay a fitted state instead of fitting on the input
    #[arg(long)]
    apply: Option<PathBuf>,

    /// Show the loaded columns and the configured stages without processing
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,

    /// Output JSON to stdout instead of human-readable summary
    ///
    /// Disables all progress logs; only outputs the final JSON report.
    #[arg(long)]
    json: bool,

    /// Write a detailed JSON report next to the cleaned table
    #[arg(short = 'r', long)]
    emit_report: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout only carries
/// the report.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);

    if !args.input.exists() {
        return Err(anyhow!("Input file not found: {}", args.input.display()));
    }

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &args.output {
        config.output_dir = Some(dir.clone());
    }
    if let Some(name) = &args.output_name {
        config.output_name = Some(name.clone());
    }

    let mut builder = Pipeline::builder().config(config);
    if !args.quiet && !args.json {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.display_name(),
                update.message
            );
        });
    }
    let pipeline = builder.build()?;

    if args.dry_run {
        let table = pipeline.load(&args.input)?;
        run_dry_run(&args, &pipeline, &table);
        return Ok(());
    }

    let result = match &args.apply {
        Some(path) => {
            let fitted = FittedPipeline::load(path)
                .with_context(|| format!("Failed to read fitted state {}", path.display()))?;
            info!("Replaying fitted state from {}", path.display());
            pipeline.transform_path(&args.input, &fitted)
        }
        None => pipeline.run_path(&args.input),
    };

    match result {
        Ok(result) => handle_pipeline_output(&pipeline, &result, &args),
        Err(e) => {
            error!("Pipeline failed: {}", e);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&e)?);
            }
            Err(anyhow!("Pipeline failed: {}", e))
        }
    }
}

/// Write outputs and print either the JSON report or a summary.
fn handle_pipeline_output(pipeline: &Pipeline, result: &PipelineResult, args: &Args) -> Result<()> {
    let input_file = args.input.display().to_string();

    let output_file = if args.emit_report {
        let paths = pipeline.export(result, Some(&args.input))?;
        info!("Report written to: {}", paths.report.display());
        paths.table
    } else {
        let reporter = pipeline.reporter();
        let base_name = reporter.base_name(file_stem(&args.input).as_deref());
        let path = reporter.write_table(&result.table, &base_name)?;
        if args.apply.is_none() {
            reporter.write_fitted(&result.fitted, &base_name)?;
        }
        path
    };

    let output_file = output_file.display().to_string();
    let report = ReportGenerator::build_report(Some(&input_file), Some(&output_file), result);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_human_readable_summary(&report);
    Ok(())
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

/// Dry-run output.
///
/// Uses `println!` on purpose: this is the command's result, not a log.
fn run_dry_run(args: &Args, pipeline: &Pipeline, table: &Table) {
    let config = pipeline.config();

    println!("\n{}", "=".repeat(80));
    println!("DRY RUN - Preview of configured stages");
    println!("{}\n", "=".repeat(80));

    println!("DATASET OVERVIEW");
    println!("{}", "-".repeat(40));
    println!("  File: {}", args.input.display());
    println!("  Rows: {}", table.height());
    println!("  Columns: {}", table.width());
    println!();

    println!("COLUMNS");
    println!("{}", "-".repeat(40));
    println!("{:<24} {:<12} {:<10}", "Column", "Kind", "Missing");
    println!("{}", "-".repeat(48));
    for name in table.column_names() {
        let kind = table.kind(&name).map(|k| k.as_str()).unwrap_or("?");
        let missing = table.null_count(&name).unwrap_or(0);
        println!("{:<24} {:<12} {:<10}", truncate_str(&name, 23), kind, missing);
    }
    println!();

    println!("CONFIGURED STAGES");
    println!("{}", "-".repeat(40));
    for (from, to) in config.rename_map() {
        println!("  rename    {} -> {}", from, to);
    }
    for column in config.value_maps.keys() {
        println!("  relabel   {}", column);
    }
    for spec in &config.columns {
        println!("  missing   {} ({})", spec.output_name(), spec.missing.as_str());
    }
    let outliers = config.outlier_columns();
    if !outliers.is_empty() {
        println!(
            "  outliers  {} ({:?})",
            outliers.join(", "),
            config.outliers.mode
        );
    }
    for spec in config.columns.iter().filter(|c| c.encoding.is_enabled()) {
        println!(
            "  encode    {} -> {}{}",
            spec.output_name(),
            spec.output_name(),
            config.encoding.suffix
        );
    }
    let normalize = config.normalize_columns();
    if !normalize.is_empty() {
        println!("  normalize {}", normalize.join(", "));
    }
    for name in pipeline.derivations() {
        println!("  derive    {}", name);
    }
    println!();
    println!("{}", "=".repeat(80));
    println!("To execute, run without --dry-run");
    println!("{}", "=".repeat(80));
}

fn print_human_readable_summary(report: &RunReport) {
    let summary = &report.processing_summary;

    println!("\n{}", "=".repeat(80));
    println!("PIPELINE COMPLETE");
    println!("{}", "=".repeat(80));
    println!(
        "  Rows:         {} -> {} ({} removed, {:.1}%)",
        summary.rows_before, summary.rows_after, summary.rows_removed, summary.rows_removed_percent
    );
    println!(
        "  Columns:      {} -> {} ({} added)",
        summary.columns_before, summary.columns_after, summary.columns_added
    );
    println!(
        "  Completeness: {:.1}% -> {:.1}%",
        summary.completeness_before * 100.0,
        summary.completeness_after * 100.0
    );
    println!("  Duration:     {}ms", summary.duration_ms);
    if let Some(output) = &report.output_file {
        println!("  Output:       {}", output);
    }
    println!();

    if !report.actions.is_empty() {
        println!("ACTIONS");
        println!("{}", "-".repeat(40));
        for action in &report.actions {
            println!("  {}", action);
        }
        println!();
    }

    if !summary.warnings.is_empty() {
        println!("WARNINGS");
        println!("{}", "-".repeat(40));
        for warning in &summary.warnings {
            println!("  ! {}", warning);
        }
        println!();
    }

    if let Some(statistics) = &report.statistics {
        println!("VALUE COUNTS");
        println!("{}", "-".repeat(40));
        for (column, counts) in &statistics.value_counts {
            let top: Vec<String> = counts
                .iter()
                .take(5)
                .map(|c| format!("{}={}", c.label, c.count))
                .collect();
            println!("  {:<20} {}", truncate_str(column, 19), top.join(", "));
        }
        println!();
    }
}

/// Truncate a string to max length with ellipsis
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
