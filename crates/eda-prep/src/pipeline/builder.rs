//! Main pipeline module.
//!
//! This module provides the [`Pipeline`] struct and its builder, which tie
//! loading, the cleaning stages and output writing together.

use crate::config::PipelineConfig;
use crate::error::{Result, ResultExt};
use crate::features::{Derivation, FeatureDeriver};
use crate::loader::{LoadOptions, TableLoader};
use crate::pipeline::executor::{FitMode, FittedPipeline, PipelineResult, StageExecutor};
use crate::pipeline::progress::{
    ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate,
};
use crate::reporting::ReportGenerator;
use crate::types::Table;
use polars::prelude::DataFrame;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// The cleaning and feature-derivation pipeline.
///
/// Use [`Pipeline::builder()`] to create a pipeline with custom configuration.
///
/// # Example
///
/// ```rust,ignore
/// use eda_prep::{Pipeline, PipelineConfig};
///
/// let config = PipelineConfig::from_path("configs/titanic.json")?;
/// let pipeline = Pipeline::builder()
///     .config(config)
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?;
///
/// let result = pipeline.run_path("data/train.csv")?;
/// pipeline.export(&result, Some("data/train.csv".as_ref()))?;
///
/// // Same cleaning, fitted on train, applied to test
/// let test = pipeline.transform_path("data/test.csv", &result.fitted)?;
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    loader: TableLoader,
    deriver: FeatureDeriver,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    reporter: ReportGenerator,
}

// Pipelines are moved into worker threads by callers
static_assertions::assert_impl_all!(Pipeline: Send);

/// Files written by [`Pipeline::export`].
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub table: PathBuf,
    pub fitted: PathBuf,
    pub report: PathBuf,
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn reporter(&self) -> &ReportGenerator {
        &self.reporter
    }

    /// Names of the derived columns, in computation order.
    pub fn derivations(&self) -> Vec<&str> {
        self.deriver.names()
    }

    /// Load a delimited file with the configured column declarations.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Table> {
        let stage = PipelineStage::Loading;
        info!(
            "Step {}/{}: {}...",
            stage.step(),
            PipelineStage::ALL.len(),
            stage.display_name()
        );
        self.report_progress(ProgressUpdate::new(stage, stage.display_name()));
        self.loader
            .load(path, &self.config.columns)
            .context(stage.display_name())
    }

    /// Fit every stage on `table` and apply it.
    ///
    /// The input table is not modified. The returned [`PipelineResult`]
    /// carries the fitted state for [`Pipeline::transform`].
    pub fn process(&self, table: &Table) -> Result<PipelineResult> {
        self.finish(self.executor().execute(table, FitMode::Fit))
    }

    /// Type an in-memory frame with the configured declarations, then
    /// [`process`](Self::process) it.
    pub fn process_frame(&self, frame: DataFrame) -> Result<PipelineResult> {
        let table = self.loader.apply_specs(frame, &self.config.columns);
        self.finish(table.and_then(|t| self.executor().execute(&t, FitMode::Fit)))
    }

    /// Load `path` and [`process`](Self::process) it.
    pub fn run_path(&self, path: impl AsRef<Path>) -> Result<PipelineResult> {
        let table = self.load(path);
        self.finish(table.and_then(|t| self.executor().execute(&t, FitMode::Fit)))
    }

    /// Apply a previously fitted state to `table` without refitting.
    pub fn transform(&self, table: &Table, fitted: &FittedPipeline) -> Result<PipelineResult> {
        self.finish(self.executor().execute(table, FitMode::Replay(fitted)))
    }

    /// Load `path` and [`transform`](Self::transform) it.
    pub fn transform_path(
        &self,
        path: impl AsRef<Path>,
        fitted: &FittedPipeline,
    ) -> Result<PipelineResult> {
        let table = self.load(path);
        self.finish(table.and_then(|t| self.executor().execute(&t, FitMode::Replay(fitted))))
    }

    /// Write the cleaned table, the fitted state and the run report.
    ///
    /// File names derive from the configured output name, or from the
    /// input file stem.
    pub fn export(&self, result: &PipelineResult, input: Option<&Path>) -> Result<ExportPaths> {
        let stem = input
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string());
        let base_name = self.reporter.base_name(stem.as_deref());

        let table = self.reporter.write_table(&result.table, &base_name)?;
        let fitted = self.reporter.write_fitted(&result.fitted, &base_name)?;

        let input_file = input.map(|p| p.display().to_string());
        let output_file = table.display().to_string();
        let report = ReportGenerator::build_report(
            input_file.as_deref(),
            Some(output_file.as_str()),
            result,
        );
        let report = self.reporter.write_report(&report, &base_name)?;

        Ok(ExportPaths {
            table,
            fitted,
            report,
        })
    }

    fn executor(&self) -> StageExecutor<'_> {
        StageExecutor {
            config: &self.config,
            deriver: &self.deriver,
            progress: self.progress_reporter.as_deref(),
        }
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn finish(&self, result: Result<PipelineResult>) -> Result<PipelineResult> {
        match result {
            Ok(result) => {
                self.report_progress(ProgressUpdate::complete("Pipeline completed successfully"));
                Ok(result)
            }
            Err(e) => {
                self.report_progress(ProgressUpdate::failed(e.to_string()));
                error!("Pipeline error: {}", e);
                Err(e)
            }
        }
    }
}

/// Builder for creating a [`Pipeline`] instance.
///
/// Use [`Pipeline::builder()`] to get started.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    derivations: Vec<Box<dyn Derivation>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Register a derivation computed after the configured ones.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use eda_prep::{ColumnData, ColumnKind, FnDerivation, Pipeline, Requirement};
    ///
    /// let pipeline = Pipeline::builder()
    ///     .derivation(FnDerivation::new(
    ///         "Sozinho",
    ///         ColumnKind::Numeric,
    ///         vec![Requirement::numeric("Familia")],
    ///         |table| {
    ///             let family = table.numeric("Familia")?;
    ///             Ok(ColumnData::Numeric(
    ///                 family.iter().map(|v| v.map(|n| f64::from(n == 1.0))).collect(),
    ///             ))
    ///         },
    ///     ))
    ///     .build()?;
    /// ```
    pub fn derivation(mut self, derivation: impl Derivation + 'static) -> Self {
        self.derivations.push(Box::new(derivation));
        self
    }

    /// Set a progress reporter for receiving updates during processing.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Build the pipeline.
    ///
    /// Fails if the configuration is invalid or two derivations share an
    /// output name.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mut deriver = FeatureDeriver::from_specs(&config.derivations)?;
        for derivation in self.derivations {
            deriver.register(derivation)?;
        }

        let reporter = ReportGenerator::new(
            config.output_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            config.output_name.clone(),
        );

        Ok(Pipeline {
            loader: TableLoader::new(LoadOptions::from_config(&config)),
            config,
            deriver,
            progress_reporter: self.progress_reporter,
            reporter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ColumnSpec, MissingPolicy, OutlierMode, OutlierRule, PipelineConfig,
    };
    use crate::error::PrepError;
    use crate::features::{DerivationSpec, FnDerivation, Requirement};
    use crate::types::{ActionType, ColumnData, ColumnKind};
    use polars::df;
    use polars::prelude::DataFrame;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn passengers() -> DataFrame {
        df![
            "Name" => [
                "Braund, Mr. Owen Harris",
                "Cumings, Mrs. John Bradley",
                "Heikkinen, Miss. Laina",
                "Allen, Mr. William Henry",
                "Moran, Mr. James",
            ],
            "Sex" => ["male", "female", "female", "male", "male"],
            "Age" => [Some(22.0), Some(38.0), Some(26.0), Some(35.0), None],
            "Embarked" => [Some("S"), Some("C"), Some(""), Some("S"), Some("Q")],
        ]
        .unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder()
            .column(ColumnSpec::categorical("Name").renamed("Nome"))
            .column(ColumnSpec::categorical("Sex").renamed("Sexo").encoded())
            .column(
                ColumnSpec::numeric("Age")
                    .renamed("Idade")
                    .with_missing(MissingPolicy::Median),
            )
            .column(
                ColumnSpec::categorical("Embarked")
                    .renamed("Porto")
                    .with_missing(MissingPolicy::UnknownLabel),
            )
            .value_map("Sexo", [("male", "homem"), ("female", "mulher")])
            .sentinels([""])
            .unknown_label("Desconhecido")
            .derivation(DerivationSpec::Extract {
                name: "Titulo".to_string(),
                column: "Nome".to_string(),
                pattern: r",\s*([^\.]*)\.".to_string(),
                group: 1,
                fallback: None,
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_process_frame_runs_every_stage() {
        let pipeline = Pipeline::builder().config(config()).build().unwrap();
        let result = pipeline.process_frame(passengers()).unwrap();
        let table = &result.table;

        assert_eq!(table.height(), 5);
        assert!(table.has_column("Sexo_code"));
        assert_eq!(
            table.text("Sexo").unwrap()[0].as_deref(),
            Some("homem")
        );
        assert_eq!(table.codes("Sexo_code").unwrap()[1], Some(1));
        assert_eq!(table.numeric("Idade").unwrap()[4], Some(30.5));
        assert_eq!(
            table.text("Porto").unwrap()[2].as_deref(),
            Some("Desconhecido")
        );
        assert_eq!(
            table.text("Titulo").unwrap()[1].as_deref(),
            Some("Mrs")
        );
        assert_eq!(result.derived_columns, vec!["Titulo".to_string()]);

        let summary = &result.summary;
        assert_eq!(summary.rows_removed, 0);
        assert_eq!(summary.columns_added, 2);
        assert_eq!(summary.actions_of(ActionType::ColumnRenamed).count(), 4);
        assert_eq!(summary.actions_of(ActionType::ValuesImputed).count(), 2);
        assert!(summary.completeness_after >= summary.completeness_before);
    }

    #[test]
    fn test_transform_reuses_fitted_state() {
        let pipeline = Pipeline::builder().config(config()).build().unwrap();
        let fitted = pipeline.process_frame(passengers()).unwrap().fitted;

        let unseen = df![
            "Name" => ["Kelly, Mr. James", "Wilkes, Mrs. James"],
            "Sex" => ["female", "male"],
            "Age" => [None::<f64>, Some(47.0)],
            "Embarked" => ["Q", "S"],
        ]
        .unwrap();
        let loader = TableLoader::new(LoadOptions::from_config(pipeline.config()));
        let table = loader.apply_specs(unseen, &pipeline.config().columns).unwrap();
        let result = pipeline.transform(&table, &fitted).unwrap();

        // median and codes come from the first frame
        assert_eq!(result.table.numeric("Idade").unwrap()[0], Some(30.5));
        assert_eq!(
            result.table.codes("Sexo_code").unwrap(),
            vec![Some(1), Some(0)]
        );
        assert_eq!(result.fitted, fitted);
    }

    #[test]
    fn test_fitted_state_survives_json() {
        let pipeline = Pipeline::builder().config(config()).build().unwrap();
        let fitted = pipeline.process_frame(passengers()).unwrap().fitted;
        let restored = FittedPipeline::from_json(&fitted.to_json().unwrap()).unwrap();
        assert_eq!(restored, fitted);
    }

    fn filter_values(values: &[f64]) -> PipelineResult {
        let frame = df!["Valor" => values].unwrap();
        let config = PipelineConfig::builder()
            .column(ColumnSpec::numeric("Valor").with_outliers())
            .outlier_mode(OutlierMode::Filter)
            .outlier_rule(OutlierRule::Iqr { multiplier: 0.0 })
            .build()
            .unwrap();
        let pipeline = Pipeline::builder().config(config).build().unwrap();
        pipeline.process_frame(frame).unwrap()
    }

    #[test]
    fn test_outlier_filter_warns_on_heavy_loss() {
        // Q1 = 3, Q3 = 300: 1, 2, 400 and 500 fall outside
        let result = filter_values(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0, 200.0, 300.0, 400.0, 500.0]);

        assert_eq!(result.outliers.rows_removed, 4);
        assert_eq!(result.summary.rows_before, 10);
        assert_eq!(result.summary.rows_after, 6);
        assert_eq!(
            result.summary.warnings,
            vec!["40.0% of rows were removed (4 of 10)".to_string()]
        );
    }

    #[test]
    fn test_outlier_filter_light_loss_has_no_warning() {
        // Q1 = 2, Q3 = 200: only 1 and 300 are dropped
        let result = filter_values(&[1.0, 2.0, 3.0, 4.0, 100.0, 200.0, 300.0]);

        assert_eq!(result.outliers.rows_removed, 2);
        assert_eq!(result.summary.rows_after, 5);
        assert!(result.summary.warnings.is_empty());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.outliers.rule = OutlierRule::Iqr { multiplier: -1.0 };
        let err = Pipeline::builder().config(config).build().err().unwrap();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_build_rejects_duplicate_derivation() {
        let custom = FnDerivation::new("Titulo", ColumnKind::Numeric, vec![], |t| {
            Ok(ColumnData::Numeric(vec![None; t.height()]))
        });
        let result = Pipeline::builder().config(config()).derivation(custom).build();
        assert!(matches!(result.err(), Some(PrepError::Schema(_))));
    }

    #[test]
    fn test_missing_dependency_surfaces_through_context() {
        let custom = FnDerivation::new(
            "Familia",
            ColumnKind::Numeric,
            vec![Requirement::numeric("Irmaos")],
            |t| Ok(ColumnData::Numeric(vec![None; t.height()])),
        );
        let pipeline = Pipeline::builder()
            .config(config())
            .derivation(custom)
            .build()
            .unwrap();
        let err = pipeline.process_frame(passengers()).unwrap_err();
        assert!(matches!(err.root(), PrepError::MissingDependency { .. }));
        assert!(err.to_string().starts_with("Deriving Features"));
    }

    #[test]
    fn test_progress_reports_stages_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let pipeline = Pipeline::builder()
            .config(config())
            .on_progress(move |u| sink.lock().unwrap().push(u.stage))
            .build()
            .unwrap();
        pipeline.process_frame(passengers()).unwrap();

        let stages = seen.lock().unwrap().clone();
        assert_eq!(stages.first(), Some(&PipelineStage::ColumnNormalization));
        assert_eq!(stages.last(), Some(&PipelineStage::Complete));
        assert!(!stages.contains(&PipelineStage::Statistics));
    }

    #[test]
    fn test_run_path_missing_file() {
        let pipeline = Pipeline::builder().build().unwrap();
        let err = pipeline.run_path("does/not/exist.csv").unwrap_err();
        assert!(matches!(err.root(), PrepError::NotFound(_)));
    }
}
