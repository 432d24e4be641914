//! Configuration types for the cleaning pipeline.
//!
//! A [`PipelineConfig`] describes one dataset: how to load it, which columns
//! exist and what to do with each of them, and which features to derive.
//! It can be written as JSON or assembled with [`PipelineConfig::builder()`].

use crate::error::{PrepError, Result};
use crate::features::DerivationSpec;
use crate::types::ColumnKind;
use crate::utils::parse_numeric_string;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

// ============================================================================
// Policies
// ============================================================================

/// How missing values of a column are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Keep the missing marker
    #[default]
    Leave,
    /// Fill text columns with the configured unknown label
    UnknownLabel,
    /// Fill with a literal (parsed as a number for numeric columns)
    Constant(String),
    /// Fill numeric columns with the mean of present values
    Mean,
    /// Fill numeric columns with the median of present values
    Median,
    /// Fill text columns with the most frequent label
    Mode,
    /// Drop rows where this column is missing
    DropRows,
}

impl MissingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leave => "leave",
            Self::UnknownLabel => "unknown_label",
            Self::Constant(_) => "constant",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Mode => "mode",
            Self::DropRows => "drop_rows",
        }
    }

    /// Whether the policy can be applied to a column of this kind.
    pub fn supports(&self, kind: ColumnKind) -> bool {
        match self {
            Self::Leave | Self::DropRows => true,
            Self::Constant(_) => kind != ColumnKind::Code,
            Self::Mean | Self::Median => kind == ColumnKind::Numeric,
            Self::UnknownLabel | Self::Mode => kind.is_text(),
        }
    }
}

/// How a text column is encoded to integer codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncodingPolicy {
    /// Not encoded
    #[default]
    None,
    /// Codes assigned in first-seen order
    FirstSeen,
    /// Codes assigned in the given label order
    Explicit(Vec<String>),
}

impl EncodingPolicy {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// What the outlier stage does with values outside the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMode {
    /// Report outliers without touching the table
    #[default]
    Detect,
    /// Drop rows where any designated column is an outlier
    Filter,
    /// Replace outliers with the nearest bound
    Clip,
}

/// How outlier bounds are derived from a column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutlierRule {
    /// `[Q1 - k*IQR, Q3 + k*IQR]`
    Iqr {
        #[serde(default = "default_iqr_multiplier")]
        multiplier: f64,
    },
    /// `[quantile(lower), quantile(upper)]`, e.g. 5%/95% winsorization
    Percentile { lower: f64, upper: f64 },
}

fn default_iqr_multiplier() -> f64 {
    1.5
}

impl Default for OutlierRule {
    fn default() -> Self {
        Self::Iqr {
            multiplier: default_iqr_multiplier(),
        }
    }
}

/// Quantile estimator used for outlier bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuantileMethod {
    /// Smallest value whose rank covers `p * n`
    #[default]
    NearestRank,
    /// Linear interpolation between order statistics
    Linear,
}

/// Behavior when a column to normalize has zero variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZeroVariancePolicy {
    /// Fail with a degenerate column error
    #[default]
    Fail,
    /// Leave the column unscaled
    Identity,
}

/// Restricts a stage to the rows where `column` reads as `equals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSubset {
    pub column: String,
    pub equals: String,
}

impl RowSubset {
    pub fn new(column: impl Into<String>, equals: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            equals: equals.into(),
        }
    }
}

// ============================================================================
// Column Specs
// ============================================================================

/// Declaration and cleaning policy of one source column.
///
/// `name` is the column name in the source file. Every later stage refers to
/// the column by its output name ([`ColumnSpec::output_name`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ColumnKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
    #[serde(default)]
    pub missing: MissingPolicy,
    #[serde(default)]
    pub outliers: bool,
    #[serde(default)]
    pub encoding: EncodingPolicy,
    #[serde(default)]
    pub normalize: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            rename: None,
            missing: MissingPolicy::default(),
            outliers: false,
            encoding: EncodingPolicy::default(),
            normalize: false,
        }
    }

    pub fn numeric(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Numeric)
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Categorical)
    }

    pub fn ordinal(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Ordinal)
    }

    pub fn renamed(mut self, to: impl Into<String>) -> Self {
        self.rename = Some(to.into());
        self
    }

    pub fn with_missing(mut self, policy: MissingPolicy) -> Self {
        self.missing = policy;
        self
    }

    pub fn with_outliers(mut self) -> Self {
        self.outliers = true;
        self
    }

    pub fn encoded(mut self) -> Self {
        self.encoding = EncodingPolicy::FirstSeen;
        self
    }

    pub fn encoded_as<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.encoding = EncodingPolicy::Explicit(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn normalized(mut self) -> Self {
        self.normalize = true;
        self
    }

    /// Name of the column after renaming.
    pub fn output_name(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.name)
    }
}

// ============================================================================
// Stage Sections
// ============================================================================

/// Options for reading the source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Field delimiter (single ASCII character). Default: ','
    pub delimiter: char,
    /// Trim surrounding whitespace from text cells. Default: true
    pub trim_whitespace: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            trim_whitespace: true,
        }
    }
}

/// Missing-value markers and the label used for unknown categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissingConfig {
    /// Placeholder strings that mean "missing". Blank cells always do.
    pub sentinels: Vec<String>,
    /// Literal written by the `unknown_label` policy. Default: "Unknown"
    pub unknown_label: String,
    /// Compare sentinels ignoring surrounding whitespace. Default: true
    pub match_trimmed: bool,
}

impl Default for MissingConfig {
    fn default() -> Self {
        Self {
            sentinels: Vec::new(),
            unknown_label: "Unknown".to_string(),
            match_trimmed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OutlierConfig {
    pub mode: OutlierMode,
    pub rule: OutlierRule,
    pub quantile_method: QuantileMethod,
    /// Per-column row subsets restricting both fitting and classification.
    pub subsets: BTreeMap<String, RowSubset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Suffix of the encoded column name. Default: "_code"
    pub suffix: String,
    /// Code returned for labels not seen during fit. Default: None (fail)
    pub unseen_code: Option<u32>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            suffix: "_code".to_string(),
            unseen_code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScalingConfig {
    pub zero_variance: ZeroVariancePolicy,
    /// Fit mean/std on this subset only; transform every row.
    pub subset: Option<RowSubset>,
}

/// A `(group, value)` column pair for grouped statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub group: String,
    pub value: String,
}

impl GroupSpec {
    pub fn new(group: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            value: value.into(),
        }
    }
}

/// Descriptive statistics computed on the final table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Labels ignored by distinct counts (e.g. the unknown label).
    pub exclude_labels: Vec<String>,
    /// Columns whose value counts are reported.
    pub value_counts: Vec<String>,
    /// `group` rows × `value` columns.
    pub crosstabs: Vec<GroupSpec>,
    /// Mean of `value` per `group`.
    pub group_means: Vec<GroupSpec>,
    /// Distinct `value`s per `group`.
    pub group_distinct: Vec<GroupSpec>,
    /// Numeric columns of the correlation matrix.
    pub correlations: Vec<String>,
}

impl StatisticsConfig {
    pub fn is_empty(&self) -> bool {
        self.value_counts.is_empty()
            && self.crosstabs.is_empty()
            && self.group_means.is_empty()
            && self.group_distinct.is_empty()
            && self.correlations.is_empty()
    }
}

// ============================================================================
// Pipeline Config
// ============================================================================

/// Configuration for one dataset's cleaning pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use eda_prep::config::{ColumnSpec, MissingPolicy, OutlierMode, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .column(ColumnSpec::numeric("Age").renamed("Idade").with_outliers())
///     .column(ColumnSpec::categorical("Sex").renamed("Sexo").encoded())
///     .outlier_mode(OutlierMode::Filter)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub load: LoadConfig,

    /// Declared columns. Undeclared source columns are kept as categorical.
    pub columns: Vec<ColumnSpec>,

    /// Value relabels per column (output name), old label → new label.
    pub value_maps: BTreeMap<String, BTreeMap<String, String>>,

    pub missing: MissingConfig,
    pub outliers: OutlierConfig,
    pub encoding: EncodingConfig,
    pub scaling: ScalingConfig,

    /// Derived features, computed in order after every cleaning stage.
    pub derivations: Vec<DerivationSpec>,

    pub statistics: StatisticsConfig,

    /// Output directory for the cleaned table and run report.
    /// Default: None (current directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Output file name without extension. Default: None ("cleaned_dataset")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PrepError::NotFound(path.display().to_string()));
        }
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| e.with_context(format!("Config '{}'", path.display())))
    }

    /// Spec of a column by its output name.
    pub fn spec_for(&self, output_name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.output_name() == output_name)
    }

    /// Source name → new name for every renamed column.
    pub fn rename_map(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .filter_map(|c| c.rename.as_ref().map(|to| (c.name.clone(), to.clone())))
            .collect()
    }

    /// Output names of the columns checked for outliers.
    pub fn outlier_columns(&self) -> Vec<String> {
        self.outputs_where(|c| c.outliers)
    }

    /// Output names of the columns to normalize.
    pub fn normalize_columns(&self) -> Vec<String> {
        self.outputs_where(|c| c.normalize)
    }

    fn outputs_where(&self, pred: impl Fn(&ColumnSpec) -> bool) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| pred(c))
            .map(|c| c.output_name().to_string())
            .collect()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        if !self.load.delimiter.is_ascii() {
            return Err(ConfigValidationError::InvalidDelimiter(self.load.delimiter));
        }

        let mut sources = HashSet::new();
        let mut outputs = HashSet::new();
        for spec in &self.columns {
            if !sources.insert(spec.name.as_str()) {
                return Err(ConfigValidationError::DuplicateColumn(spec.name.clone()));
            }
            if !outputs.insert(spec.output_name()) {
                return Err(ConfigValidationError::DuplicateColumn(
                    spec.output_name().to_string(),
                ));
            }
            self.validate_column(spec)?;
        }

        match self.outliers.rule {
            OutlierRule::Iqr { multiplier } => {
                if !multiplier.is_finite() || multiplier < 0.0 {
                    return Err(ConfigValidationError::InvalidMultiplier(multiplier));
                }
            }
            OutlierRule::Percentile { lower, upper } => {
                if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower >= upper
                {
                    return Err(ConfigValidationError::InvalidPercentiles { lower, upper });
                }
            }
        }

        if self.encoding.suffix.is_empty() {
            return Err(ConfigValidationError::EmptyField("encoding.suffix"));
        }
        if self.missing.unknown_label.is_empty() {
            return Err(ConfigValidationError::EmptyField("missing.unknown_label"));
        }

        for derivation in &self.derivations {
            derivation.validate()?;
        }

        Ok(())
    }

    fn validate_column(&self, spec: &ColumnSpec) -> std::result::Result<(), ConfigValidationError> {
        let invalid = |setting: &str| ConfigValidationError::InvalidPolicy {
            column: spec.name.clone(),
            setting: setting.to_string(),
            kind: spec.kind,
        };

        if spec.kind == ColumnKind::Code {
            return Err(invalid("kind"));
        }
        if !spec.missing.supports(spec.kind) {
            return Err(invalid(&format!("missing = {}", spec.missing.as_str())));
        }
        if let MissingPolicy::Constant(value) = &spec.missing
            && spec.kind == ColumnKind::Numeric
            && parse_numeric_string(value).is_none()
        {
            return Err(invalid("missing = constant (not a number)"));
        }
        if spec.outliers && spec.kind != ColumnKind::Numeric {
            return Err(invalid("outliers"));
        }
        if spec.normalize && spec.kind != ColumnKind::Numeric {
            return Err(invalid("normalize"));
        }
        if spec.encoding.is_enabled() && !spec.kind.is_text() {
            return Err(invalid("encoding"));
        }
        if let EncodingPolicy::Explicit(labels) = &spec.encoding {
            let mut seen = HashSet::new();
            if labels.is_empty() || !labels.iter().all(|l| seen.insert(l)) {
                return Err(invalid("encoding labels (empty or repeated)"));
            }
        }
        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid delimiter {0:?} (must be a single ASCII character)")]
    InvalidDelimiter(char),

    #[error("Column '{0}' is declared more than once")]
    DuplicateColumn(String),

    #[error("Column '{column}' ({kind}): unsupported setting '{setting}'")]
    InvalidPolicy {
        column: String,
        setting: String,
        kind: ColumnKind,
    },

    #[error("Invalid IQR multiplier: {0} (must be finite and non-negative)")]
    InvalidMultiplier(f64),

    #[error("Invalid percentiles: lower {lower}, upper {upper} (need 0 <= lower < upper <= 1)")]
    InvalidPercentiles { lower: f64, upper: f64 },

    #[error("'{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("Invalid derivation '{name}': {reason}")]
    InvalidDerivation { name: String, reason: String },
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`PipelineConfig`].
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    delimiter: Option<char>,
    trim_whitespace: Option<bool>,
    columns: Vec<ColumnSpec>,
    value_maps: BTreeMap<String, BTreeMap<String, String>>,
    sentinels: Option<Vec<String>>,
    unknown_label: Option<String>,
    match_trimmed: Option<bool>,
    outlier_mode: Option<OutlierMode>,
    outlier_rule: Option<OutlierRule>,
    quantile_method: Option<QuantileMethod>,
    outlier_subsets: BTreeMap<String, RowSubset>,
    encoding_suffix: Option<String>,
    unseen_code: Option<u32>,
    zero_variance: Option<ZeroVariancePolicy>,
    scaling_subset: Option<RowSubset>,
    derivations: Vec<DerivationSpec>,
    statistics: Option<StatisticsConfig>,
    output_dir: Option<PathBuf>,
    output_name: Option<String>,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn trim_whitespace(mut self, trim: bool) -> Self {
        self.trim_whitespace = Some(trim);
        self
    }

    /// Declare a column.
    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.columns.push(spec);
        self
    }

    /// Relabel values of a column (by output name).
    pub fn value_map<I, K, V>(mut self, column: impl Into<String>, map: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.value_maps
            .entry(column.into())
            .or_default()
            .extend(map.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn sentinels<I, S>(mut self, sentinels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sentinels = Some(sentinels.into_iter().map(Into::into).collect());
        self
    }

    pub fn unknown_label(mut self, label: impl Into<String>) -> Self {
        self.unknown_label = Some(label.into());
        self
    }

    /// Whether `" ?"` counts as the sentinel `"?"`.
    pub fn match_trimmed(mut self, match_trimmed: bool) -> Self {
        self.match_trimmed = Some(match_trimmed);
        self
    }

    pub fn outlier_mode(mut self, mode: OutlierMode) -> Self {
        self.outlier_mode = Some(mode);
        self
    }

    pub fn outlier_rule(mut self, rule: OutlierRule) -> Self {
        self.outlier_rule = Some(rule);
        self
    }

    pub fn quantile_method(mut self, method: QuantileMethod) -> Self {
        self.quantile_method = Some(method);
        self
    }

    /// Restrict outlier fitting and classification of `column` to a subset.
    pub fn outlier_subset(mut self, column: impl Into<String>, subset: RowSubset) -> Self {
        self.outlier_subsets.insert(column.into(), subset);
        self
    }

    pub fn encoding_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.encoding_suffix = Some(suffix.into());
        self
    }

    pub fn unseen_code(mut self, code: u32) -> Self {
        self.unseen_code = Some(code);
        self
    }

    pub fn zero_variance(mut self, policy: ZeroVariancePolicy) -> Self {
        self.zero_variance = Some(policy);
        self
    }

    pub fn scaling_subset(mut self, subset: RowSubset) -> Self {
        self.scaling_subset = Some(subset);
        self
    }

    pub fn derivation(mut self, spec: DerivationSpec) -> Self {
        self.derivations.push(spec);
        self
    }

    pub fn statistics(mut self, statistics: StatisticsConfig) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> std::result::Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();

        let config = PipelineConfig {
            load: LoadConfig {
                delimiter: self.delimiter.unwrap_or(defaults.load.delimiter),
                trim_whitespace: self.trim_whitespace.unwrap_or(defaults.load.trim_whitespace),
            },
            columns: self.columns,
            value_maps: self.value_maps,
            missing: MissingConfig {
                sentinels: self.sentinels.unwrap_or(defaults.missing.sentinels),
                unknown_label: self.unknown_label.unwrap_or(defaults.missing.unknown_label),
                match_trimmed: self.match_trimmed.unwrap_or(defaults.missing.match_trimmed),
            },
            outliers: OutlierConfig {
                mode: self.outlier_mode.unwrap_or_default(),
                rule: self.outlier_rule.unwrap_or_default(),
                quantile_method: self.quantile_method.unwrap_or_default(),
                subsets: self.outlier_subsets,
            },
            encoding: EncodingConfig {
                suffix: self.encoding_suffix.unwrap_or(defaults.encoding.suffix),
                unseen_code: self.unseen_code,
            },
            scaling: ScalingConfig {
                zero_variance: self.zero_variance.unwrap_or_default(),
                subset: self.scaling_subset,
            },
            derivations: self.derivations,
            statistics: self.statistics.unwrap_or_default(),
            output_dir: self.output_dir,
            output_name: self.output_name,
        };

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
