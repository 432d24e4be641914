//! Error types for the cleaning and feature-derivation pipeline.
//!
//! Every stage fails fast with one of these variants. Nothing is swallowed:
//! a stage either returns a consistent [`Table`](crate::Table) or an error,
//! and the caller's input table is left untouched.
//!
//! Errors are serializable so the CLI can embed them in JSON output.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the pipeline.
#[derive(Error, Debug)]
pub enum PrepError {
    /// The source file does not exist.
    #[error("Source not found: {0}")]
    NotFound(String),

    /// The source is malformed (ragged rows, unparseable numeric cells).
    #[error("Malformed table: {0}")]
    Format(String),

    /// Column name collision or reference to an unknown column.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Not enough non-missing values to compute a statistic.
    #[error("Column '{column}' has {available} non-missing values, {required} required")]
    InsufficientData {
        column: String,
        available: usize,
        required: usize,
    },

    /// Zero-variance column under the `fail` scaling policy.
    #[error("Column '{column}' has zero variance (std = {std}) and cannot be normalized")]
    DegenerateColumn { column: String, std: f64 },

    /// A value (or code) was not seen when the encoder was fitted.
    #[error("Unknown category '{value}' for column '{column}'")]
    UnknownCategory { column: String, value: String },

    /// A derivation requires a column that is absent or of the wrong kind.
    #[error("Derivation '{derivation}' requires column '{column}' ({expected})")]
    MissingDependency {
        derivation: String,
        column: String,
        expected: String,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid extraction pattern.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PrepError>,
    },
}

impl PrepError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PrepError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Unwrap any context layers and return the underlying error.
    pub fn root(&self) -> &PrepError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable error code, preserved through context layers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Format(_) => "FORMAT_ERROR",
            Self::Schema(_) => "SCHEMA_ERROR",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::DegenerateColumn { .. } => "DEGENERATE_COLUMN",
            Self::UnknownCategory { .. } => "UNKNOWN_CATEGORY",
            Self::MissingDependency { .. } => "MISSING_DEPENDENCY",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Regex(_) => "REGEX_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error was caused by the input data rather than by
    /// configuration or the environment.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self.root(),
            Self::Format(_)
                | Self::InsufficientData { .. }
                | Self::DegenerateColumn { .. }
                | Self::UnknownCategory { .. }
        )
    }
}

impl From<crate::config::ConfigValidationError> for PrepError {
    fn from(err: crate::config::ConfigValidationError) -> Self {
        PrepError::InvalidConfig(err.to_string())
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for PrepError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PrepError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PrepError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PrepError::Polars(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(PrepError::NotFound("a.csv".into()).error_code(), "NOT_FOUND");
        assert_eq!(
            PrepError::Schema("collision".to_string()).error_code(),
            "SCHEMA_ERROR"
        );
        assert_eq!(
            PrepError::DegenerateColumn {
                column: "x".into(),
                std: 0.0
            }
            .error_code(),
            "DEGENERATE_COLUMN"
        );
    }

    #[test]
    fn test_is_data_error() {
        assert!(PrepError::Format("ragged".into()).is_data_error());
        assert!(
            PrepError::UnknownCategory {
                column: "pet".into(),
                value: "fish".into()
            }
            .is_data_error()
        );
        assert!(!PrepError::InvalidConfig("bad".into()).is_data_error());
    }

    #[test]
    fn test_error_serialization() {
        let error = PrepError::Schema("Column 'Idade' already exists".to_string());
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("SCHEMA_ERROR"));
        assert!(json.contains("Idade"));
    }

    #[test]
    fn test_with_context() {
        let error = PrepError::Schema("unknown column 'Age'".to_string())
            .with_context("Column normalization");
        assert!(error.to_string().contains("Column normalization"));
        assert_eq!(error.error_code(), "SCHEMA_ERROR");
        assert!(matches!(error.root(), PrepError::Schema(_)));
    }

    #[test]
    fn test_nested_context_root() {
        let error = PrepError::Format("bad row".into())
            .with_context("inner")
            .with_context("outer");
        assert!(matches!(error.root(), PrepError::Format(_)));
        assert!(error.is_data_error());
    }
}
