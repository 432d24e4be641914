//! Delimited-file loading.
//!
//! The file is checked for consistent field counts first, then read by
//! polars with every column as text. Declared numeric columns are parsed
//! afterwards so a bad cell can be reported by row and column instead of
//! being silently inferred as text.

use crate::config::{ColumnSpec, PipelineConfig};
use crate::error::{PrepError, Result, ResultExt};
use crate::types::{ColumnKind, Table};
use crate::utils::{is_numeric_dtype, is_sentinel, parse_numeric_string};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options for [`TableLoader`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub delimiter: u8,
    pub trim_whitespace: bool,
    /// Cells equal to one of these parse as missing in numeric columns.
    pub sentinels: Vec<String>,
    pub match_trimmed: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            trim_whitespace: true,
            sentinels: Vec::new(),
            match_trimmed: true,
        }
    }
}

impl LoadOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            // ASCII is checked by config validation
            delimiter: config.load.delimiter as u8,
            trim_whitespace: config.load.trim_whitespace,
            sentinels: config.missing.sentinels.clone(),
            match_trimmed: config.missing.match_trimmed,
        }
    }
}

/// Reads a delimited file with a header row into a [`Table`].
#[derive(Debug, Clone, Default)]
pub struct TableLoader {
    options: LoadOptions,
}

impl TableLoader {
    pub fn new(options: LoadOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Load `path`, typing columns according to `specs` (by source name).
    ///
    /// Fails with `NotFound` if the file is absent, `Format` on ragged rows
    /// or unparseable numeric cells, and `Schema` if a declared column is
    /// not in the header.
    pub fn load(&self, path: impl AsRef<Path>, specs: &[ColumnSpec]) -> Result<Table> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PrepError::NotFound(path.display().to_string()));
        }

        let content = String::from_utf8(std::fs::read(path)?).map_err(|e| {
            PrepError::Format(format!("{} is not valid UTF-8: {}", path.display(), e))
        })?;
        let (header_fields, rows) = check_field_counts(&content, self.options.delimiter)?;
        debug!(
            "Pre-scan of {}: {} fields, {} data rows",
            path.display(),
            header_fields,
            rows
        );

        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .with_parse_options(
                CsvParseOptions::default()
                    .with_separator(self.options.delimiter)
                    .with_quote_char(Some(b'"')),
            )
            .try_into_reader_with_file_path(Some(PathBuf::from(path)))
            .context("Opening source")?
            .finish()
            .map_err(|e| PrepError::Format(e.to_string()))?;

        let table = self.apply_specs(frame, specs)?;
        info!(
            "Loaded {} rows x {} columns from {}",
            table.height(),
            table.width(),
            path.display()
        );
        Ok(table)
    }

    /// Type an in-memory frame according to `specs`.
    ///
    /// Text columns declared numeric are parsed like file cells; columns
    /// that are already numeric are cast.
    pub fn apply_specs(&self, frame: DataFrame, specs: &[ColumnSpec]) -> Result<Table> {
        let mut frame = frame;
        let declared: HashMap<&str, &ColumnSpec> =
            specs.iter().map(|s| (s.name.as_str(), s)).collect();

        for spec in specs {
            if frame.column(&spec.name).is_err() {
                return Err(PrepError::Schema(format!(
                    "Declared column '{}' not found in source",
                    spec.name
                )));
            }
        }

        let names: Vec<String> = frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut kinds = HashMap::with_capacity(names.len());

        for name in &names {
            let kind = declared
                .get(name.as_str())
                .map(|s| s.kind)
                .unwrap_or(ColumnKind::Categorical);
            let series = frame.column(name)?.as_materialized_series().clone();

            let typed = match kind {
                ColumnKind::Numeric => self.parse_numeric(&series)?,
                ColumnKind::Categorical | ColumnKind::Ordinal => self.clean_text(&series)?,
                ColumnKind::Code => {
                    return Err(PrepError::Schema(format!(
                        "Column '{}' cannot be loaded as codes",
                        name
                    )));
                }
            };
            frame.replace(name, typed)?;
            kinds.insert(name.clone(), kind);
        }

        Table::new(frame, kinds)
    }

    fn parse_numeric(&self, series: &Series) -> Result<Series> {
        let name = series.name().to_string();
        if is_numeric_dtype(series.dtype()) {
            return Ok(series.cast(&DataType::Float64)?);
        }
        if series.dtype() != &DataType::String {
            return Err(PrepError::Schema(format!(
                "Column '{}' of dtype {} cannot be read as numeric",
                name,
                series.dtype()
            )));
        }

        let mut values: Vec<Option<f64>> = Vec::with_capacity(series.len());
        for (row, cell) in series.str()?.into_iter().enumerate() {
            let parsed = match cell {
                None => None,
                Some(s) if is_sentinel(s, &self.options.sentinels, self.options.match_trimmed) => {
                    None
                }
                Some(s) => Some(parse_numeric_string(s).ok_or_else(|| {
                    PrepError::Format(format!(
                        "Column '{}' row {}: '{}' is not a number",
                        name,
                        row + 1,
                        s
                    ))
                })?),
            };
            values.push(parsed);
        }
        Ok(Series::new(name.into(), values))
    }

    fn clean_text(&self, series: &Series) -> Result<Series> {
        let series = series.cast(&DataType::String)?;
        if !self.options.trim_whitespace {
            return Ok(series);
        }
        let trimmed: Vec<Option<String>> = series
            .str()?
            .into_iter()
            .map(|v| v.map(|s| s.trim().to_string()))
            .collect();
        Ok(Series::new(series.name().clone(), trimmed))
    }
}

/// Count fields per record, honouring double-quoted fields.
///
/// Returns the header field count and the number of data rows, or a format
/// error naming the first ragged row.
fn check_field_counts(content: &str, delimiter: u8) -> Result<(usize, usize)> {
    let mut header: Option<usize> = None;
    let mut data_rows = 0usize;
    let mut fields = 1usize;
    let mut in_quotes = false;
    let mut record_empty = true;

    let mut finish_record = |fields: usize, empty: bool| -> Result<()> {
        if empty {
            return Ok(());
        }
        match header {
            None => header = Some(fields),
            Some(expected) => {
                data_rows += 1;
                if fields != expected {
                    return Err(PrepError::Format(format!(
                        "Row {} has {} fields, header has {}",
                        data_rows, fields, expected
                    )));
                }
            }
        }
        Ok(())
    };

    for &byte in content.as_bytes() {
        match byte {
            b'"' => {
                in_quotes = !in_quotes;
                record_empty = false;
            }
            b'\n' if !in_quotes => {
                finish_record(fields, record_empty)?;
                fields = 1;
                record_empty = true;
            }
            b'\r' if !in_quotes => {}
            b if b == delimiter && !in_quotes => {
                fields += 1;
                record_empty = false;
            }
            b if !b.is_ascii_whitespace() => record_empty = false,
            _ => {}
        }
    }

    if in_quotes {
        return Err(PrepError::Format("Unterminated quoted field".to_string()));
    }
    finish_record(fields, record_empty)?;

    match header {
        Some(count) => Ok((count, data_rows)),
        None => Err(PrepError::Format("Source has no header row".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("eda_prep_loader_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_check_field_counts() {
        assert_eq!(check_field_counts("a,b\n1,2\n3,4\n", b',').unwrap(), (2, 2));
        assert_eq!(check_field_counts("a,b\r\n1,2\r\n\n", b',').unwrap(), (2, 1));
        assert_eq!(
            check_field_counts("name,age\n\"Braund, Mr. Owen\",22\n", b',').unwrap(),
            (2, 1)
        );
        assert_eq!(check_field_counts("a;b\n1;2\n", b';').unwrap(), (2, 1));
    }

    #[test]
    fn test_check_field_counts_ragged() {
        let err = check_field_counts("a,b,c\n1,2,3\n4,5\n", b',').unwrap_err();
        assert!(matches!(err, PrepError::Format(_)));
        assert!(err.to_string().contains("Row 2"));
    }

    #[test]
    fn test_check_field_counts_unterminated_quote() {
        assert!(check_field_counts("a,b\n\"x,2\n", b',').is_err());
        assert!(check_field_counts("", b',').is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = TableLoader::default()
            .load("no/such/file.csv", &[])
            .unwrap_err();
        assert!(matches!(err, PrepError::NotFound(_)));
    }

    #[test]
    fn test_load_types_columns() {
        let path = write_temp(
            "typed.csv",
            "Name,Age,Fare\n\"Braund, Mr. Owen\",22,7.25\n\"  Heikkinen, Miss. Laina \",,7.925\n",
        );
        let specs = [ColumnSpec::numeric("Age"), ColumnSpec::numeric("Fare")];
        let table = TableLoader::default().load(&path, &specs).unwrap();

        assert_eq!(table.height(), 2);
        assert_eq!(table.kind("Name"), Some(ColumnKind::Categorical));
        assert_eq!(table.numeric("Age").unwrap(), vec![Some(22.0), None]);
        assert_eq!(
            table.text("Name").unwrap()[1].as_deref(),
            Some("Heikkinen, Miss. Laina")
        );
    }

    #[test]
    fn test_load_sentinel_in_numeric_column() {
        let path = write_temp("sentinel.csv", "age,hours\n39, ?\n50,40\n");
        let options = LoadOptions {
            sentinels: vec!["?".to_string()],
            ..LoadOptions::default()
        };
        let specs = [ColumnSpec::numeric("age"), ColumnSpec::numeric("hours")];
        let table = TableLoader::new(options).load(&path, &specs).unwrap();
        assert_eq!(table.numeric("hours").unwrap(), vec![None, Some(40.0)]);
    }

    #[test]
    fn test_load_bad_numeric_cell() {
        let path = write_temp("bad_numeric.csv", "age\n39\nthirty\n");
        let err = TableLoader::default()
            .load(&path, &[ColumnSpec::numeric("age")])
            .unwrap_err();
        assert!(matches!(err, PrepError::Format(_)));
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn test_load_non_utf8_is_format_error() {
        let path = write_temp("latin1.csv", "");
        // "São" in Latin-1
        std::fs::write(&path, b"cidade\nS\xe3o Paulo\n").unwrap();
        let err = TableLoader::default().load(&path, &[]).unwrap_err();
        assert!(matches!(err, PrepError::Format(_)));
        assert_eq!(err.error_code(), "FORMAT_ERROR");
    }

    #[test]
    fn test_load_unknown_declared_column() {
        let path = write_temp("unknown_col.csv", "a,b\n1,2\n");
        let err = TableLoader::default()
            .load(&path, &[ColumnSpec::numeric("c")])
            .unwrap_err();
        assert!(matches!(err, PrepError::Schema(_)));
    }

    #[test]
    fn test_apply_specs_on_frame() {
        let df = df![
            "Pclass" => [1i64, 3, 2],
            "Sex" => [" male", "female ", "female"],
        ]
        .unwrap();
        let table = TableLoader::default()
            .apply_specs(df, &[ColumnSpec::numeric("Pclass")])
            .unwrap();
        assert_eq!(table.numeric("Pclass").unwrap(), vec![Some(1.0), Some(3.0), Some(2.0)]);
        assert_eq!(table.text("Sex").unwrap()[0].as_deref(), Some("male"));
    }
}
