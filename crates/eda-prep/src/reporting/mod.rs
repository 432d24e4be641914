//! Output files of a run.
//!
//! [`ReportGenerator`] writes the cleaned table as CSV, the fitted state as
//! JSON and a [`RunReport`] describing everything the run did. The same
//! report backs the CLI's `--json` output.

mod generator;

pub use generator::{
    ColumnEntry, ReportGenerator, RunReport, RunSummaryReport, DEFAULT_OUTPUT_NAME,
};
