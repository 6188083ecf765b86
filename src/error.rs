//! Error taxonomy for a conversion job.
//!
//! Every variant except the transparent I/O wrappers maps to one fatal
//! condition of the job. Non-fatal conditions (unparseable numbers, a missing
//! prior output file) never surface here; they are absorbed where they occur.

/// The result type used by the conversion core.
pub type Result<T> = std::result::Result<T, ConvertError>;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// A raw row carried fewer positional values than the schema has fields.
    #[error("expected {expected} fields, but received only {actual} : {row}")]
    RowShape {
        expected: usize,
        actual: usize,
        row: String,
    },

    /// A value could not be coerced into its field's logical type.
    #[error("{message} on record {row} at field {field} with value {value}")]
    Parse {
        message: String,
        row: String,
        field: String,
        value: String,
    },

    /// Nothing was read from either the input or the prior output.
    #[error("no rows were processed from {source_name}")]
    EmptyInput { source_name: String },

    /// The schema document is malformed or unsupported.
    #[error("invalid schema: {0}")]
    Schema(String),

    /// A non-nullable field was left unset.
    #[error("field '{field}' does not accept null")]
    MissingValue { field: String },

    /// A column's values do not match the type the schema resolves to,
    /// typically a prior output written with a different schema.
    #[error("column '{field}' is incompatible: {message}")]
    ColumnMismatch { field: String, message: String },

    /// New input arrived after prior records started flowing.
    #[error("new rows cannot be converted once merging has started")]
    ConvertAfterMerge,

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// Failure to coerce one raw text value.
///
/// Only date, timestamp and decimal parsing produce this; the remaining
/// numeric types fall back to zero instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unparseable {expected}: \"{value}\" ({reason})")]
pub struct ParseError {
    pub expected: &'static str,
    pub value: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(expected: &'static str, value: &str, reason: impl ToString) -> Self {
        Self {
            expected,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
