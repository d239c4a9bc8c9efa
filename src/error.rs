//! Error types for the immunoprofile library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum ImmunoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A raw input record carried a malformed or missing field.
    #[error("Invalid value '{value}' for field '{field}' in record {record}: {reason}")]
    Validation {
        record: usize,
        field: String,
        value: String,
        reason: String,
    },

    /// A uniqueness or referential constraint was violated.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// A prediction request was missing or carried malformed features.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImmunoError {
    /// Per-record failures that a bulk load skips instead of aborting on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ImmunoError::Validation { .. })
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, ImmunoError>;
