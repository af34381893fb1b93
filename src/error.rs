//! Error types for the ETL pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for the ETL pipeline
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("malformed input in {}: {detail}", .path.display())]
    InputMalformed { path: PathBuf, detail: String },

    #[error("column '{column}' missing from table '{table}'")]
    MissingColumn { table: String, column: String },

    #[error("cannot parse '{value}' in column '{column}' as a timestamp")]
    DateParse { column: String, value: String },

    #[error("no parseable dates left in column '{0}' after dropping bad rows")]
    EmptyAfterDateFilter(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn missing_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::MissingColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::InputMalformed {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
