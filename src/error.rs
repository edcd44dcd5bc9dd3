//! Error types for the benchdb library.
//!
//! This module provides custom error types using `thiserror` so that schema,
//! query and storage failures stay distinguishable all the way up to the CLI.

use thiserror::Error;

use crate::query::Rule;

/// Errors that can occur in the benchdb library.
#[derive(Error, Debug)]
pub enum BenchDbError {
    /// Invalid feature name, unknown feature, incompatible merge or duplicate creation
    #[error("Schema error: {0}")]
    Schema(String),

    /// Malformed filter expression
    #[error("Query parse error: {0}")]
    QueryParse(String),

    /// The storage engine rejected a statement
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A feature extractor reported a configuration-level failure; aborts a run
    #[error("Computation failure: {0}")]
    Computation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with `BenchDbError`
pub type Result<T> = std::result::Result<T, BenchDbError>;

impl From<anyhow::Error> for BenchDbError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<pest::error::Error<Rule>> for BenchDbError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        Self::QueryParse(err.to_string())
    }
}

impl BenchDbError {
    /// Shorthand for a [`BenchDbError::Schema`] error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }
}
