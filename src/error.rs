//! Error types for the extrema analysis core.

use thiserror::Error;

/// Main error type for analysis runs.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Insufficient data: required {required} bars, available {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl AnalysisError {
    /// Shorthand for building a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        AnalysisError::InvalidConfiguration(msg.into())
    }
}

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;
