// src/error.rs

use thiserror::Error;

/// Errors a stage hands back to the host. Drops are not errors, see [`crate::Outcome`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not fetch value for key: {field}")]
    MissingField { field: String },

    #[error("field '{field}' has type {actual}, expected {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("malformed log line, expected format: {expected}")]
    LogFormat { expected: String },

    #[error("failed to compute field: {0}")]
    Compute(String),

    #[error("failed to decode envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid configuration for {processor}: {message}")]
    Config { processor: String, message: String },
}

impl Error {
    pub(crate) fn missing(field: &str) -> Self {
        Error::MissingField {
            field: field.to_string(),
        }
    }

    pub(crate) fn config(processor: &str, message: impl ToString) -> Self {
        Error::Config {
            processor: processor.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
