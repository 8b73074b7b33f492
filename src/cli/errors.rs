//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit status.

use std::io;

use thiserror::Error;

use crate::bson::CodecError;
use crate::expr::TranslateError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Query rejected: {0}")]
    Translate(TranslateError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "DOCPIPE_CLI_CONFIG_ERROR",
            CliError::Translate(_) => "DOCPIPE_CLI_TRANSLATE_ERROR",
            CliError::Codec(_) => "DOCPIPE_CLI_CODEC_ERROR",
            CliError::Io(_) => "DOCPIPE_CLI_IO_ERROR",
            CliError::Json(_) => "DOCPIPE_CLI_JSON_ERROR",
        }
    }

    /// Code of the underlying error, when there is one
    pub fn source_code(&self) -> Option<&'static str> {
        match self {
            CliError::Translate(e) => Some(e.code()),
            CliError::Codec(e) => Some(e.code()),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl From<TranslateError> for CliError {
    fn from(e: TranslateError) -> Self {
        match e {
            TranslateError::InvalidConfig(message) => CliError::Config(message),
            other => CliError::Translate(other),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
