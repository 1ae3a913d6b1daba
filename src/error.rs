//! Typed parse failures.
//!
//! Application seams (CLI, config, database) use `anyhow`; the parsers use
//! [`ParseError`] so the batch driver can report each failure per
//! conversation without unwinding the batch.

use thiserror::Error;

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected structure: {0}")]
    Structure(String),

    #[error("{0}")]
    MissingSession(String),

    #[error("identity derivation failed: {0}")]
    Identity(String),

    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}

impl ParseError {
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure(message.into())
    }

    pub fn missing_session(message: impl Into<String>) -> Self {
        Self::MissingSession(message.into())
    }

    pub fn identity(message: impl Into<String>) -> Self {
        Self::Identity(message.into())
    }
}
