//! Error taxonomy of the chat pipeline.
//!
//! Each variant is one failure category a caller must be able to tell apart:
//! the HTTP layer maps them to distinct status codes and the machine codes
//! returned by [`Error::code`]. Plumbing below the pipeline (config, CLI,
//! provider HTTP calls) stays on `anyhow` and is converted at the component
//! boundary.

use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("ingest failed for '{source_id}': {message}")]
    Ingest { source_id: String, message: String },

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("storage failed: {0}")]
    Storage(String),

    #[error("model call failed: {0}")]
    Model(String),

    #[error("invalid prompt template: {0}")]
    Template(String),

    #[error("unauthorized: {0}")]
    Auth(String),
}

impl Error {
    pub fn ingest(source_id: &str, err: impl Display) -> Self {
        Self::Ingest {
            source_id: source_id.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub fn retrieval(err: impl Display) -> Self {
        Self::Retrieval(format!("{:#}", err))
    }

    pub fn storage(err: impl Display) -> Self {
        Self::Storage(format!("{:#}", err))
    }

    pub fn model(err: impl Display) -> Self {
        Self::Model(format!("{:#}", err))
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ingest { .. } => "ingest_error",
            Self::Retrieval(_) => "retrieval_error",
            Self::Storage(_) => "storage_error",
            Self::Model(_) => "model_error",
            Self::Template(_) => "template_error",
            Self::Auth(_) => "unauthorized",
        }
    }
}

/// `{code, message}` pair as it appears in API bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
