//! Error taxonomy for the valuation and sourcing pipeline

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValuationError {
    /// Missing or invalid required input field. Never retried.
    #[error("invalid input for {field}: {reason}")]
    Input { field: &'static str, reason: String },

    /// Not enough usable data to produce a number. Never retried.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Every candidate source was blocked or failed.
    #[error("no source available (blocked: [{}], failed: [{}])", .blocked.join(", "), .failed.join(", "))]
    SourceUnavailable {
        blocked: Vec<String>,
        failed: Vec<String>,
    },

    /// A single transport attempt failed before a response arrived
    #[error("transport error calling {source_id}: {message}")]
    Transport { source_id: String, message: String },

    /// Provider answered with a non-success status
    #[error("{source_id} returned HTTP {status}")]
    Http { source_id: String, status: u16 },

    #[error("failed to parse provider payload: {0}")]
    Parse(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ValuationError {
    pub fn input(field: &'static str, reason: impl Into<String>) -> Self {
        ValuationError::Input {
            field,
            reason: reason.into(),
        }
    }

    /// Whether a retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ValuationError::Transport { .. } => true,
            ValuationError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ValuationError::Input { .. } => ErrorKind::InputError,
            ValuationError::InsufficientData(_) => ErrorKind::InsufficientDataError,
            ValuationError::SourceUnavailable { .. } => ErrorKind::SourceUnavailableError,
            ValuationError::Transport { .. } | ValuationError::Http { .. } => {
                ErrorKind::SourceError
            }
            ValuationError::Parse(_) | ValuationError::Json(_) => ErrorKind::ParseError,
            ValuationError::Store(_) => ErrorKind::StoreError,
        }
    }
}

impl From<sqlx::Error> for ValuationError {
    fn from(e: sqlx::Error) -> Self {
        ValuationError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ValuationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InputError,
    InsufficientDataError,
    SourceUnavailableError,
    SourceError,
    ParseError,
    StoreError,
}

/// Serializable error object handed across the library boundary.
/// `error` is always true so callers can tell it apart from a valuation.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub error: bool,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ValuationError> for ErrorRecord {
    fn from(e: &ValuationError) -> Self {
        ErrorRecord {
            error: true,
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
