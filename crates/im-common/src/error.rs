//! Error types and result handling for the assessment engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type. Variants follow the engine-wide handling policy:
/// `NotFound`/`Validation`/`ConflictState` reject a request without side
/// effects, `InsufficientData` is a typed "no result", `Dependency` abandons
/// the current driver iteration, `Cancelled` propagates silently and `Fatal`
/// refuses startup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("conflicting state: {0}")]
    ConflictState(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("dependency failure: {0}")]
    Dependency(String),

    #[error("cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if the error is retryable on a later driver tick
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Dependency(_) | Error::InsufficientData(_))
    }

    /// Get error category for log labels
    pub fn category(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::ConflictState(_) => "conflict",
            Error::InsufficientData(_) => "insufficient_data",
            Error::Dependency(_) => "dependency",
            Error::Cancelled => "cancelled",
            Error::Fatal(_) => "fatal",
            Error::Serialization(_) => "serialization",
        }
    }
}
