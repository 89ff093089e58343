//! Error types for the ingestion pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Faults that abort an ingestion attempt
///
/// A resubmitted, already-imported file is not an error; it surfaces as
/// `IngestOutcome::Skipped`.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Structural or required-field violation in the input document
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Any error raised by the transactional store
    #[error("Store failure: {0}")]
    StoreFailure(String),
}

impl IngestError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreFailure(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            IngestError::MalformedPayload(_) => FailureKind::MalformedPayload,
            IngestError::StoreFailure(_) => FailureKind::StoreFailure,
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::StoreFailure(err.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::MalformedPayload(format!("invalid JSON: {}", err))
    }
}

/// Category of a failed ingestion, reported alongside the raw message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedPayload,
    StoreFailure,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::MalformedPayload => write!(f, "malformed_payload"),
            FailureKind::StoreFailure => write!(f, "store_failure"),
        }
    }
}
