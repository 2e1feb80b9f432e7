use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DsError {
    #[error("Backend {backend} failed: {reason}")]
    BackendFailure { backend: String, reason: String },
    #[error("Backend {backend} did not answer within {budget:?}")]
    BackendTimeout { backend: String, budget: Duration },
    #[error("Call to backend {backend} was cancelled")]
    BackendCancelled { backend: String },
    #[error("Caller cancelled the operation")]
    CallerCancelled,
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),
    #[error("Session already stored: {0}")]
    DuplicateSession(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DsError {
    pub fn backend_failure(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::BackendFailure { backend: backend.into(), reason: reason.to_string() }
    }

    /// True for the variants that describe a single backend misbehaving.
    pub fn is_backend_error(&self) -> bool {
        matches!(
            self,
            Self::BackendFailure { .. } | Self::BackendTimeout { .. } | Self::BackendCancelled { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DsError>;
