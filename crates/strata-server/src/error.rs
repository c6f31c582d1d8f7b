use serde::{Deserialize, Serialize};
use strata_store::StoreError;
use thiserror::Error;

use crate::validation::ValidationError;

/// Transport-neutral status code attached to every failed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    InvalidArgument,
    AlreadyExists,
    /// The caller's view of the entity is stale; re-read and retry.
    Aborted,
    NotFound,
    /// Transient storage failure; retry as-is.
    Unavailable,
    Internal,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::AlreadyExists => "already_exists",
            Self::Aborted => "aborted",
            Self::NotFound => "not_found",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("entity already exists: {key} (resource version {version})")]
    AlreadyExists { key: String, version: u64 },

    #[error("version conflict on {key}: expected {expected}, current {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(StoreError),

    #[error("invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// The status code reported to callers.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidPageToken(_) => StatusCode::InvalidArgument,
            Self::AlreadyExists { .. } => StatusCode::AlreadyExists,
            Self::Conflict { .. } => StatusCode::Aborted,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::Storage(e) if e.is_retryable() => StatusCode::Unavailable,
            Self::Storage(_) | Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::Internal
            }
        }
    }

    /// Returns `true` if the same request may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), StatusCode::Aborted | StatusCode::Unavailable)
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Self::NotFound(key),
            StoreError::AlreadyExists { key, version } => Self::AlreadyExists { key, version },
            StoreError::Conflict {
                key,
                expected,
                actual,
            } => Self::Conflict {
                key,
                expected,
                actual,
            },
            other => Self::Storage(other),
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
