//! Typed error surfaces for the backend client, the indexing pipeline and
//! the search controller. Pure components (analyzer/scorer/query/result)
//! never error — they return structured, possibly-empty output instead.

use thiserror::Error;

/// Error returned by the Index Backend Client (C1).
///
/// `retriable` tracks the §7 taxonomy: 5xx/connection errors and HTTP 429
/// are retriable; other 4xx responses and parse failures are not.
#[derive(Debug, Error, Clone)]
#[error("backend error ({code}): {message}")]
pub struct BackendError {
    pub http_status: Option<u16>,
    pub code: String,
    pub message: String,
    pub retriable: bool,
}

impl BackendError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let retriable = status >= 500 || status == 429;
        Self {
            http_status: Some(status),
            code: format!("HTTP_{status}"),
            message: message.into(),
            retriable,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            code: "CONNECTION".to_string(),
            message: message.into(),
            retriable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            code: "TIMEOUT".to_string(),
            message: message.into(),
            retriable: false,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            code: "PARSE".to_string(),
            message: message.into(),
            retriable: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            http_status: None,
            code: "CANCELLED".to_string(),
            message: "request cancelled before completion".to_string(),
            retriable: false,
        }
    }
}

/// Stable error codes surfaced in `SearchResponse` envelopes (§4.8, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthenticationRequired,
    RateLimitExceeded,
    InvalidQuery,
    BackendUnavailable,
    Timeout,
    Internal,
}

/// Top-level error type for the search controller (C10). Every public
/// controller entry point returns `Result<_, ServiceError>`, and
/// `ServiceError::code()` maps it onto the stable `ErrorCode` wire value.
#[derive(Debug, Error, Clone)]
pub enum ServiceError {
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("query timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::AuthenticationRequired => ErrorCode::AuthenticationRequired,
            ServiceError::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            ServiceError::InvalidQuery(_) => ErrorCode::InvalidQuery,
            ServiceError::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            ServiceError::Timeout => ErrorCode::Timeout,
            ServiceError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<BackendError> for ServiceError {
    fn from(e: BackendError) -> Self {
        if e.code == "TIMEOUT" {
            ServiceError::Timeout
        } else if e.retriable {
            ServiceError::BackendUnavailable(e.message)
        } else {
            ServiceError::Internal(e.message)
        }
    }
}

/// Error raised while enqueuing or running an indexing task (C4). Unlike
/// `BackendError`, this is never surfaced to a caller across the RPC
/// boundary — it only drives the pipeline's own retry/drop bookkeeping.
#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("queue is full")]
    QueueFull,
    #[error("memory pressure: {used_mb}mb >= limit {limit_mb}mb")]
    MemoryPressure { used_mb: u64, limit_mb: u64 },
    #[error("document not indexable")]
    NotIndexable,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("deadline exceeded")]
    DeadlineExceeded,
}
