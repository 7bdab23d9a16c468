use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the atlas and retrieval services
#[derive(Debug, Error)]
pub enum DocsError {
    /// Backing atlas or index data is missing or failed to load
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Resolution found nothing above the threshold
    #[error("no {kind} matching '{query}'")]
    NotFound { kind: String, query: String },

    #[error("{service} timed out after {timeout:?}")]
    UpstreamTimeout { service: String, timeout: Duration },

    #[error("{service} failed: {message}")]
    Upstream { service: String, message: String },

    /// The service answered, but with something unusable. Not retried.
    #[error("{service} returned an invalid response: {message}")]
    InvalidResponse { service: String, message: String },

    /// Rejected before any external call was made
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The vector index could not be read from disk
    #[error("failed to load vector index: {0}")]
    IndexLoad(String),

    /// Search was attempted on an index that never loaded
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("deadline of {0}ms exceeded")]
    DeadlineExceeded(u128),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocsError {
    pub fn not_found(kind: impl ToString, query: impl Into<String>) -> Self {
        DocsError::NotFound {
            kind: kind.to_string(),
            query: query.into(),
        }
    }

    pub fn upstream(service: impl Into<String>, message: impl ToString) -> Self {
        DocsError::Upstream {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// True for the "feature unavailable" class: data or index never loaded.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DocsError::DataUnavailable(_) | DocsError::IndexUnavailable(_) | DocsError::IndexLoad(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DocsError::NotFound { .. })
    }

    pub fn invalid_response(service: impl Into<String>, message: impl ToString) -> Self {
        DocsError::InvalidResponse {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            DocsError::UpstreamTimeout { .. }
                | DocsError::Upstream { .. }
                | DocsError::InvalidResponse { .. }
        )
    }

    /// Transient upstream failures worth one more attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DocsError::UpstreamTimeout { .. } | DocsError::Upstream { .. }
        )
    }
}

pub type DocsResult<T> = Result<T, DocsError>;
