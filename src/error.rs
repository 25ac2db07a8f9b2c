//! Failure taxonomy shared by the clients, the lifecycle engine and the task queue.
//!
//! The split that matters to callers is retryable vs. terminal: the queue retries
//! a task only when [`SyncError::is_retryable`] says so, and the job monitor uses
//! the same predicate for its in-task fetch retries.

use thiserror::Error;

pub(crate) const OPENQA: &str = "openqa";
pub(crate) const TESTLINK: &str = "testlink";

#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure, timeout, 5xx or 429 from one of the remote systems.
    #[error("{system} unavailable: {message}")]
    RemoteUnavailable {
        system: &'static str,
        message: String,
    },
    /// A 4xx answer. Retrying the same request will not help.
    #[error("{system} rejected the request with status {status}: {body}")]
    RemoteRejected {
        system: &'static str,
        status: u16,
        body: String,
    },
    #[error("{system} returned an unusable response: {message}")]
    InvalidResponse {
        system: &'static str,
        message: String,
    },
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("state conflict: {0}")]
    StateConflict(String),
    #[error("persistence failure: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

impl SyncError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub(crate) fn persistence(error: impl Into<anyhow::Error>, context: &'static str) -> Self {
        Self::Persistence(error.into().context(context))
    }

    /// Whether the failed operation may succeed if attempted again later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteUnavailable { .. } | SyncError::Persistence(_)
        )
    }

    /// Stable label used in task results and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::RemoteUnavailable { .. } => "remote_unavailable",
            SyncError::RemoteRejected { .. } => "remote_rejected",
            SyncError::InvalidResponse { .. } => "invalid_response",
            SyncError::NotFound { .. } => "not_found",
            SyncError::StateConflict(_) => "state_conflict",
            SyncError::Persistence(_) => "persistence_failure",
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(error: sqlx::Error) -> Self {
        SyncError::Persistence(anyhow::Error::new(error))
    }
}
