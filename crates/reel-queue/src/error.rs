//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    #[error("Unsupported job schema version {found} (this worker speaks {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    /// True for errors the caller should retry later (infrastructure),
    /// false for errors retrying cannot fix (duplicate, bad schema).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            QueueError::ConnectionFailed(_) | QueueError::EnqueueFailed(_) | QueueError::Redis(_)
        )
    }
}
