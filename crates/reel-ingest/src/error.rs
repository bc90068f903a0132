//! Ingest error types.

use thiserror::Error;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("A transcode job is already in flight for video {0}")]
    JobInFlight(String),

    #[error("No transcode record for video {0}")]
    NotFound(String),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("Status error: {0}")]
    Status(#[from] reel_status::StatusError),
}

impl IngestError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// True when the caller should retry later: infrastructure gave out,
    /// nothing about the request itself is wrong.
    pub fn is_retriable(&self) -> bool {
        match self {
            IngestError::Queue(e) => e.is_retriable(),
            IngestError::Status(_) => true,
            _ => false,
        }
    }
}
