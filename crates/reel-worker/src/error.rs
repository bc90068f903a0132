//! Pipeline error types and the failure taxonomy.
//!
//! Three families drive three behaviors:
//! - permanent errors fail the rendition (and the job) without retries
//! - transient errors consume the per-rendition retry budget
//! - infrastructure errors are never consumed by the budget: the delivery
//!   is nacked and at-least-once redelivery retries later

use thiserror::Error;

use reel_media::MediaError;
use reel_models::FailureCategory;
use reel_queue::QueueError;
use reel_status::StatusError;
use reel_storage::StorageError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("Profile misconfigured: {0}")]
    ProfileMisconfigured(String),

    #[error("Lease lost; another worker owns this job now")]
    LeaseLost,

    #[error("Job cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn source_unreadable(msg: impl Into<String>) -> Self {
        Self::SourceUnreadable(msg.into())
    }

    pub fn profile_misconfigured(msg: impl Into<String>) -> Self {
        Self::ProfileMisconfigured(msg.into())
    }

    /// Permanent failures: retrying the same input cannot succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            PipelineError::SourceUnreadable(_) | PipelineError::ProfileMisconfigured(_) => true,
            PipelineError::Media(m) => m.is_input_error(),
            _ => false,
        }
    }

    /// Infrastructure failures: the store or queue gave out. Not charged
    /// against the rendition retry budget; redelivery retries later.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            PipelineError::Storage(e) => !e.is_not_found(),
            PipelineError::Status(_) | PipelineError::Queue(_) => true,
            _ => false,
        }
    }

    /// Generic cause category surfaced to end users.
    pub fn failure_category(&self) -> FailureCategory {
        match self {
            PipelineError::SourceUnreadable(_) => FailureCategory::SourceUnreadable,
            PipelineError::ProfileMisconfigured(_) => FailureCategory::ProfileMisconfigured,
            PipelineError::Media(m) if m.is_input_error() => FailureCategory::SourceUnreadable,
            PipelineError::Media(_) => FailureCategory::TranscodeFailed,
            PipelineError::Storage(_) | PipelineError::Status(_) | PipelineError::Queue(_) => {
                FailureCategory::Infrastructure
            }
            PipelineError::Cancelled | PipelineError::LeaseLost => FailureCategory::Cancelled,
            _ => FailureCategory::TranscodeFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_permanent() {
        let err = PipelineError::Media(MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            Some("Invalid data found when processing input".to_string()),
            Some(1),
        ));
        assert!(err.is_permanent());
        assert_eq!(err.failure_category(), FailureCategory::SourceUnreadable);
    }

    #[test]
    fn tool_crashes_are_transient() {
        let err = PipelineError::Media(MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            None,
            Some(137),
        ));
        assert!(!err.is_permanent());
        assert!(!err.is_infrastructure());
        assert_eq!(err.failure_category(), FailureCategory::TranscodeFailed);
    }

    #[test]
    fn store_outages_are_infrastructure() {
        let err = PipelineError::Storage(StorageError::upload_failed("connection reset"));
        assert!(err.is_infrastructure());
        assert!(!err.is_permanent());

        // A missing object is a fact about the data, not the store.
        let err = PipelineError::Storage(StorageError::not_found("raw/vid-1"));
        assert!(!err.is_infrastructure());
    }
}
