//! Transcode job submission and status queries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use reel_models::{
    FailureCategory, JobId, JobRecord, RenditionProfile, RenditionStatus, TranscodeState, VideoId,
};
use reel_queue::{JobQueue, TranscodeJob};
use reel_status::StatusTracker;

use crate::error::{IngestError, IngestResult};

/// Request to transcode one uploaded video.
///
/// The caller guarantees the raw asset is durably stored at
/// `raw_asset_key` before submitting; the pipeline never accepts inline
/// bytes.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub video_id: VideoId,
    pub raw_asset_key: String,
    pub renditions: Vec<RenditionProfile>,
    pub generate_thumbnail: bool,
    /// Client-supplied token for idempotent submission
    pub dedup_token: Option<String>,
}

/// One rendition as reported to the CRUD layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenditionStatusView {
    pub profile: String,
    pub status: RenditionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
}

/// Answer to "is my video ready yet".
///
/// Failure detail stays generic: end users get the category, operators
/// read the full record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeStatus {
    pub video_id: VideoId,
    pub state: TranscodeState,
    pub renditions: Vec<RenditionStatusView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCategory>,
}

impl TranscodeStatus {
    /// Build the CRUD-facing view from the durable record.
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            video_id: record.video_id.clone(),
            state: record.state,
            renditions: record
                .renditions
                .values()
                .map(|r| RenditionStatusView {
                    profile: r.profile.label.clone(),
                    status: r.status,
                    object_key: r.object_key.clone(),
                })
                .collect(),
            thumbnail_key: record.thumbnail_key.clone(),
            duration_secs: record.duration_secs,
            failure: record.failure,
        }
    }
}

/// Entry point for the upload handler and CRUD layer.
pub struct TranscodeSubmitter {
    queue: Arc<JobQueue>,
    tracker: Arc<dyn StatusTracker>,
}

impl TranscodeSubmitter {
    /// Create a new submitter from explicitly constructed collaborators.
    pub fn new(queue: Arc<JobQueue>, tracker: Arc<dyn StatusTracker>) -> Self {
        Self { queue, tracker }
    }

    /// Submit a transcode job.
    ///
    /// Exactly one job may be live per video: a resubmission is accepted
    /// only once the prior job is terminal. Queue unavailability surfaces
    /// as a retriable error and rolls the status record back; the raw
    /// asset is never silently dropped.
    pub async fn submit(&self, request: SubmitRequest) -> IngestResult<JobId> {
        if request.renditions.is_empty() {
            return Err(IngestError::invalid_request(
                "at least one rendition profile is required",
            ));
        }

        let previous = self.tracker.get(&request.video_id).await?;
        ensure_resubmittable(previous.as_ref(), &request.video_id)?;

        let mut job = TranscodeJob::new(
            request.video_id.clone(),
            request.raw_asset_key,
            request.renditions.clone(),
        );
        if !request.generate_thumbnail {
            job = job.without_thumbnail();
        }
        if let Some(token) = request.dedup_token {
            job = job.with_dedup_token(token);
        }

        let record = JobRecord::queued(
            job.job_id.clone(),
            request.video_id.clone(),
            &request.renditions,
        );
        self.tracker.put(&record).await?;

        match self.queue.enqueue(&job).await {
            Ok(message_id) => {
                info!(
                    job_id = %job.job_id,
                    video_id = %request.video_id,
                    %message_id,
                    "Submitted transcode job"
                );
                Ok(job.job_id)
            }
            Err(e) => {
                // Roll the record back so a retry is not refused as a
                // duplicate; restore whatever was there before.
                let rollback = match previous {
                    Some(prior) => self.tracker.put(&prior).await,
                    None => self.tracker.delete(&request.video_id).await,
                };
                if let Err(rb) = rollback {
                    warn!(
                        video_id = %request.video_id,
                        "Failed to roll back status record after enqueue failure: {}",
                        rb
                    );
                }
                Err(e.into())
            }
        }
    }

    /// Query transcode status for a video.
    pub async fn transcode_status(&self, video_id: &VideoId) -> IngestResult<TranscodeStatus> {
        let record = self
            .tracker
            .get(video_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(video_id.to_string()))?;
        Ok(TranscodeStatus::from_record(&record))
    }

    /// Mark a live job as cancelling because its video was deleted.
    ///
    /// In-flight workers finish their current rendition; the orchestrator
    /// refuses further transitions and discards anything already staged.
    /// Terminal records are left untouched.
    pub async fn request_cancel(&self, video_id: &VideoId) -> IngestResult<()> {
        let mut record = match self.tracker.get(video_id).await? {
            Some(record) => record,
            None => return Ok(()),
        };

        if record.is_terminal() || record.state == TranscodeState::Cancelling {
            return Ok(());
        }

        record.cancel();
        self.tracker.put(&record).await?;
        info!(video_id = %video_id, "Marked transcode job as cancelling");
        Ok(())
    }
}

/// A video may be resubmitted only after its prior job reaches a terminal
/// state.
fn ensure_resubmittable(previous: Option<&JobRecord>, video_id: &VideoId) -> IngestResult<()> {
    match previous {
        Some(record) if !record.is_terminal() => {
            Err(IngestError::JobInFlight(video_id.to_string()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::FailureCategory;

    fn record(state: TranscodeState) -> JobRecord {
        let mut record = JobRecord::queued(
            JobId::new(),
            VideoId::from_string("vid-1"),
            &[RenditionProfile::p480(), RenditionProfile::p720()],
        );
        match state {
            TranscodeState::Queued => {}
            TranscodeState::Processing => record.start(),
            TranscodeState::Cancelling => record.cancel(),
            TranscodeState::Ready => record.complete(),
            TranscodeState::Failed => {
                record.fail(FailureCategory::TranscodeFailed, "exhausted retries")
            }
        }
        record
    }

    #[test]
    fn live_jobs_block_resubmission() {
        let video_id = VideoId::from_string("vid-1");
        for state in [
            TranscodeState::Queued,
            TranscodeState::Processing,
            TranscodeState::Cancelling,
        ] {
            let rec = record(state);
            assert!(ensure_resubmittable(Some(&rec), &video_id).is_err());
        }
    }

    #[test]
    fn terminal_jobs_allow_resubmission() {
        let video_id = VideoId::from_string("vid-1");
        assert!(ensure_resubmittable(None, &video_id).is_ok());
        for state in [TranscodeState::Ready, TranscodeState::Failed] {
            let rec = record(state);
            assert!(ensure_resubmittable(Some(&rec), &video_id).is_ok());
        }
    }

    #[test]
    fn status_view_reflects_the_record() {
        let mut rec = record(TranscodeState::Processing);
        rec.mark_rendition_done("480p", "vid-1/480p/abc", 42, "abc");
        rec.duration_secs = Some(33.0);

        let status = TranscodeStatus::from_record(&rec);
        assert_eq!(status.state, TranscodeState::Processing);
        assert_eq!(status.renditions.len(), 2);

        let done = status
            .renditions
            .iter()
            .find(|r| r.profile == "480p")
            .unwrap();
        assert_eq!(done.status, RenditionStatus::Done);
        assert_eq!(done.object_key.as_deref(), Some("vid-1/480p/abc"));

        let pending = status
            .renditions
            .iter()
            .find(|r| r.profile == "720p")
            .unwrap();
        assert_eq!(pending.status, RenditionStatus::Pending);
        assert!(pending.object_key.is_none());
    }
}
