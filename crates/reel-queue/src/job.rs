//! The transcode job wire descriptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reel_models::{JobId, RenditionProfile, VideoId};

use crate::error::{QueueError, QueueResult};

/// Descriptor schema version this build reads and writes.
///
/// Workers reject envelopes carrying a different version instead of
/// guessing at their shape; rejected messages go to the dead letter queue.
pub const SCHEMA_VERSION: u32 = 1;

fn current_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_generate_thumbnail() -> bool {
    true
}

/// One transcode request for one video's raw asset, covering all requested
/// renditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeJob {
    /// Descriptor schema version
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    /// Unique job ID, generated at enqueue time
    pub job_id: JobId,
    /// Owning video
    pub video_id: VideoId,
    /// Key of the raw asset in the raw-asset bucket. The caller guarantees
    /// the asset is durably stored there before enqueueing.
    pub raw_asset_key: String,
    /// Target profiles, in the caller's preferred order
    pub requested_renditions: Vec<RenditionProfile>,
    /// Extract a cover frame alongside the renditions
    #[serde(default = "default_generate_thumbnail")]
    pub generate_thumbnail: bool,
    /// Client-supplied deduplication token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_token: Option<String>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl TranscodeJob {
    /// Create a new job.
    pub fn new(
        video_id: VideoId,
        raw_asset_key: impl Into<String>,
        requested_renditions: Vec<RenditionProfile>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            job_id: JobId::new(),
            video_id,
            raw_asset_key: raw_asset_key.into(),
            requested_renditions,
            generate_thumbnail: true,
            dedup_token: None,
            created_at: Utc::now(),
        }
    }

    /// Set the deduplication token.
    pub fn with_dedup_token(mut self, token: impl Into<String>) -> Self {
        self.dedup_token = Some(token.into());
        self
    }

    /// Disable thumbnail extraction.
    pub fn without_thumbnail(mut self) -> Self {
        self.generate_thumbnail = false;
        self
    }

    /// Dedup key for this job, when the caller supplied a token.
    pub fn dedup_key(&self) -> Option<String> {
        self.dedup_token
            .as_ref()
            .map(|t| format!("transcode:{}:{}", self.video_id, t))
    }
}

/// Minimal envelope used to sniff the schema version before committing to
/// the full descriptor shape.
#[derive(Debug, Deserialize)]
struct JobEnvelope {
    #[serde(default = "current_schema_version")]
    schema_version: u32,
}

/// Decode a job payload, rejecting unknown schema versions.
pub fn decode_job(payload: &str) -> QueueResult<TranscodeJob> {
    let envelope: JobEnvelope = serde_json::from_str(payload)?;
    if envelope.schema_version != SCHEMA_VERSION {
        return Err(QueueError::UnsupportedSchema {
            found: envelope.schema_version,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(serde_json::from_str(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_serde_roundtrip() {
        let job = TranscodeJob::new(
            VideoId::from_string("vid-1"),
            "raw/vid-1",
            vec![RenditionProfile::p480(), RenditionProfile::p720()],
        )
        .with_dedup_token("upload-7");

        let json = serde_json::to_string(&job).expect("serialize TranscodeJob");
        let decoded = decode_job(&json).expect("decode TranscodeJob");

        assert_eq!(decoded.job_id, job.job_id);
        assert_eq!(decoded.video_id, job.video_id);
        assert_eq!(decoded.raw_asset_key, "raw/vid-1");
        assert_eq!(decoded.requested_renditions.len(), 2);
        assert!(decoded.generate_thumbnail);
        assert_eq!(decoded.dedup_token.as_deref(), Some("upload-7"));
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let job = TranscodeJob::new(
            VideoId::from_string("vid-1"),
            "raw/vid-1",
            vec![RenditionProfile::p480()],
        );
        let mut value = serde_json::to_value(&job).unwrap();
        value["schema_version"] = serde_json::json!(99);

        let err = decode_job(&value.to_string()).unwrap_err();
        assert!(matches!(
            err,
            QueueError::UnsupportedSchema { found: 99, supported: SCHEMA_VERSION }
        ));
    }

    #[test]
    fn dedup_key_requires_a_token() {
        let job = TranscodeJob::new(
            VideoId::from_string("vid-1"),
            "raw/vid-1",
            vec![RenditionProfile::p480()],
        );
        assert!(job.dedup_key().is_none());
        assert_eq!(
            job.with_dedup_token("t1").dedup_key().as_deref(),
            Some("transcode:vid-1:t1")
        );
    }
}
