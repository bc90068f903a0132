//! Result publisher.
//!
//! Owns every write to the rendition store. Objects land at deterministic
//! content-addressed keys, so staging is write-once by construction:
//! redundant writers (redeliveries, concurrent attempts) converge to the
//! same bytes instead of corrupting state. Publication, which makes the
//! set externally visible, only happens after every key is re-verified
//! present, and is safe to re-run from any crash point.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use reel_media::{ThumbnailArtifact, TranscodedArtifact};
use reel_models::{JobRecord, VideoId};
use reel_queue::{CompletionEvent, EventChannel, QueueResult};
use reel_storage::{manifest_key, rendition_key, thumbnail_key, BlobStore};

use crate::error::PipelineResult;
use crate::retry::{retry_async, RetryConfig};

/// Where completion events go. One implementation publishes to Redis
/// Pub/Sub; tests record events instead.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn publish(&self, event: &CompletionEvent) -> QueueResult<()>;
}

#[async_trait]
impl CompletionSink for EventChannel {
    async fn publish(&self, event: &CompletionEvent) -> QueueResult<()> {
        EventChannel::publish(self, event).await
    }
}

/// Result publisher over the rendition store and completion channel.
pub struct ResultPublisher {
    store: Arc<dyn BlobStore>,
    events: Arc<dyn CompletionSink>,
    upload_retry: RetryConfig,
}

impl ResultPublisher {
    /// Create a new publisher.
    pub fn new(store: Arc<dyn BlobStore>, events: Arc<dyn CompletionSink>) -> Self {
        Self {
            store,
            events,
            upload_retry: RetryConfig::new("rendition_upload").with_max_retries(2),
        }
    }

    /// Stage a transcoded rendition at its deterministic key.
    ///
    /// Skips the upload when the object already exists: a redelivered job
    /// re-producing the same bytes lands on the same key.
    pub async fn stage_rendition(
        &self,
        video_id: &VideoId,
        profile: &str,
        artifact: &TranscodedArtifact,
    ) -> PipelineResult<String> {
        let key = rendition_key(video_id, profile, &artifact.checksum);

        if self.store.exists(&key).await? {
            debug!("Rendition already staged at {}, skipping upload", key);
            return Ok(key);
        }

        retry_async(&self.upload_retry, || {
            self.store.put_file(&key, &artifact.path, "video/mp4")
        })
        .await?;

        info!("Staged rendition {} at {}", profile, key);
        Ok(key)
    }

    /// Stage an extracted thumbnail at its deterministic key.
    pub async fn stage_thumbnail(
        &self,
        video_id: &VideoId,
        artifact: &ThumbnailArtifact,
    ) -> PipelineResult<String> {
        let key = thumbnail_key(video_id, &artifact.checksum);

        if self.store.exists(&key).await? {
            debug!("Thumbnail already staged at {}, skipping upload", key);
            return Ok(key);
        }

        retry_async(&self.upload_retry, || {
            self.store.put_file(&key, &artifact.path, "image/jpeg")
        })
        .await?;

        Ok(key)
    }

    /// Confirm every done rendition is present at its key.
    ///
    /// Returns the labels whose objects are missing. Publication must not
    /// proceed unless this comes back empty.
    pub async fn verify_staged(&self, record: &JobRecord) -> PipelineResult<Vec<String>> {
        let mut missing = Vec::new();

        for (label, rendition) in &record.renditions {
            let key = match &rendition.object_key {
                Some(key) if rendition.is_done() => key,
                _ => {
                    missing.push(label.clone());
                    continue;
                }
            };
            if !self.store.exists(key).await? {
                missing.push(label.clone());
            }
        }

        Ok(missing)
    }

    /// Write the rendition manifest next to the renditions.
    pub async fn put_manifest(&self, record: &JobRecord) -> PipelineResult<()> {
        let key = manifest_key(&record.video_id);
        let body = serde_json::to_vec(&record.manifest())
            .map_err(|e| crate::error::PipelineError::job_failed(e.to_string()))?;

        retry_async(&self.upload_retry, || {
            self.store.put_bytes(&key, body.clone(), "application/json")
        })
        .await?;

        Ok(())
    }

    /// Emit the completion event for a published record.
    ///
    /// Best-effort at the call sites: delivery is at-least-once, and a
    /// redelivered ready job re-emits.
    pub async fn emit_completion(&self, record: &JobRecord) -> PipelineResult<()> {
        let event = CompletionEvent {
            job_id: record.job_id.clone(),
            video_id: record.video_id.clone(),
            manifest: record.manifest(),
            thumbnail_key: record.thumbnail_key.clone(),
            duration_secs: record.duration_secs,
            completed_at: record.completed_at.unwrap_or_else(Utc::now),
        };

        self.events.publish(&event).await?;
        Ok(())
    }

    /// Delete everything a cancelled job staged, manifest included, so no
    /// partially-visible rendition set is reachable.
    pub async fn discard(&self, record: &JobRecord) -> PipelineResult<u32> {
        let mut keys = record.staged_keys();
        keys.push(manifest_key(&record.video_id));

        let deleted = self.store.delete(&keys).await?;
        if deleted > 0 {
            warn!(
                video_id = %record.video_id,
                "Discarded {} staged objects for cancelled job",
                deleted
            );
        }
        Ok(deleted)
    }
}
