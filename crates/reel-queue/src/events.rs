//! Completion events via Redis Pub/Sub.
//!
//! One event per terminal `ready` transition, consumed by the search
//! indexer and notification service through their own subscriptions,
//! never through in-process callbacks. Delivery is at-least-once;
//! consumers deduplicate on `job_id`.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use reel_models::{JobId, RenditionManifest, VideoId};

use crate::error::QueueResult;

/// Channel completion events are published on.
pub const COMPLETION_CHANNEL: &str = "reel:transcode:completed";

/// Published when a job's full rendition set becomes visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    /// Finished job
    pub job_id: JobId,
    /// Owning video
    pub video_id: VideoId,
    /// Profile → published object
    pub manifest: RenditionManifest,
    /// Thumbnail object key, if one was generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
    /// Source duration in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// When the job reached `ready`
    pub completed_at: DateTime<Utc>,
}

/// Channel for publishing/subscribing to completion events.
pub struct EventChannel {
    client: redis::Client,
}

impl EventChannel {
    /// Create a new event channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create from the `REDIS_URL` environment variable.
    pub fn from_env() -> QueueResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&redis_url)
    }

    /// Publish a completion event.
    pub async fn publish(&self, event: &CompletionEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;

        debug!(
            "Publishing completion event for job {} to {}",
            event.job_id, COMPLETION_CHANNEL
        );
        conn.publish::<_, _, ()>(COMPLETION_CHANNEL, payload).await?;

        Ok(())
    }

    /// Subscribe to completion events.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = CompletionEvent> + Send>>>
    {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(COMPLETION_CHANNEL).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::ManifestEntry;

    #[test]
    fn completion_event_serde_roundtrip() {
        let mut manifest = RenditionManifest::default();
        manifest.entries.insert(
            "720p".to_string(),
            ManifestEntry {
                object_key: "vid-1/720p/abc".to_string(),
                size_bytes: 1024,
                checksum: "abc".to_string(),
            },
        );

        let event = CompletionEvent {
            job_id: JobId::new(),
            video_id: VideoId::from_string("vid-1"),
            manifest,
            thumbnail_key: Some("vid-1/thumbnail/def".to_string()),
            duration_secs: Some(12.5),
            completed_at: Utc::now(),
        };

        let json = serde_json::to_string(&event).expect("serialize CompletionEvent");
        let decoded: CompletionEvent = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(decoded.job_id, event.job_id);
        assert_eq!(decoded.manifest, event.manifest);
        assert_eq!(decoded.thumbnail_key, event.thumbnail_key);
    }
}
