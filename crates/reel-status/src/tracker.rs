//! Status tracker over Redis.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use reel_models::{JobRecord, VideoId};

use crate::error::StatusResult;

/// Key prefix for status records.
const STATUS_KEY_PREFIX: &str = "reel:transcode:status";

/// Durable store for per-video transcode status.
///
/// `get`/`put`/`delete`, nothing else: retry decisions and state
/// transitions belong to the orchestrator.
#[async_trait]
pub trait StatusTracker: Send + Sync {
    /// Fetch the record for a video, if one exists.
    async fn get(&self, video_id: &VideoId) -> StatusResult<Option<JobRecord>>;

    /// Write (create or replace) the record for a video.
    async fn put(&self, record: &JobRecord) -> StatusResult<()>;

    /// Remove the record for a video. Only explicit video deletion does
    /// this; the pipeline itself never destroys records.
    async fn delete(&self, video_id: &VideoId) -> StatusResult<()>;
}

/// Redis-backed status tracker.
pub struct RedisStatusTracker {
    client: redis::Client,
}

impl RedisStatusTracker {
    /// Create a new tracker.
    pub fn new(redis_url: &str) -> StatusResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create from the `REDIS_URL` environment variable.
    pub fn from_env() -> StatusResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&redis_url)
    }

    fn key(video_id: &VideoId) -> String {
        format!("{}:{}", STATUS_KEY_PREFIX, video_id)
    }
}

#[async_trait]
impl StatusTracker for RedisStatusTracker {
    async fn get(&self, video_id: &VideoId) -> StatusResult<Option<JobRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(Self::key(video_id)).await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &JobRecord) -> StatusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let json = serde_json::to_string(record)?;

        conn.set::<_, _, ()>(Self::key(&record.video_id), json).await?;

        debug!(
            video_id = %record.video_id,
            state = %record.state,
            "Stored transcode status record"
        );
        Ok(())
    }

    async fn delete(&self, video_id: &VideoId) -> StatusResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Self::key(video_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keys_are_namespaced() {
        let key = RedisStatusTracker::key(&VideoId::from_string("vid-9"));
        assert_eq!(key, "reel:transcode:status:vid-9");
    }
}
