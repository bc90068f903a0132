//! Job queue using Redis Streams.
//!
//! A consumer group gives at-least-once delivery: a claimed entry stays in
//! the pending list until acked, and `claim_stale` hands entries whose
//! holder stopped heartbeating to a live worker. The pending-entry idle
//! time is the lease.

use std::time::Duration;

use redis::streams::{
    StreamAutoClaimReply, StreamPendingCountReply, StreamReadReply,
};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::{decode_job, TranscodeJob};

/// Dedup key TTL: one hour, enough to absorb double-submits from the
/// upload handler without pinning tokens forever.
const DEDUP_TTL_SECS: u64 = 3600;

/// Delivery counter TTL.
const RETRY_TTL_SECS: i64 = 86400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max deliveries before DLQ
    pub max_deliveries: u32,
    /// Job visibility timeout (lease duration)
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reel:transcode:jobs".to_string(),
            consumer_group: "reel:transcode:workers".to_string(),
            dlq_stream_name: "reel:transcode:dlq".to_string(),
            max_deliveries: 3,
            visibility_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| "reel:transcode:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "reel:transcode:workers".to_string()),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or_else(|_| "reel:transcode:dlq".to_string()),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }
}

/// Time-bounded claim a worker holds on a delivered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Stream message ID of the delivery
    pub message_id: String,
    /// Consumer holding the entry
    pub consumer: String,
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a transcode job.
    ///
    /// Fails fast when Redis is unreachable; the upload handler must see a
    /// retriable error rather than a silently dropped job.
    pub async fn enqueue(&self, job: &TranscodeJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;

        if let Some(dedup_key) = job.dedup_key() {
            let full_key = format!("reel:dedup:{}", dedup_key);
            let exists: bool = conn.exists(&full_key).await?;
            if exists {
                warn!("Duplicate job rejected: {}", dedup_key);
                return Err(QueueError::DuplicateJob(dedup_key));
            }
            conn.set_ex::<_, _, ()>(&full_key, "1", DEDUP_TTL_SECS).await?;
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("video_id")
            .arg(job.video_id.as_str())
            .query_async(&mut conn)
            .await?;

        info!(
            "Enqueued job {} for video {} with message ID {}",
            job.job_id, job.video_id, message_id
        );

        Ok(message_id)
    }

    /// Clear the dedup key for a job so the caller can resubmit with the
    /// same token once this job is terminal.
    pub async fn clear_dedup(&self, job: &TranscodeJob) -> QueueResult<()> {
        if let Some(dedup_key) = job.dedup_key() {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            conn.del::<_, ()>(format!("reel:dedup:{}", dedup_key)).await?;
        }
        Ok(())
    }

    /// Consume new jobs from the queue.
    ///
    /// Returns `(lease, job)` pairs. Payloads that fail to decode (or carry
    /// an unknown schema version) are moved straight to the DLQ so they
    /// cannot wedge the consumer group.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(Lease, TranscodeJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();

        for stream_key in result.keys {
            for entry in stream_key.ids {
                let lease = Lease {
                    message_id: entry.id.clone(),
                    consumer: consumer_name.to_string(),
                };

                if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                    let payload_str = String::from_utf8_lossy(payload).to_string();
                    match decode_job(&payload_str) {
                        Ok(job) => {
                            debug!("Consumed job {} from stream", job.job_id);
                            jobs.push((lease, job));
                        }
                        Err(e) => {
                            warn!("Rejecting undecodable job payload: {}", e);
                            self.dlq_raw(&lease, &payload_str, &e.to_string()).await.ok();
                        }
                    }
                }
            }
        }

        Ok(jobs)
    }

    /// Claim pending jobs whose holder has gone quiet (crash recovery).
    pub async fn claim_stale(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(Lease, TranscodeJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();

        for entry in result.claimed {
            let lease = Lease {
                message_id: entry.id.clone(),
                consumer: consumer_name.to_string(),
            };

            if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                let payload_str = String::from_utf8_lossy(payload).to_string();
                match decode_job(&payload_str) {
                    Ok(job) => {
                        info!("Claimed stale job {} from stream", job.job_id);
                        jobs.push((lease, job));
                    }
                    Err(e) => {
                        warn!("Rejecting undecodable claimed payload: {}", e);
                        self.dlq_raw(&lease, &payload_str, &e.to_string()).await.ok();
                    }
                }
            }
        }

        Ok(jobs)
    }

    /// Renew the lease on a delivered job.
    ///
    /// Returns `false` when the entry is no longer pending for this
    /// consumer (acked elsewhere, or reclaimed after the lease expired).
    /// The holder must then abort its local work: another worker owns the
    /// job now, and a zombie writer must not clobber the fresher attempt.
    pub async fn heartbeat(&self, lease: &Lease) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&lease.message_id)
            .arg(&lease.message_id)
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let entry = match pending.ids.first() {
            Some(entry) => entry,
            None => return Ok(false), // acked or deleted
        };

        if entry.consumer != lease.consumer {
            return Ok(false); // lease expired, someone else holds it
        }

        // Re-claiming our own entry resets its idle time.
        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&lease.consumer)
            .arg(0)
            .arg(&lease.message_id)
            .arg("JUSTID")
            .query_async::<Vec<String>>(&mut conn)
            .await?;

        Ok(true)
    }

    /// Acknowledge a job (mark as completed).
    pub async fn ack(&self, lease: &Lease) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&lease.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(&lease.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", lease.message_id);
        Ok(())
    }

    /// Give a job back for immediate redelivery.
    ///
    /// The entry stays pending but its idle time is forced past the
    /// visibility timeout, so the next `claim_stale` pass hands it to a
    /// live worker without waiting out the lease.
    pub async fn nack(&self, lease: &Lease) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let idle_ms = self.config.visibility_timeout.as_millis() as u64;

        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&lease.consumer)
            .arg(0)
            .arg(&lease.message_id)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("JUSTID")
            .query_async::<Vec<String>>(&mut conn)
            .await?;

        debug!("Nacked job: {}", lease.message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue and ack the original.
    pub async fn dlq(&self, lease: &Lease, job: &TranscodeJob, error: &str) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;
        self.dlq_raw(lease, &payload, error).await?;
        warn!("Moved job {} to DLQ: {}", job.job_id, error);
        Ok(())
    }

    async fn dlq_raw(&self, lease: &Lease, payload: &str, error: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&lease.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(lease).await?;
        Ok(())
    }

    /// Get the delivery count for a message.
    pub async fn delivery_count(&self, lease: &Lease) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("reel:retry:{}", lease.message_id);
        let count: Option<u32> = conn.get(&key).await?;
        Ok(count.unwrap_or(0))
    }

    /// Increment the delivery count for a message.
    pub async fn increment_delivery(&self, lease: &Lease) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("reel:retry:{}", lease.message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_TTL_SECS).await?;
        Ok(count)
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Max deliveries from config.
    pub fn max_deliveries(&self) -> u32 {
        self.config.max_deliveries
    }

    /// Configured visibility timeout.
    pub fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }
}
