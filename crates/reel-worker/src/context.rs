//! Pipeline wiring.
//!
//! Collaborators are constructed explicitly at startup and passed down;
//! no ambient singletons. The worker sees the raw-asset store read-only;
//! all rendition-store writes go through the publisher inside the
//! orchestrator.

use std::sync::Arc;

use reel_queue::EventChannel;
use reel_status::RedisStatusTracker;
use reel_storage::{BlobStore, S3Client};

use crate::config::WorkerConfig;
use crate::error::PipelineResult;
use crate::orchestrator::Orchestrator;
use crate::publisher::ResultPublisher;
use crate::retry::RetryConfig;

/// Everything a job run needs.
pub struct PipelineContext {
    pub config: WorkerConfig,
    /// Raw asset bucket (read-only from here)
    pub raw_store: Arc<dyn BlobStore>,
    /// The state machine driver
    pub orchestrator: Orchestrator,
    /// Per-rendition backoff schedule
    pub retry: RetryConfig,
}

impl PipelineContext {
    /// Build the production context from environment configuration.
    pub fn new(config: WorkerConfig) -> PipelineResult<Self> {
        let raw_store: Arc<dyn BlobStore> = Arc::new(S3Client::from_env("S3_RAW_BUCKET")?);
        let rendition_store: Arc<dyn BlobStore> =
            Arc::new(S3Client::from_env("S3_RENDITION_BUCKET")?);

        let tracker = Arc::new(RedisStatusTracker::from_env()?);
        let events = Arc::new(EventChannel::from_env()?);

        let publisher = ResultPublisher::new(rendition_store, events);
        let orchestrator = Orchestrator::new(tracker, publisher, config.rendition_retries);

        let retry = RetryConfig::new("rendition_transcode")
            .with_max_retries(config.rendition_retries)
            .with_base_delay(config.retry_base_delay);

        Ok(Self {
            config,
            raw_store,
            orchestrator,
            retry,
        })
    }
}
