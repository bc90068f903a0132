//! Job executor: the bounded worker pool.
//!
//! One consume loop pulls fresh deliveries, one claim loop recovers
//! entries abandoned by crashed workers, and a semaphore caps concurrent
//! transcodes. Each running job gets a heartbeat task renewing its lease;
//! when renewal reports the lease gone, the job's cancel channel fires and
//! the in-flight FFmpeg run is killed rather than left as a zombie writer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reel_queue::{JobQueue, Lease, TranscodeJob};

use crate::config::WorkerConfig;
use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::retry::FailureTracker;
use crate::transcoder::{process_transcode, JobOutcome};

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    ctx: Arc<PipelineContext>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, queue: JobQueue, ctx: PipelineContext) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            ctx: Arc::new(ctx),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Start the executor.
    pub async fn run(&self) -> PipelineResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Periodically claim jobs whose worker stopped heartbeating.
        let claim_queue = Arc::clone(&self.queue);
        let claim_ctx = Arc::clone(&self.ctx);
        let claim_semaphore = Arc::clone(&self.job_semaphore);
        let claim_consumer = self.consumer_name.clone();
        let claim_config = self.config.clone();
        let mut shutdown_rx_claim = self.shutdown.subscribe();

        let claim_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_config.claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx_claim.changed() => {
                        if *shutdown_rx_claim.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let min_idle_ms = claim_config.claim_min_idle.as_millis() as u64;
                        match claim_queue.claim_stale(&claim_consumer, min_idle_ms, 5).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} stale jobs", jobs.len());
                                for (lease, job) in jobs {
                                    let permit = match claim_semaphore.clone().acquire_owned().await {
                                        Ok(permit) => permit,
                                        Err(_) => break,
                                    };
                                    let ctx = Arc::clone(&claim_ctx);
                                    let queue = Arc::clone(&claim_queue);
                                    let config = claim_config.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(ctx, queue, config, lease, job).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim stale jobs: {}", e);
                            }
                        }
                    }
                }
            }
        });

        // Main job consumption loop.
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Consume and dispatch jobs from the queue.
    async fn consume_jobs(&self) -> PipelineResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(
                &self.consumer_name,
                1000, // Block for 1 second
                available.min(5),
            )
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (lease, job) in jobs {
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::job_failed("Semaphore closed"))?;

            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);
            let config = self.config.clone();
            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(ctx, queue, config, lease, job).await;
            });
        }

        Ok(())
    }

    /// Execute a single job with lease heartbeats, ack/nack, and DLQ
    /// handling.
    async fn execute_job(
        ctx: Arc<PipelineContext>,
        queue: Arc<JobQueue>,
        config: WorkerConfig,
        lease: Lease,
        job: TranscodeJob,
    ) {
        let job_id = job.job_id.clone();
        info!("Executing job {} (message {})", job_id, lease.message_id);
        metrics::record_job_started();

        let delivery = queue.increment_delivery(&lease).await.unwrap_or(1);

        // Renew the lease while the transcode runs. If renewal says the
        // lease is gone, fire the cancel channel so the job task aborts
        // its local work.
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let hb_queue = Arc::clone(&queue);
        let hb_lease = lease.clone();
        let hb_job_id = job_id.clone();
        let heartbeat = tokio::spawn(async move {
            let mut failures = FailureTracker::new(3);
            let mut ticker = tokio::time::interval(config.heartbeat_interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                match hb_queue.heartbeat(&hb_lease).await {
                    Ok(true) => failures.record_success(),
                    Ok(false) => {
                        warn!(
                            "Lease lost for job {} (message {}), aborting local work",
                            hb_job_id, hb_lease.message_id
                        );
                        metrics::record_lease_lost();
                        cancel_tx.send(true).ok();
                        break;
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            warn!("Heartbeat failed for job {}: {}", hb_job_id, e);
                        }
                    }
                }
            }
        });

        let result = process_transcode(&ctx, &job, delivery, cancel_rx).await;
        heartbeat.abort();

        match result {
            Ok(outcome) => {
                let outcome_str = match outcome {
                    JobOutcome::Ready => "ready",
                    JobOutcome::Failed => "failed",
                    JobOutcome::Cancelled => "cancelled",
                    JobOutcome::AlreadyTerminal => "stale",
                };
                info!("Job {} finished: {}", job_id, outcome_str);
                metrics::record_job_finished(outcome_str);

                if let Err(e) = queue.ack(&lease).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
                // Free the dedup token so the caller can resubmit.
                if let Err(e) = queue.clear_dedup(&job).await {
                    warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                }
            }
            Err(PipelineError::LeaseLost) => {
                // Another worker owns the delivery now; leave it alone.
                warn!("Abandoned job {} after lease loss", job_id);
                metrics::record_job_finished("lease_lost");
            }
            Err(e) => {
                error!("Job {} errored: {}", job_id, e);

                if delivery >= queue.max_deliveries() {
                    warn!(
                        "Job {} exceeded max deliveries ({}), moving to DLQ",
                        job_id,
                        queue.max_deliveries()
                    );
                    if let Err(dlq_err) = queue.dlq(&lease, &job, &e.to_string()).await {
                        error!("Failed to move job {} to DLQ: {}", job_id, dlq_err);
                    }
                    if let Err(fail_err) = ctx
                        .orchestrator
                        .job_failed(&job, e.failure_category(), e.to_string())
                        .await
                    {
                        error!("Failed to mark job {} failed: {}", job_id, fail_err);
                    }
                    queue.clear_dedup(&job).await.ok();
                    metrics::record_job_dead_lettered();
                    metrics::record_job_finished("failed");
                } else {
                    // Give the delivery back for another attempt.
                    if let Err(nack_err) = queue.nack(&lease).await {
                        warn!("Failed to nack job {}: {}", job_id, nack_err);
                    }
                    metrics::record_job_finished("requeued");
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
