//! Job orchestrator state machine.
//!
//! Owns every `JobRecord` transition: `queued → processing → {ready |
//! failed}`, with `cancelling` as the drain path for deleted videos.
//! Workers report per-rendition outcomes here and nowhere else; the
//! orchestrator decides retry vs. terminal failure vs. publication.
//!
//! Publication is computed from the durably recorded rendition set, never
//! from counting events, so out-of-order and duplicated reports (the price
//! of at-least-once delivery) converge instead of double-triggering.

use std::sync::Arc;

use tracing::{debug, info, warn};

use reel_media::{ThumbnailArtifact, TranscodedArtifact};
use reel_models::{FailureCategory, JobRecord, RenditionProfile, TranscodeState};
use reel_queue::TranscodeJob;
use reel_status::StatusTracker;

use crate::error::{PipelineError, PipelineResult};
use crate::publisher::ResultPublisher;

/// What a worker should do after claiming a job.
#[derive(Debug)]
pub enum BeginDisposition {
    /// Live job: process the outstanding renditions on this record.
    Proceed(JobRecord),
    /// Already terminal; ack and stand down.
    AlreadyTerminal(TranscodeState),
    /// Video was deleted; staged output has been discarded. Ack.
    Cancelled,
}

/// Outcome of a per-rendition report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Recorded; keep going.
    Recorded,
    /// Record is terminal; the report was stale and ignored.
    Stale,
    /// Job is cancelling; stop processing.
    Cancelled,
}

/// Orchestrator's decision after a failed rendition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Transient failure within budget; retry after backoff.
    Retry { attempt: u32 },
    /// Rendition is out of budget or permanently broken: the whole job
    /// fails. A partial rendition set is never published.
    JobFailed(FailureCategory),
    /// Record is terminal; stale report.
    Stale,
    /// Job is cancelling; stop processing.
    Cancelled,
}

/// Outcome of the publication check once a worker finishes its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Full set verified present and made visible.
    Published,
    /// The job had already failed.
    AlreadyFailed(FailureCategory),
    /// Job was cancelled; staged output discarded.
    Cancelled,
}

/// The per-job state machine driver.
pub struct Orchestrator {
    tracker: Arc<dyn StatusTracker>,
    publisher: ResultPublisher,
    /// Per-rendition transcode attempt ceiling
    rendition_retries: u32,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        tracker: Arc<dyn StatusTracker>,
        publisher: ResultPublisher,
        rendition_retries: u32,
    ) -> Self {
        Self {
            tracker,
            publisher,
            rendition_retries,
        }
    }

    async fn load(&self, job: &TranscodeJob) -> PipelineResult<JobRecord> {
        match self.tracker.get(&job.video_id).await? {
            Some(record) => Ok(record),
            None => {
                // The record is created at enqueue time; recreate it if it
                // went missing so the job still converges.
                warn!(
                    job_id = %job.job_id,
                    video_id = %job.video_id,
                    "Status record missing at claim time, recreating"
                );
                Ok(JobRecord::queued(
                    job.job_id.clone(),
                    job.video_id.clone(),
                    &job.requested_renditions,
                ))
            }
        }
    }

    /// Claim a job: flip `queued → processing` (idempotent on redelivery)
    /// and record the delivery attempt.
    pub async fn begin(
        &self,
        job: &TranscodeJob,
        delivery_attempt: u32,
    ) -> PipelineResult<BeginDisposition> {
        let mut record = self.load(job).await?;

        match record.state {
            TranscodeState::Ready => {
                // The previous delivery published but never acked. Re-emit
                // so downstream consumers are not left waiting; they dedup
                // on job_id.
                self.publisher.emit_completion(&record).await.ok();
                Ok(BeginDisposition::AlreadyTerminal(TranscodeState::Ready))
            }
            TranscodeState::Failed => {
                Ok(BeginDisposition::AlreadyTerminal(TranscodeState::Failed))
            }
            TranscodeState::Cancelling => {
                self.publisher.discard(&record).await?;
                Ok(BeginDisposition::Cancelled)
            }
            TranscodeState::Queued | TranscodeState::Processing => {
                record.start();
                record.delivery_attempts = delivery_attempt;
                self.tracker.put(&record).await?;
                info!(
                    job_id = %job.job_id,
                    video_id = %job.video_id,
                    delivery_attempt,
                    "Job processing"
                );
                Ok(BeginDisposition::Proceed(record))
            }
        }
    }

    /// Record the probed source duration.
    pub async fn source_probed(&self, job: &TranscodeJob, duration_secs: f64) -> PipelineResult<()> {
        let mut record = self.load(job).await?;
        if record.is_terminal() || record.state == TranscodeState::Cancelling {
            return Ok(());
        }
        record.duration_secs = Some(duration_secs);
        self.tracker.put(&record).await?;
        Ok(())
    }

    /// Stage and record an extracted thumbnail.
    pub async fn thumbnail_done(
        &self,
        job: &TranscodeJob,
        artifact: &ThumbnailArtifact,
    ) -> PipelineResult<ReportOutcome> {
        let mut record = self.load(job).await?;

        if record.is_terminal() {
            return Ok(ReportOutcome::Stale);
        }
        if record.state == TranscodeState::Cancelling {
            return Ok(ReportOutcome::Cancelled);
        }

        let key = self.publisher.stage_thumbnail(&job.video_id, artifact).await?;
        record.thumbnail_key = Some(key);
        self.tracker.put(&record).await?;
        Ok(ReportOutcome::Recorded)
    }

    /// Stage and record one completed rendition.
    pub async fn rendition_done(
        &self,
        job: &TranscodeJob,
        profile: &RenditionProfile,
        artifact: &TranscodedArtifact,
    ) -> PipelineResult<ReportOutcome> {
        let mut record = self.load(job).await?;

        if record.is_terminal() {
            warn!(
                job_id = %job.job_id,
                profile = %profile.label,
                state = %record.state,
                "Stale rendition report for terminal job, ignoring"
            );
            return Ok(ReportOutcome::Stale);
        }
        if record.state == TranscodeState::Cancelling {
            self.publisher.discard(&record).await?;
            return Ok(ReportOutcome::Cancelled);
        }

        let key = self
            .publisher
            .stage_rendition(&job.video_id, &profile.label, artifact)
            .await?;
        record.mark_rendition_done(&profile.label, key, artifact.size_bytes, &artifact.checksum);
        self.tracker.put(&record).await?;

        debug!(
            job_id = %job.job_id,
            profile = %profile.label,
            outstanding = record.outstanding().len(),
            "Rendition staged"
        );
        Ok(ReportOutcome::Recorded)
    }

    /// Record a failed rendition attempt and decide what happens next.
    pub async fn rendition_failed(
        &self,
        job: &TranscodeJob,
        profile: &RenditionProfile,
        error: &PipelineError,
    ) -> PipelineResult<FailureDisposition> {
        let mut record = self.load(job).await?;

        if record.is_terminal() {
            return Ok(FailureDisposition::Stale);
        }
        if record.state == TranscodeState::Cancelling {
            self.publisher.discard(&record).await?;
            return Ok(FailureDisposition::Cancelled);
        }

        let attempts = record.mark_rendition_attempt(&profile.label, error.to_string());
        let permanent = error.is_permanent();

        if permanent || attempts >= self.rendition_retries {
            record.mark_rendition_failed(&profile.label);
            let category = error.failure_category();
            record.fail(
                category,
                format!(
                    "rendition {} failed after {} attempt(s): {}",
                    profile.label, attempts, error
                ),
            );
            self.tracker.put(&record).await?;
            warn!(
                job_id = %job.job_id,
                profile = %profile.label,
                attempts,
                permanent,
                "Rendition failed terminally, failing job"
            );
            Ok(FailureDisposition::JobFailed(category))
        } else {
            self.tracker.put(&record).await?;
            Ok(FailureDisposition::Retry { attempt: attempts })
        }
    }

    /// Fail the whole job for a cause that is not tied to one rendition
    /// (missing raw asset, corrupt container).
    pub async fn job_failed(
        &self,
        job: &TranscodeJob,
        category: FailureCategory,
        detail: impl Into<String>,
    ) -> PipelineResult<()> {
        let mut record = self.load(job).await?;
        if record.is_terminal() {
            return Ok(());
        }
        record.fail(category, detail);
        self.tracker.put(&record).await?;
        Ok(())
    }

    /// Publication check: make the rendition set visible once every
    /// requested rendition is durably recorded done.
    ///
    /// Safe to re-run at any crash point: presence is re-verified, the
    /// manifest write is idempotent, and a record already `ready` short
    /// circuits.
    pub async fn finalize(&self, job: &TranscodeJob) -> PipelineResult<FinalizeOutcome> {
        let mut record = self.load(job).await?;

        match record.state {
            TranscodeState::Ready => return Ok(FinalizeOutcome::Published),
            TranscodeState::Failed => {
                return Ok(FinalizeOutcome::AlreadyFailed(
                    record.failure.unwrap_or(FailureCategory::TranscodeFailed),
                ))
            }
            TranscodeState::Cancelling => {
                self.publisher.discard(&record).await?;
                return Ok(FinalizeOutcome::Cancelled);
            }
            TranscodeState::Queued | TranscodeState::Processing => {}
        }

        if !record.all_done() {
            return Err(PipelineError::job_failed(format!(
                "renditions still outstanding at finalize: {:?}",
                record.outstanding()
            )));
        }

        // (a) Every object must be present before anything becomes
        // visible. A missing object sends its rendition back to pending
        // and the delivery back to the queue.
        let missing = self.publisher.verify_staged(&record).await?;
        if !missing.is_empty() {
            for label in &missing {
                if let Some(r) = record.renditions.get_mut(label) {
                    r.status = reel_models::RenditionStatus::Pending;
                    r.object_key = None;
                }
            }
            self.tracker.put(&record).await?;
            return Err(PipelineError::job_failed(format!(
                "staged objects missing at publish time: {:?}",
                missing
            )));
        }

        // (b) Manifest, (c) status flip, (d) completion event.
        self.publisher.put_manifest(&record).await?;
        record.complete();
        self.tracker.put(&record).await?;
        self.publisher.emit_completion(&record).await.ok();

        info!(
            job_id = %job.job_id,
            video_id = %job.video_id,
            renditions = record.renditions.len(),
            "Job published"
        );
        Ok(FinalizeOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{artifact, context, test_job, TestContext};
    use reel_models::RenditionStatus;

    async fn drive_to_done(ctx: &TestContext, job: &TranscodeJob, labels: &[&str]) {
        for label in labels {
            let profile = RenditionProfile::from_label(label).unwrap();
            let art = artifact(&ctx.dir, &format!("{}-bytes", label)).await;
            let outcome = ctx
                .orchestrator
                .rendition_done(job, &profile, &art)
                .await
                .unwrap();
            assert_eq!(outcome, ReportOutcome::Recorded);
        }
    }

    #[tokio::test]
    async fn happy_path_publishes_the_full_set() {
        let ctx = context(3).await;
        let job = test_job(&["480p", "720p"]);
        ctx.seed_queued(&job).await;

        match ctx.orchestrator.begin(&job, 1).await.unwrap() {
            BeginDisposition::Proceed(record) => {
                assert_eq!(record.state, TranscodeState::Processing)
            }
            other => panic!("unexpected disposition: {:?}", other),
        }

        drive_to_done(&ctx, &job, &["480p", "720p"]).await;
        let outcome = ctx.orchestrator.finalize(&job).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::Published);

        let record = ctx.record(&job.video_id).await;
        assert_eq!(record.state, TranscodeState::Ready);
        let manifest = record.manifest();
        assert_eq!(manifest.entries.len(), 2);
        for key in manifest.object_keys() {
            assert!(ctx.store.contains(key).await, "missing object {}", key);
        }
        assert!(ctx.store.contains(&format!("{}/manifest.json", job.video_id)).await);
        assert_eq!(ctx.events.count().await, 1);
    }

    #[tokio::test]
    async fn publication_is_idempotent_under_redelivery() {
        let ctx = context(3).await;
        let job = test_job(&["480p", "720p"]);
        ctx.seed_queued(&job).await;

        ctx.orchestrator.begin(&job, 1).await.unwrap();
        drive_to_done(&ctx, &job, &["480p", "720p"]).await;
        ctx.orchestrator.finalize(&job).await.unwrap();

        let keys_before = ctx.store.keys().await;
        let puts_before = ctx.store.total_puts().await;

        // Redelivery of the whole job: stale reports no-op, finalize short
        // circuits, the live rendition set is unchanged.
        match ctx.orchestrator.begin(&job, 2).await.unwrap() {
            BeginDisposition::AlreadyTerminal(TranscodeState::Ready) => {}
            other => panic!("unexpected disposition: {:?}", other),
        }
        let profile = RenditionProfile::p480();
        let art = artifact(&ctx.dir, "480p-bytes").await;
        assert_eq!(
            ctx.orchestrator
                .rendition_done(&job, &profile, &art)
                .await
                .unwrap(),
            ReportOutcome::Stale
        );
        assert_eq!(
            ctx.orchestrator.finalize(&job).await.unwrap(),
            FinalizeOutcome::Published
        );

        assert_eq!(ctx.store.keys().await, keys_before);
        assert_eq!(ctx.store.total_puts().await, puts_before);
        assert_eq!(ctx.record(&job.video_id).await.state, TranscodeState::Ready);
    }

    #[tokio::test]
    async fn one_failed_rendition_fails_the_whole_job() {
        let ctx = context(3).await;
        let job = test_job(&["480p", "720p"]);
        ctx.seed_queued(&job).await;
        ctx.orchestrator.begin(&job, 1).await.unwrap();

        // 720p succeeds first.
        drive_to_done(&ctx, &job, &["720p"]).await;

        // 480p burns through its whole budget on transient failures.
        let profile = RenditionProfile::p480();
        let transient = PipelineError::Media(reel_media::MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            None,
            Some(137),
        ));
        for attempt in 1..3 {
            assert_eq!(
                ctx.orchestrator
                    .rendition_failed(&job, &profile, &transient)
                    .await
                    .unwrap(),
                FailureDisposition::Retry { attempt }
            );
        }
        match ctx
            .orchestrator
            .rendition_failed(&job, &profile, &transient)
            .await
            .unwrap()
        {
            FailureDisposition::JobFailed(category) => {
                assert_eq!(category, reel_models::FailureCategory::TranscodeFailed)
            }
            other => panic!("unexpected disposition: {:?}", other),
        }

        let record = ctx.record(&job.video_id).await;
        assert_eq!(record.state, TranscodeState::Failed);
        assert_eq!(record.renditions["480p"].status, RenditionStatus::Failed);
        assert_eq!(record.renditions["480p"].attempts, 3);

        // Nothing was published, even though 720p succeeded.
        assert!(!ctx.store.contains(&format!("{}/manifest.json", job.video_id)).await);
        assert_eq!(ctx.events.count().await, 0);
    }

    #[tokio::test]
    async fn permanent_failures_skip_the_retry_budget() {
        let ctx = context(3).await;
        let job = test_job(&["480p"]);
        ctx.seed_queued(&job).await;
        ctx.orchestrator.begin(&job, 1).await.unwrap();

        let corrupt = PipelineError::Media(reel_media::MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            Some("Invalid data found when processing input".to_string()),
            Some(1),
        ));
        match ctx
            .orchestrator
            .rendition_failed(&job, &RenditionProfile::p480(), &corrupt)
            .await
            .unwrap()
        {
            FailureDisposition::JobFailed(category) => {
                assert_eq!(category, reel_models::FailureCategory::SourceUnreadable)
            }
            other => panic!("unexpected disposition: {:?}", other),
        }
        assert_eq!(ctx.record(&job.video_id).await.state, TranscodeState::Failed);
    }

    #[tokio::test]
    async fn transient_failures_within_budget_still_reach_ready() {
        let ctx = context(3).await;
        let job = test_job(&["480p"]);
        ctx.seed_queued(&job).await;
        ctx.orchestrator.begin(&job, 1).await.unwrap();

        let transient = PipelineError::Media(reel_media::MediaError::Timeout(30));
        for attempt in 1..3 {
            assert_eq!(
                ctx.orchestrator
                    .rendition_failed(&job, &RenditionProfile::p480(), &transient)
                    .await
                    .unwrap(),
                FailureDisposition::Retry { attempt }
            );
        }

        drive_to_done(&ctx, &job, &["480p"]).await;
        assert_eq!(
            ctx.orchestrator.finalize(&job).await.unwrap(),
            FinalizeOutcome::Published
        );
        assert_eq!(ctx.record(&job.video_id).await.state, TranscodeState::Ready);
    }

    #[tokio::test]
    async fn redelivery_resumes_outstanding_renditions_only() {
        let ctx = context(3).await;
        let job = test_job(&["480p", "720p"]);
        ctx.seed_queued(&job).await;

        // First worker stages 480p, then dies before acking.
        ctx.orchestrator.begin(&job, 1).await.unwrap();
        drive_to_done(&ctx, &job, &["480p"]).await;

        // Second worker claims after the lease expires.
        let record = match ctx.orchestrator.begin(&job, 2).await.unwrap() {
            BeginDisposition::Proceed(record) => record,
            other => panic!("unexpected disposition: {:?}", other),
        };
        assert_eq!(record.outstanding(), vec!["720p"]);

        // It re-stages the same 480p bytes anyway (same checksum): the
        // deterministic key means no second upload happens.
        let art = artifact(&ctx.dir, "480p-bytes").await;
        ctx.orchestrator
            .rendition_done(&job, &RenditionProfile::p480(), &art)
            .await
            .unwrap();
        let key = ctx.record(&job.video_id).await.renditions["480p"]
            .object_key
            .clone()
            .unwrap();
        assert_eq!(ctx.store.put_count(&key).await, 1);

        drive_to_done(&ctx, &job, &["720p"]).await;
        assert_eq!(
            ctx.orchestrator.finalize(&job).await.unwrap(),
            FinalizeOutcome::Published
        );
    }

    #[tokio::test]
    async fn cancelled_jobs_discard_staged_output() {
        let ctx = context(3).await;
        let job = test_job(&["480p", "720p"]);
        ctx.seed_queued(&job).await;
        ctx.orchestrator.begin(&job, 1).await.unwrap();
        drive_to_done(&ctx, &job, &["480p"]).await;

        // Video deleted while the job is in flight.
        let mut record = ctx.record(&job.video_id).await;
        record.cancel();
        ctx.tracker.put(&record).await.unwrap();

        // The in-flight worker finishes its current rendition, then the
        // next report is refused and staged output disappears.
        let art = artifact(&ctx.dir, "720p-bytes").await;
        assert_eq!(
            ctx.orchestrator
                .rendition_done(&job, &RenditionProfile::p720(), &art)
                .await
                .unwrap(),
            ReportOutcome::Cancelled
        );
        assert!(ctx.store.keys().await.is_empty());
        assert_eq!(ctx.events.count().await, 0);
    }

    #[tokio::test]
    async fn ready_is_never_visible_with_a_missing_object() {
        let ctx = context(3).await;
        let job = test_job(&["480p", "720p"]);
        ctx.seed_queued(&job).await;
        ctx.orchestrator.begin(&job, 1).await.unwrap();
        drive_to_done(&ctx, &job, &["480p", "720p"]).await;

        // An object vanishes between staging and publication.
        let key = ctx.record(&job.video_id).await.renditions["720p"]
            .object_key
            .clone()
            .unwrap();
        ctx.store.remove(&key).await;

        let err = ctx.orchestrator.finalize(&job).await.unwrap_err();
        assert!(err.to_string().contains("missing"));

        let record = ctx.record(&job.video_id).await;
        assert_ne!(record.state, TranscodeState::Ready);
        assert_eq!(record.renditions["720p"].status, RenditionStatus::Pending);
        assert_eq!(ctx.events.count().await, 0);
    }

    #[tokio::test]
    async fn missing_record_is_recreated_at_claim_time() {
        let ctx = context(3).await;
        let job = test_job(&["480p"]);
        // No seed: enqueue-time record was lost.

        match ctx.orchestrator.begin(&job, 1).await.unwrap() {
            BeginDisposition::Proceed(record) => {
                assert_eq!(record.video_id, job.video_id);
                assert_eq!(record.renditions.len(), 1);
            }
            other => panic!("unexpected disposition: {:?}", other),
        }
        assert_eq!(
            ctx.record(&job.video_id).await.state,
            TranscodeState::Processing
        );
    }

    #[tokio::test]
    async fn ready_redelivery_reemits_the_completion_event() {
        let ctx = context(3).await;
        let job = test_job(&["480p"]);
        ctx.seed_queued(&job).await;
        ctx.orchestrator.begin(&job, 1).await.unwrap();
        drive_to_done(&ctx, &job, &["480p"]).await;
        ctx.orchestrator.finalize(&job).await.unwrap();
        assert_eq!(ctx.events.count().await, 1);

        // Crash between status flip and ack: redelivery re-emits for
        // downstream consumers, who dedup on job_id.
        ctx.orchestrator.begin(&job, 2).await.unwrap();
        assert_eq!(ctx.events.count().await, 2);
    }
}
