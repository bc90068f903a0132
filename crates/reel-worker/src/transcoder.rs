//! Per-job transcode driver.
//!
//! Runs one claimed job end to end: resume from the durably recorded
//! rendition states, download the raw asset once, drive FFmpeg per
//! outstanding profile with bounded retries, and report every outcome to
//! the orchestrator. All side effects stay within the temp dir, the
//! external tool, and orchestrator calls.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use tokio::sync::watch;
use tracing::debug;

use reel_media::{extract_thumbnail, probe_video, transcode_rendition, FfmpegRunner, MediaError};
use reel_models::{FailureCategory, RenditionProfile};
use reel_queue::TranscodeJob;

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::orchestrator::{BeginDisposition, FailureDisposition, FinalizeOutcome, ReportOutcome};

/// Time box for thumbnail extraction; a cover frame is never worth more.
const THUMBNAIL_TIMEOUT_SECS: u64 = 60;

/// How a job run ended. Every variant is safe to ack: the record is
/// terminal or another delivery will not change the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Full rendition set published.
    Ready,
    /// Job failed terminally; raw asset retained for diagnostics.
    Failed,
    /// Video was deleted mid-flight; staged output discarded.
    Cancelled,
    /// Record was already terminal when claimed (stale redelivery).
    AlreadyTerminal,
}

/// Process one claimed transcode job.
///
/// Infrastructure errors propagate as `Err` so the executor leaves the
/// delivery unacked and at-least-once redelivery resumes the work.
/// `PipelineError::LeaseLost` means another worker owns the job now; the
/// caller must abandon without acking.
pub async fn process_transcode(
    ctx: &PipelineContext,
    job: &TranscodeJob,
    delivery_attempt: u32,
    cancel_rx: watch::Receiver<bool>,
) -> PipelineResult<JobOutcome> {
    let logger = JobLogger::new(&job.job_id, "transcode");

    let record = match ctx.orchestrator.begin(job, delivery_attempt).await? {
        BeginDisposition::Proceed(record) => record,
        BeginDisposition::AlreadyTerminal(state) => {
            logger.log_progress(&format!("Record already {}, standing down", state));
            return Ok(JobOutcome::AlreadyTerminal);
        }
        BeginDisposition::Cancelled => return Ok(JobOutcome::Cancelled),
    };

    logger.log_start(&format!(
        "{} rendition(s), {} outstanding",
        job.requested_renditions.len(),
        record.outstanding().len()
    ));

    // Per-job workspace, removed when the TempDir drops.
    let work_root = PathBuf::from(&ctx.config.work_dir);
    tokio::fs::create_dir_all(&work_root).await?;
    let work_dir = tempfile::Builder::new()
        .prefix(&format!("transcode_{}_", job.video_id))
        .tempdir_in(&work_root)?;

    // Download the raw asset once per delivery. A missing asset breaks the
    // caller's contract and cannot heal on retry.
    let source = work_dir.path().join("source.mp4");
    if let Err(e) = ctx.raw_store.fetch_file(&job.raw_asset_key, &source).await {
        if e.is_not_found() {
            let detail = format!("raw asset {} not found: {}", job.raw_asset_key, e);
            logger.log_error(&detail);
            ctx.orchestrator
                .job_failed(job, FailureCategory::SourceUnreadable, detail)
                .await?;
            return Ok(JobOutcome::Failed);
        }
        return Err(e.into());
    }

    // Probe for duration; an unreadable container fails the job outright.
    match probe_video(&source).await {
        Ok(info) => {
            ctx.orchestrator.source_probed(job, info.duration).await?;
        }
        Err(e) if e.is_input_error() => {
            let detail = format!("raw asset unreadable: {}", e);
            logger.log_error(&detail);
            ctx.orchestrator
                .job_failed(job, FailureCategory::SourceUnreadable, detail)
                .await?;
            return Ok(JobOutcome::Failed);
        }
        Err(e) => return Err(e.into()),
    }

    // Cover frame, best effort: the original publishes videos without a
    // cover when extraction fails.
    if job.generate_thumbnail && record.thumbnail_key.is_none() {
        let runner = FfmpegRunner::new()
            .with_cancel(cancel_rx.clone())
            .with_timeout(THUMBNAIL_TIMEOUT_SECS);
        match extract_thumbnail(&source, work_dir.path(), &job.video_id, &runner).await {
            Ok(thumb) => {
                ctx.orchestrator.thumbnail_done(job, &thumb).await?;
                logger.log_progress("Thumbnail staged");
            }
            Err(MediaError::Cancelled) => return Err(lease_interrupt(&cancel_rx)),
            Err(e) => logger.log_warning(&format!("Thumbnail extraction failed: {}", e)),
        }
    }

    let mut done: HashSet<String> = record
        .renditions
        .iter()
        .filter(|(_, r)| r.is_done())
        .map(|(label, _)| label.clone())
        .collect();

    for profile in &job.requested_renditions {
        if done.contains(&profile.label) {
            debug!(
                job_id = %job.job_id,
                profile = %profile.label,
                "Rendition already done, resuming past it"
            );
            continue;
        }

        if let Err(detail) = validate_profile(profile) {
            logger.log_error(&detail);
            ctx.orchestrator
                .job_failed(job, FailureCategory::ProfileMisconfigured, detail)
                .await?;
            return Ok(JobOutcome::Failed);
        }

        loop {
            if *cancel_rx.borrow() {
                return Err(PipelineError::LeaseLost);
            }

            let runner = FfmpegRunner::new()
                .with_cancel(cancel_rx.clone())
                .with_timeout(ctx.config.transcode_timeout.as_secs());

            let started = Instant::now();
            match transcode_rendition(&source, work_dir.path(), profile, &runner).await {
                Ok(artifact) => {
                    metrics::record_rendition_produced(
                        &profile.label,
                        started.elapsed().as_secs_f64(),
                    );
                    match ctx.orchestrator.rendition_done(job, profile, &artifact).await? {
                        ReportOutcome::Recorded => {
                            logger.log_progress(&format!("Rendition {} staged", profile.label));
                            done.insert(profile.label.clone());
                            break;
                        }
                        ReportOutcome::Stale => return Ok(JobOutcome::AlreadyTerminal),
                        ReportOutcome::Cancelled => return Ok(JobOutcome::Cancelled),
                    }
                }
                Err(MediaError::Cancelled) => return Err(lease_interrupt(&cancel_rx)),
                Err(e) => {
                    let error: PipelineError = e.into();
                    if error.is_infrastructure() {
                        return Err(error);
                    }
                    match ctx.orchestrator.rendition_failed(job, profile, &error).await? {
                        FailureDisposition::Retry { attempt } => {
                            metrics::record_rendition_retry(&profile.label);
                            let delay = ctx.retry.delay_for_attempt(attempt);
                            logger.log_warning(&format!(
                                "Rendition {} attempt {} failed, retrying in {:?}: {}",
                                profile.label, attempt, delay, error
                            ));
                            tokio::time::sleep(delay).await;
                        }
                        FailureDisposition::JobFailed(category) => {
                            logger.log_error(&format!(
                                "Rendition {} failed terminally ({})",
                                profile.label, category
                            ));
                            return Ok(JobOutcome::Failed);
                        }
                        FailureDisposition::Stale => return Ok(JobOutcome::AlreadyTerminal),
                        FailureDisposition::Cancelled => return Ok(JobOutcome::Cancelled),
                    }
                }
            }
        }
    }

    // Publication is decided from the recorded rendition set, so a
    // redelivered job that finds everything done converges here too.
    match ctx.orchestrator.finalize(job).await? {
        FinalizeOutcome::Published => {
            logger.log_completion(&format!(
                "Published {} rendition(s)",
                job.requested_renditions.len()
            ));
            Ok(JobOutcome::Ready)
        }
        FinalizeOutcome::AlreadyFailed(_) => Ok(JobOutcome::Failed),
        FinalizeOutcome::Cancelled => Ok(JobOutcome::Cancelled),
    }
}

/// FFmpeg was killed through the cancel channel. Lease loss is the only
/// sender; anything else is a plain cancellation.
fn lease_interrupt(cancel_rx: &watch::Receiver<bool>) -> PipelineError {
    if *cancel_rx.borrow() {
        PipelineError::LeaseLost
    } else {
        PipelineError::Cancelled
    }
}

/// Structural sanity for a requested profile. The descriptor carries full
/// profiles, so a malformed one is a caller misconfiguration, not
/// something retries can fix.
fn validate_profile(profile: &RenditionProfile) -> Result<(), String> {
    if profile.label.is_empty() {
        return Err("rendition profile with empty label".to_string());
    }
    if profile.height == 0 {
        return Err(format!("rendition profile {} has zero height", profile.label));
    }
    if profile.video_bitrate.is_empty() || profile.bufsize.is_empty() {
        return Err(format!(
            "rendition profile {} is missing bitrate settings",
            profile.label
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_profiles_validate() {
        assert!(validate_profile(&RenditionProfile::p480()).is_ok());
        assert!(validate_profile(&RenditionProfile::p1080()).is_ok());
    }

    #[test]
    fn malformed_profiles_are_rejected() {
        let mut profile = RenditionProfile::p720();
        profile.height = 0;
        assert!(validate_profile(&profile).is_err());

        let mut profile = RenditionProfile::p720();
        profile.video_bitrate = String::new();
        assert!(validate_profile(&profile).is_err());

        let mut profile = RenditionProfile::p720();
        profile.label = String::new();
        assert!(validate_profile(&profile).is_err());
    }
}
