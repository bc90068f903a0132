//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder with an HTTP scrape endpoint when
/// `METRICS_ADDR` is set.
pub fn init_metrics() {
    let addr = match std::env::var("METRICS_ADDR") {
        Ok(raw) => match raw.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!("Invalid METRICS_ADDR '{}': {}", raw, e);
                return;
            }
        },
        Err(_) => return,
    };

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        tracing::warn!("Failed to install Prometheus recorder: {}", e);
    }
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "reel_transcode_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "reel_transcode_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "reel_transcode_jobs_failed_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "reel_transcode_jobs_dead_lettered_total";
    pub const JOBS_IN_FLIGHT: &str = "reel_transcode_jobs_in_flight";
    pub const RENDITIONS_PRODUCED_TOTAL: &str = "reel_renditions_produced_total";
    pub const RENDITION_RETRIES_TOTAL: &str = "reel_rendition_retries_total";
    pub const TRANSCODE_DURATION_SECONDS: &str = "reel_transcode_duration_seconds";
    pub const LEASES_LOST_TOTAL: &str = "reel_leases_lost_total";
}

/// Record a job claimed for processing.
pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
    gauge!(names::JOBS_IN_FLIGHT).increment(1.0);
}

/// Record a job finishing, in any way.
pub fn record_job_finished(outcome: &str) {
    gauge!(names::JOBS_IN_FLIGHT).decrement(1.0);
    match outcome {
        "ready" => counter!(names::JOBS_COMPLETED_TOTAL).increment(1),
        "failed" => counter!(names::JOBS_FAILED_TOTAL).increment(1),
        _ => {}
    }
}

/// Record a job moved to the DLQ.
pub fn record_job_dead_lettered() {
    counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
}

/// Record one produced rendition with its transcode duration.
pub fn record_rendition_produced(profile: &str, duration_secs: f64) {
    let labels = [("profile", profile.to_string())];
    counter!(names::RENDITIONS_PRODUCED_TOTAL, &labels).increment(1);
    histogram!(names::TRANSCODE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a rendition retry.
pub fn record_rendition_retry(profile: &str) {
    let labels = [("profile", profile.to_string())];
    counter!(names::RENDITION_RETRIES_TOTAL, &labels).increment(1);
}

/// Record a lost lease.
pub fn record_lease_lost() {
    counter!(names::LEASES_LOST_TOTAL).increment(1);
}
