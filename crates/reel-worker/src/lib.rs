//! Transcode worker.
//!
//! This crate provides:
//! - The bounded worker pool consuming the job queue
//! - The job orchestrator state machine
//! - The result publisher (staging, verification, manifest, events)
//! - Lease heartbeats and graceful shutdown

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod publisher;
pub mod retry;
pub mod transcoder;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::WorkerConfig;
pub use context::PipelineContext;
pub use error::{PipelineError, PipelineResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use orchestrator::{
    BeginDisposition, FailureDisposition, FinalizeOutcome, Orchestrator, ReportOutcome,
};
pub use publisher::{CompletionSink, ResultPublisher};
pub use transcoder::{process_transcode, JobOutcome};
