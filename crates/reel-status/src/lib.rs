//! Durable transcode status records.
//!
//! A thin store over Redis: one JSON `JobRecord` per video, no business
//! logic. Single-writer discipline applies: only the orchestrator mutates
//! records (creation at enqueue time by the submitter is the one sanctioned
//! exception); everyone else reads.

pub mod error;
pub mod tracker;

pub use error::{StatusError, StatusResult};
pub use tracker::{RedisStatusTracker, StatusTracker};
