//! Redis Streams transcode job queue.
//!
//! This crate provides:
//! - Durable at-least-once job delivery via Redis Streams consumer groups
//! - Lease management: heartbeat renewal, nack, stale-claim recovery
//! - Delivery retry counters and a dead letter queue
//! - Completion events via Redis Pub/Sub

pub mod error;
pub mod events;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use events::{CompletionEvent, EventChannel, COMPLETION_CHANNEL};
pub use job::{decode_job, TranscodeJob, SCHEMA_VERSION};
pub use queue::{JobQueue, Lease, QueueConfig};
