//! Shared data models for the Reel transcode pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job and video identifiers
//! - Rendition profiles (the resolution/bitrate ladder)
//! - The durable per-video transcode status record
//! - Failure categories surfaced to the CRUD layer

pub mod job;
pub mod record;
pub mod rendition;
pub mod video;

// Re-export common types
pub use job::JobId;
pub use record::{
    FailureCategory, JobRecord, ManifestEntry, RenditionManifest, RenditionRecord, TranscodeState,
};
pub use rendition::{ProfileError, RenditionProfile, RenditionStatus};
pub use video::VideoId;
