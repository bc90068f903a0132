//! FFmpeg CLI wrapper for the Reel transcode pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - A runner with cancellation, timeout, and stderr capture
//! - ffprobe source inspection
//! - Per-profile transcoding producing checksummed artifacts
//! - Thumbnail extraction

pub mod command;
pub mod error;
pub mod probe;
pub mod thumbnail;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use thumbnail::{extract_thumbnail, ThumbnailArtifact};
pub use transcode::{sha256_file, transcode_rendition, TranscodedArtifact};
