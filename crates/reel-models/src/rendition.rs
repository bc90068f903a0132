//! Rendition profiles: the target resolution/bitrate ladder.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Error raised for unknown rendition profile labels.
///
/// An unknown label is a profile misconfiguration: it fails the rendition
/// permanently, without retries.
#[derive(Debug, Error)]
#[error("unknown rendition profile: {0}")]
pub struct ProfileError(pub String);

/// One target output encoding for a transcode job.
///
/// Profiles are identified by their label (`"720p"`); two profiles with the
/// same label are interchangeable everywhere in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RenditionProfile {
    /// Profile label (e.g. "720p")
    pub label: String,
    /// Target frame height in pixels (width follows the source aspect)
    pub height: u32,
    /// Target video bitrate (FFmpeg syntax, e.g. "2500k")
    pub video_bitrate: String,
    /// Rate-control buffer size
    pub bufsize: String,
}

impl RenditionProfile {
    /// 854x480 @ 1 Mbps.
    pub fn p480() -> Self {
        Self {
            label: "480p".to_string(),
            height: 480,
            video_bitrate: "1000k".to_string(),
            bufsize: "2000k".to_string(),
        }
    }

    /// 1280x720 @ 2.5 Mbps.
    pub fn p720() -> Self {
        Self {
            label: "720p".to_string(),
            height: 720,
            video_bitrate: "2500k".to_string(),
            bufsize: "5000k".to_string(),
        }
    }

    /// 1920x1080 @ 5 Mbps.
    pub fn p1080() -> Self {
        Self {
            label: "1080p".to_string(),
            height: 1080,
            video_bitrate: "5000k".to_string(),
            bufsize: "10000k".to_string(),
        }
    }

    /// Resolve a profile from its label.
    pub fn from_label(label: &str) -> Result<Self, ProfileError> {
        match label {
            "480p" => Ok(Self::p480()),
            "720p" => Ok(Self::p720()),
            "1080p" => Ok(Self::p1080()),
            other => Err(ProfileError(other.to_string())),
        }
    }

    /// Scale filter preserving aspect ratio (width rounded to even).
    pub fn scale_filter(&self) -> String {
        format!("scale=-2:{}", self.height)
    }

    /// FFmpeg output arguments for this profile.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-vf".to_string(),
            self.scale_filter(),
            "-c:v".to_string(),
            DEFAULT_VIDEO_CODEC.to_string(),
            "-b:v".to_string(),
            self.video_bitrate.clone(),
            "-bufsize".to_string(),
            self.bufsize.clone(),
            "-c:a".to_string(),
            DEFAULT_AUDIO_CODEC.to_string(),
            "-b:a".to_string(),
            DEFAULT_AUDIO_BITRATE.to_string(),
        ]
    }
}

impl fmt::Display for RenditionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

impl PartialEq for RenditionProfile {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

impl Eq for RenditionProfile {}

/// Per-rendition processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenditionStatus {
    /// Not yet produced (or mid-retry)
    #[default]
    Pending,
    /// Object durably staged at its deterministic key
    Done,
    /// Permanently failed or retry budget exhausted
    Failed,
}

impl RenditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenditionStatus::Pending => "pending",
            RenditionStatus::Done => "done",
            RenditionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RenditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_from_label() {
        let p = RenditionProfile::from_label("720p").unwrap();
        assert_eq!(p.height, 720);
        assert_eq!(p.video_bitrate, "2500k");
        assert!(RenditionProfile::from_label("4320p").is_err());
    }

    #[test]
    fn ffmpeg_args_follow_profile() {
        let args = RenditionProfile::p480().to_ffmpeg_args();
        assert!(args.contains(&"scale=-2:480".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"1000k".to_string()));
        assert!(args.contains(&"aac".to_string()));
    }

    #[test]
    fn profiles_compare_by_label() {
        let mut custom = RenditionProfile::p720();
        custom.video_bitrate = "9000k".to_string();
        assert_eq!(custom, RenditionProfile::p720());
    }
}
