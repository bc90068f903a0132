//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Check whether the failure points at the input itself rather than the
    /// tool or the environment. Input failures are permanent: retrying the
    /// same bytes produces the same error.
    pub fn is_input_error(&self) -> bool {
        let haystack = match self {
            MediaError::InvalidVideo(_) => return true,
            MediaError::FfmpegFailed { stderr, message, .. } => {
                let mut s = message.to_lowercase();
                if let Some(err) = stderr {
                    s.push(' ');
                    s.push_str(&err.to_lowercase());
                }
                s
            }
            MediaError::FfprobeFailed { stderr, message } => {
                let mut s = message.to_lowercase();
                if let Some(err) = stderr {
                    s.push(' ');
                    s.push_str(&err.to_lowercase());
                }
                s
            }
            _ => return false,
        };

        // Patterns FFmpeg/FFprobe emit for corrupt or unsupported sources.
        haystack.contains("invalid data found")
            || haystack.contains("moov atom not found")
            || haystack.contains("unknown format")
            || haystack.contains("could not find codec")
            || haystack.contains("unsupported codec")
            || haystack.contains("no video stream")
            || haystack.contains("end of file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_input_is_classified_permanent() {
        let err = MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            Some("Invalid data found when processing input".to_string()),
            Some(1),
        );
        assert!(err.is_input_error());
    }

    #[test]
    fn tool_crash_is_not_an_input_error() {
        let err = MediaError::ffmpeg_failed("FFmpeg exited with non-zero status", None, Some(137));
        assert!(!err.is_input_error());
        assert!(!MediaError::Timeout(30).is_input_error());
    }
}
