//! Thumbnail extraction.

use std::path::{Path, PathBuf};

use reel_models::VideoId;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::transcode::sha256_file;

/// Thumbnail frame size.
pub const THUMBNAIL_WIDTH: u32 = 1280;
pub const THUMBNAIL_HEIGHT: u32 = 720;
/// Grab the frame one second in, past any black lead-in.
pub const THUMBNAIL_OFFSET_SECS: f64 = 1.0;

/// Extracted thumbnail, ready to be staged.
#[derive(Debug, Clone)]
pub struct ThumbnailArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Extract a single-frame JPEG thumbnail from the raw asset.
pub async fn extract_thumbnail(
    input: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    video_id: &VideoId,
    runner: &FfmpegRunner,
) -> MediaResult<ThumbnailArtifact> {
    let input = input.as_ref();
    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    let output = out_dir.as_ref().join(format!("cover_{}.jpg", video_id));

    let cmd = FfmpegCommand::new(input, &output)
        .seek(THUMBNAIL_OFFSET_SECS)
        .single_frame()
        .frame_size(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT);

    runner.run(&cmd).await?;

    let size_bytes = tokio::fs::metadata(&output).await?.len();
    let checksum = sha256_file(&output).await?;

    Ok(ThumbnailArtifact {
        path: output,
        size_bytes,
        checksum,
    })
}
