//! Per-profile transcoding.
//!
//! Each invocation produces one rendition artifact: the output file, its
//! size, and its SHA-256 checksum. The checksum is what makes rendition
//! store keys deterministic, so it is computed here, next to the bytes.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use reel_models::RenditionProfile;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// One produced rendition output, ready to be staged.
#[derive(Debug, Clone)]
pub struct TranscodedArtifact {
    /// Local path of the output file
    pub path: PathBuf,
    /// Output size in bytes
    pub size_bytes: u64,
    /// SHA-256 of the output, hex encoded
    pub checksum: String,
}

/// Transcode `input` into `out_dir` for one rendition profile.
pub async fn transcode_rendition(
    input: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    profile: &RenditionProfile,
    runner: &FfmpegRunner,
) -> MediaResult<TranscodedArtifact> {
    let input = input.as_ref();
    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    let output = out_dir.as_ref().join(format!("{}.mp4", profile.label));

    let cmd = FfmpegCommand::new(input, &output)
        .output_args(profile.to_ffmpeg_args())
        // Front-load the moov atom so renditions start playing immediately.
        .output_arg("-movflags")
        .output_arg("+faststart");

    runner.run(&cmd).await?;

    let size_bytes = tokio::fs::metadata(&output).await?.len();
    let checksum = sha256_file(&output).await?;

    debug!(
        "Transcoded {} rendition: {} bytes, sha256 {}",
        profile.label, size_bytes, checksum
    );

    Ok(TranscodedArtifact {
        path: output,
        size_bytes,
        checksum,
    })
}

/// Compute the SHA-256 of a file, hex encoded.
pub async fn sha256_file(path: impl AsRef<Path>) -> MediaResult<String> {
    let mut file = tokio::fs::File::open(path.as_ref()).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checksum_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.bin");
        tokio::fs::write(&path, b"the same bytes every time").await.unwrap();

        let first = sha256_file(&path).await.unwrap();
        let second = sha256_file(&path).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[tokio::test]
    async fn checksum_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        tokio::fs::write(&a, b"rendition a").await.unwrap();
        tokio::fs::write(&b, b"rendition b").await.unwrap();

        assert_ne!(
            sha256_file(&a).await.unwrap(),
            sha256_file(&b).await.unwrap()
        );
    }

    #[tokio::test]
    async fn missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = transcode_rendition(
            dir.path().join("missing.mp4"),
            dir.path(),
            &reel_models::RenditionProfile::p480(),
            &FfmpegRunner::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
