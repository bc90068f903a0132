//! Deterministic object key scheme.
//!
//! Keys are computed from stable inputs only, so re-running a job writes
//! the same keys it wrote before: redundant writers converge instead of
//! colliding, and a completed rendition is never duplicated.

use reel_models::VideoId;

/// Key for one published rendition: `{video_id}/{profile}/{checksum}`.
pub fn rendition_key(video_id: &VideoId, profile: &str, checksum: &str) -> String {
    format!("{}/{}/{}", video_id, profile, checksum)
}

/// Key for the thumbnail: `{video_id}/thumbnail/{checksum}`.
pub fn thumbnail_key(video_id: &VideoId, checksum: &str) -> String {
    format!("{}/thumbnail/{}", video_id, checksum)
}

/// Key for the published rendition manifest.
pub fn manifest_key(video_id: &VideoId) -> String {
    format!("{}/manifest.json", video_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic() {
        let id = VideoId::from_string("vid-1");
        let a = rendition_key(&id, "720p", "abc123");
        let b = rendition_key(&id, "720p", "abc123");
        assert_eq!(a, b);
        assert_eq!(a, "vid-1/720p/abc123");
    }

    #[test]
    fn keys_differ_per_profile_and_content() {
        let id = VideoId::from_string("vid-1");
        assert_ne!(
            rendition_key(&id, "480p", "abc"),
            rendition_key(&id, "720p", "abc")
        );
        assert_ne!(
            rendition_key(&id, "720p", "abc"),
            rendition_key(&id, "720p", "def")
        );
    }

    #[test]
    fn manifest_key_is_stable() {
        let id = VideoId::from_string("vid-1");
        assert_eq!(manifest_key(&id), "vid-1/manifest.json");
    }
}
