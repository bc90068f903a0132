//! Durable per-video transcode status record.
//!
//! The `JobRecord` is the single source of truth for "is my video ready
//! yet": created when a job is enqueued, mutated only by the orchestrator,
//! read by the CRUD layer and the search indexer. Publication decisions are
//! computed from the recorded rendition *set*, never from event arrival
//! order, so redelivered messages cannot double-trigger anything.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::job::JobId;
use crate::rendition::{RenditionProfile, RenditionStatus};
use crate::video::VideoId;

/// Transcode state for a job.
///
/// `Ready` and `Failed` are terminal; `Cancelling` refuses further
/// transitions while in-flight rendition work drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeState {
    /// Waiting in the queue
    #[default]
    Queued,
    /// Claimed by a worker
    Processing,
    /// Video deleted mid-flight; staged renditions are being discarded
    Cancelling,
    /// Full rendition set published
    Ready,
    /// Terminal failure; raw asset retained for diagnostics
    Failed,
}

impl TranscodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeState::Queued => "queued",
            TranscodeState::Processing => "processing",
            TranscodeState::Cancelling => "cancelling",
            TranscodeState::Ready => "ready",
            TranscodeState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more transitions accepted).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TranscodeState::Ready | TranscodeState::Failed)
    }
}

impl fmt::Display for TranscodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generic failure cause shown to end users.
///
/// Raw tool output never reaches the CRUD layer; operators get the detail
/// string on the record and in the dead letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Raw asset missing, corrupt, or in an unsupported format
    SourceUnreadable,
    /// Requested rendition profile is unknown or invalid
    ProfileMisconfigured,
    /// Transcode kept failing within the retry budget
    TranscodeFailed,
    /// Queue or storage infrastructure gave out
    Infrastructure,
    /// Video deleted while the job was in flight
    Cancelled,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::SourceUnreadable => "source_unreadable",
            FailureCategory::ProfileMisconfigured => "profile_misconfigured",
            FailureCategory::TranscodeFailed => "transcode_failed",
            FailureCategory::Infrastructure => "infrastructure",
            FailureCategory::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One produced (or attempted) output for a job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RenditionRecord {
    /// Target profile
    pub profile: RenditionProfile,
    /// Current status
    #[serde(default)]
    pub status: RenditionStatus,
    /// Deterministic object key, set once the object is staged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    /// Output size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// SHA-256 of the output, hex encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Transcode attempts made for this rendition
    #[serde(default)]
    pub attempts: u32,
    /// Last error cause (operator detail)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenditionRecord {
    /// Create a pending record for a requested profile.
    pub fn pending(profile: RenditionProfile) -> Self {
        Self {
            profile,
            status: RenditionStatus::Pending,
            object_key: None,
            size_bytes: None,
            checksum: None,
            attempts: 0,
            error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == RenditionStatus::Done
    }
}

/// One entry of the published rendition manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestEntry {
    /// Object key in the rendition store
    pub object_key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// SHA-256 hex checksum
    pub checksum: String,
}

/// Profile label → published object, emitted with the completion event and
/// written to the rendition store as `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RenditionManifest {
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl RenditionManifest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object keys of every published rendition.
    pub fn object_keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|e| e.object_key.as_str())
    }
}

/// The durable status record for one transcode job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Owning job
    pub job_id: JobId,
    /// Owning video
    pub video_id: VideoId,
    /// Current state
    #[serde(default)]
    pub state: TranscodeState,
    /// Per-rendition sub-results, keyed by profile label
    pub renditions: BTreeMap<String, RenditionRecord>,
    /// Source duration in seconds, probed from the raw asset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Thumbnail object key, if one was generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_key: Option<String>,
    /// Generic failure cause for end users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCategory>,
    /// Operator-facing error detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Queue delivery attempts observed for this job
    #[serde(default)]
    pub delivery_attempts: u32,
    /// Creation timestamp (enqueue time)
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Set when the record reaches a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a queued record for a newly enqueued job.
    pub fn queued(job_id: JobId, video_id: VideoId, profiles: &[RenditionProfile]) -> Self {
        let now = Utc::now();
        let renditions = profiles
            .iter()
            .map(|p| (p.label.clone(), RenditionRecord::pending(p.clone())))
            .collect();

        Self {
            job_id,
            video_id,
            state: TranscodeState::Queued,
            renditions,
            duration_secs: None,
            thumbnail_key: None,
            failure: None,
            error_detail: None,
            delivery_attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Check if the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// True when every requested rendition is durably done.
    ///
    /// Computed from the recorded set; duplicate reports converge here
    /// instead of double-counting.
    pub fn all_done(&self) -> bool {
        !self.renditions.is_empty() && self.renditions.values().all(RenditionRecord::is_done)
    }

    /// Labels of renditions still outstanding.
    pub fn outstanding(&self) -> Vec<String> {
        self.renditions
            .iter()
            .filter(|(_, r)| !r.is_done())
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Mark the job as claimed by a worker.
    pub fn start(&mut self) {
        self.state = TranscodeState::Processing;
        self.updated_at = Utc::now();
    }

    /// Record a durably staged rendition.
    pub fn mark_rendition_done(
        &mut self,
        label: &str,
        object_key: impl Into<String>,
        size_bytes: u64,
        checksum: impl Into<String>,
    ) {
        if let Some(r) = self.renditions.get_mut(label) {
            r.status = RenditionStatus::Done;
            r.object_key = Some(object_key.into());
            r.size_bytes = Some(size_bytes);
            r.checksum = Some(checksum.into());
            r.error = None;
        }
        self.updated_at = Utc::now();
    }

    /// Record one failed transcode attempt for a rendition. Returns the
    /// attempt count after the increment.
    pub fn mark_rendition_attempt(&mut self, label: &str, error: impl Into<String>) -> u32 {
        let attempts = if let Some(r) = self.renditions.get_mut(label) {
            r.attempts += 1;
            r.error = Some(error.into());
            r.attempts
        } else {
            0
        };
        self.updated_at = Utc::now();
        attempts
    }

    /// Mark one rendition as permanently failed.
    pub fn mark_rendition_failed(&mut self, label: &str) {
        if let Some(r) = self.renditions.get_mut(label) {
            r.status = RenditionStatus::Failed;
        }
        self.updated_at = Utc::now();
    }

    /// Transition to `ready`.
    pub fn complete(&mut self) {
        self.state = TranscodeState::Ready;
        self.failure = None;
        self.error_detail = None;
        self.updated_at = Utc::now();
        self.completed_at = Some(Utc::now());
    }

    /// Transition to `failed` with a user-visible category and operator
    /// detail.
    pub fn fail(&mut self, category: FailureCategory, detail: impl Into<String>) {
        self.state = TranscodeState::Failed;
        self.failure = Some(category);
        self.error_detail = Some(detail.into());
        self.updated_at = Utc::now();
        self.completed_at = Some(Utc::now());
    }

    /// Transition to `cancelling`.
    pub fn cancel(&mut self) {
        self.state = TranscodeState::Cancelling;
        self.failure = Some(FailureCategory::Cancelled);
        self.updated_at = Utc::now();
    }

    /// Build the manifest of done renditions.
    pub fn manifest(&self) -> RenditionManifest {
        let entries = self
            .renditions
            .iter()
            .filter_map(|(label, r)| {
                let (key, size, checksum) = match (&r.object_key, r.size_bytes, &r.checksum) {
                    (Some(k), Some(s), Some(c)) if r.is_done() => (k, s, c),
                    _ => return None,
                };
                Some((
                    label.clone(),
                    ManifestEntry {
                        object_key: key.clone(),
                        size_bytes: size,
                        checksum: checksum.clone(),
                    },
                ))
            })
            .collect();
        RenditionManifest { entries }
    }

    /// Object keys staged so far, including the thumbnail. Used when
    /// discarding a cancelled job.
    pub fn staged_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .renditions
            .values()
            .filter_map(|r| r.object_key.clone())
            .collect();
        if let Some(thumb) = &self.thumbnail_key {
            keys.push(thumb.clone());
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::queued(
            JobId::new(),
            VideoId::new(),
            &[RenditionProfile::p480(), RenditionProfile::p720()],
        )
    }

    #[test]
    fn queued_record_has_pending_renditions() {
        let rec = record();
        assert_eq!(rec.state, TranscodeState::Queued);
        assert_eq!(rec.renditions.len(), 2);
        assert!(!rec.all_done());
        assert_eq!(rec.outstanding(), vec!["480p", "720p"]);
    }

    #[test]
    fn all_done_depends_on_the_set_not_the_order() {
        let mut rec = record();
        rec.mark_rendition_done("720p", "v/720p/abc", 10, "abc");
        assert!(!rec.all_done());
        rec.mark_rendition_done("480p", "v/480p/def", 5, "def");
        assert!(rec.all_done());

        // Duplicate report converges instead of double-counting.
        rec.mark_rendition_done("480p", "v/480p/def", 5, "def");
        assert!(rec.all_done());
        assert_eq!(rec.manifest().entries.len(), 2);
    }

    #[test]
    fn attempt_tracking_accumulates() {
        let mut rec = record();
        assert_eq!(rec.mark_rendition_attempt("480p", "boom"), 1);
        assert_eq!(rec.mark_rendition_attempt("480p", "boom again"), 2);
        assert_eq!(rec.renditions["480p"].error.as_deref(), Some("boom again"));
    }

    #[test]
    fn terminal_states() {
        let mut rec = record();
        rec.fail(FailureCategory::TranscodeFailed, "480p exhausted retries");
        assert!(rec.is_terminal());
        assert_eq!(rec.failure, Some(FailureCategory::TranscodeFailed));

        let mut rec = record();
        rec.cancel();
        assert!(!rec.is_terminal());
        assert_eq!(rec.state, TranscodeState::Cancelling);
    }

    #[test]
    fn manifest_skips_incomplete_renditions() {
        let mut rec = record();
        rec.mark_rendition_done("480p", "v/480p/def", 5, "def");
        let manifest = rec.manifest();
        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.entries["480p"].object_key, "v/480p/def");
    }

    #[test]
    fn staged_keys_include_thumbnail() {
        let mut rec = record();
        rec.mark_rendition_done("480p", "v/480p/def", 5, "def");
        rec.thumbnail_key = Some("v/thumbnail/xyz".to_string());
        let keys = rec.staged_keys();
        assert!(keys.contains(&"v/480p/def".to_string()));
        assert!(keys.contains(&"v/thumbnail/xyz".to_string()));
    }
}
