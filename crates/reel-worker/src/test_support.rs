//! In-memory collaborators for orchestrator and transcoder tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use reel_media::TranscodedArtifact;
use reel_models::{JobRecord, RenditionProfile, VideoId};
use reel_queue::{CompletionEvent, QueueResult, TranscodeJob};
use reel_status::{StatusResult, StatusTracker};
use reel_storage::{BlobStore, StorageError, StorageResult};

use crate::orchestrator::Orchestrator;
use crate::publisher::{CompletionSink, ResultPublisher};

/// In-memory status tracker.
#[derive(Default)]
pub struct MemoryTracker {
    records: Mutex<HashMap<String, JobRecord>>,
}

#[async_trait]
impl StatusTracker for MemoryTracker {
    async fn get(&self, video_id: &VideoId) -> StatusResult<Option<JobRecord>> {
        Ok(self.records.lock().await.get(video_id.as_str()).cloned())
    }

    async fn put(&self, record: &JobRecord) -> StatusResult<()> {
        self.records
            .lock()
            .await
            .insert(record.video_id.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, video_id: &VideoId) -> StatusResult<()> {
        self.records.lock().await.remove(video_id.as_str());
        Ok(())
    }
}

/// In-memory blob store tracking per-key upload counts.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<HashMap<String, u32>>,
}

impl MemoryStore {
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn put_count(&self, key: &str) -> u32 {
        self.puts.lock().await.get(key).copied().unwrap_or(0)
    }

    pub async fn total_puts(&self) -> u32 {
        self.puts.lock().await.values().sum()
    }

    pub async fn remove(&self, key: &str) {
        self.objects.lock().await.remove(key);
    }

    async fn record_put(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().await.insert(key.to_string(), bytes);
        *self.puts.lock().await.entry(key.to_string()).or_insert(0) += 1;
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put_file(&self, key: &str, path: &Path, _content_type: &str) -> StorageResult<()> {
        let bytes = tokio::fs::read(path).await?;
        self.record_put(key, bytes).await;
        Ok(())
    }

    async fn put_bytes(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        self.record_put(key, bytes).await;
        Ok(())
    }

    async fn fetch_file(&self, key: &str, path: &Path) -> StorageResult<()> {
        let bytes = self
            .objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().await.contains_key(key))
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<u32> {
        let mut objects = self.objects.lock().await;
        for key in keys {
            objects.remove(key);
        }
        Ok(keys.len() as u32)
    }
}

/// Completion sink that records events instead of publishing them.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CompletionEvent>>,
}

impl RecordingSink {
    pub async fn count(&self) -> usize {
        self.events.lock().await.len()
    }
}

#[async_trait]
impl CompletionSink for RecordingSink {
    async fn publish(&self, event: &CompletionEvent) -> QueueResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Everything an orchestrator test needs, wired to in-memory backends.
pub struct TestContext {
    pub tracker: Arc<MemoryTracker>,
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingSink>,
    pub orchestrator: Orchestrator,
    pub dir: tempfile::TempDir,
}

impl TestContext {
    /// Seed the enqueue-time status record, the way the submitter does.
    pub async fn seed_queued(&self, job: &TranscodeJob) {
        let record = JobRecord::queued(
            job.job_id.clone(),
            job.video_id.clone(),
            &job.requested_renditions,
        );
        self.tracker.put(&record).await.unwrap();
    }

    /// Fetch the current record, which must exist.
    pub async fn record(&self, video_id: &VideoId) -> JobRecord {
        self.tracker.get(video_id).await.unwrap().expect("record exists")
    }
}

/// Build a test context with the given per-rendition attempt ceiling.
pub async fn context(rendition_retries: u32) -> TestContext {
    let tracker = Arc::new(MemoryTracker::default());
    let store = Arc::new(MemoryStore::default());
    let events = Arc::new(RecordingSink::default());

    let publisher = ResultPublisher::new(store.clone(), events.clone());
    let orchestrator = Orchestrator::new(tracker.clone(), publisher, rendition_retries);

    TestContext {
        tracker,
        store,
        events,
        orchestrator,
        dir: tempfile::tempdir().expect("tempdir"),
    }
}

/// Job requesting the given profiles.
pub fn test_job(labels: &[&str]) -> TranscodeJob {
    let profiles = labels
        .iter()
        .map(|l| RenditionProfile::from_label(l).expect("known profile"))
        .collect();
    let video_id = VideoId::new();
    TranscodeJob::new(video_id.clone(), format!("raw/{}", video_id), profiles)
}

/// Write a fixture artifact whose checksum tracks its contents, so the
/// same contents always produce the same deterministic key.
pub async fn artifact(dir: &tempfile::TempDir, contents: &str) -> TranscodedArtifact {
    let path: PathBuf = dir.path().join(format!("{}.mp4", contents.replace('/', "_")));
    tokio::fs::write(&path, contents.as_bytes()).await.unwrap();
    let checksum = reel_media::sha256_file(&path).await.unwrap();
    TranscodedArtifact {
        size_bytes: contents.len() as u64,
        path,
        checksum,
    }
}
