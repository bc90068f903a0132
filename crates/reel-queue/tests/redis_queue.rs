//! Queue integration tests against a live Redis.

use reel_models::{RenditionProfile, VideoId};
use reel_queue::{JobQueue, TranscodeJob};

fn test_job(video: &str) -> TranscodeJob {
    TranscodeJob::new(
        VideoId::from_string(video),
        format!("raw/{}", video),
        vec![RenditionProfile::p480(), RenditionProfile::p720()],
    )
}

/// Test job enqueue, consume, and ack cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job = test_job("it-enqueue");
    let job_id = job.job_id.clone();

    let message_id = queue.enqueue(&job).await.expect("Failed to enqueue");
    println!("Enqueued job {} with message ID {}", job_id, message_id);

    let jobs = queue
        .consume("test-consumer", 1000, 1)
        .await
        .expect("Failed to consume");

    assert_eq!(jobs.len(), 1);
    let (lease, consumed) = &jobs[0];
    assert_eq!(consumed.job_id, job_id);
    assert_eq!(consumed.requested_renditions.len(), 2);

    queue.ack(lease).await.expect("Failed to ack");
}

/// A dedup token rejects a second submit until cleared.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dedup_token() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job = test_job("it-dedup").with_dedup_token("token-1");
    queue.enqueue(&job).await.expect("first enqueue");

    let duplicate = test_job("it-dedup").with_dedup_token("token-1");
    let err = queue.enqueue(&duplicate).await.unwrap_err();
    assert!(matches!(err, reel_queue::QueueError::DuplicateJob(_)));

    queue.clear_dedup(&job).await.expect("clear dedup");
    queue.enqueue(&duplicate).await.expect("enqueue after clear");
}

/// Heartbeat holds the lease; ack releases it.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_heartbeat_lease() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job = test_job("it-heartbeat");
    queue.enqueue(&job).await.expect("enqueue");

    let jobs = queue.consume("hb-consumer", 1000, 1).await.expect("consume");
    let (lease, _) = &jobs[0];

    assert!(queue.heartbeat(lease).await.expect("heartbeat while held"));

    queue.ack(lease).await.expect("ack");
    assert!(
        !queue.heartbeat(lease).await.expect("heartbeat after ack"),
        "acked entry must report the lease gone"
    );
}

/// A nacked delivery is immediately reclaimable by another worker.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_nack_redelivery() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job = test_job("it-nack");
    let job_id = job.job_id.clone();
    queue.enqueue(&job).await.expect("enqueue");

    let jobs = queue.consume("nack-consumer", 1000, 1).await.expect("consume");
    let (lease, _) = &jobs[0];
    queue.nack(lease).await.expect("nack");

    // A second worker picks the entry up without waiting out the
    // visibility timeout, and the first holder's lease is gone.
    let min_idle_ms = queue.visibility_timeout().as_millis() as u64;
    let claimed = queue
        .claim_stale("second-consumer", min_idle_ms, 5)
        .await
        .expect("claim stale");
    let reclaimed = claimed
        .iter()
        .find(|(_, j)| j.job_id == job_id)
        .expect("nacked job reclaimable immediately");

    assert!(!queue.heartbeat(lease).await.expect("heartbeat after reclaim"));
    queue.ack(&reclaimed.0).await.expect("ack claimed");
}

/// Jobs with an unknown schema version land in the DLQ, not in a worker.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_unknown_schema_goes_to_dlq() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job = test_job("it-schema");
    let mut payload = serde_json::to_value(&job).expect("to_value");
    payload["schema_version"] = serde_json::json!(99);

    // Inject the future-versioned payload directly.
    let client = redis::Client::open(
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
    )
    .expect("redis client");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("connection");
    let stream =
        std::env::var("QUEUE_STREAM").unwrap_or_else(|_| "reel:transcode:jobs".to_string());
    let _: String = redis::cmd("XADD")
        .arg(&stream)
        .arg("*")
        .arg("job")
        .arg(payload.to_string())
        .query_async(&mut conn)
        .await
        .expect("xadd");

    let dlq_before = queue.dlq_len().await.expect("dlq len");
    let jobs = queue.consume("schema-consumer", 1000, 5).await.expect("consume");
    assert!(
        jobs.iter().all(|(_, j)| j.job_id != job.job_id),
        "future-versioned job must not reach a worker"
    );
    let dlq_after = queue.dlq_len().await.expect("dlq len");
    assert!(dlq_after > dlq_before);
}
