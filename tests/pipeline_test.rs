//! End-to-end pipeline tests: submission through generation to published
//! output, including retry behavior, the wall-clock watchdog, and the
//! webhook event stream.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TestHarness;
use reelgen::backend::MockBackend;
use reelgen_core::{AssetKind, Error, JobStatus};
use reelgen_db::queries;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Happy path: submit -> generate -> publish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_job_publishes_video_and_thumbnail() {
    let harness = TestHarness::new().await;

    let mut req = common::request("a calm sunrise over water");
    req.settings.enhance_frames = true;
    let job = harness.queue.submit(&req).unwrap();

    let done = harness
        .wait_for_status(job.id, JobStatus::Completed, Duration::from_secs(10))
        .await;
    assert_eq!(done.progress, 100.0);
    assert_eq!(done.stage.as_deref(), Some("completed"));
    assert!(done.error.is_none());
    assert!(done.completed_at.is_some());

    let video_url = done.output_url.unwrap();
    assert_eq!(
        video_url,
        format!("http://localhost/media/videos/{}/video.mp4", job.id)
    );
    let thumb_url = done.thumbnail_url.unwrap();
    assert_eq!(
        thumb_url,
        format!("http://localhost/media/thumbnails/{}/thumbnail.jpg", job.id)
    );

    // published objects really exist
    let store = harness.queue.assets().store().clone();
    let video = store
        .download(&format!("videos/{}/video.mp4", job.id))
        .await
        .unwrap();
    assert_eq!(&video[4..8], b"ftyp");
    let thumb = store
        .download(&format!("thumbnails/{}/thumbnail.jpg", job.id))
        .await
        .unwrap();
    assert!(image::load_from_memory(&thumb).is_ok());

    // transient frames are removed once the job completes
    let mut tries = 0;
    loop {
        let files = store.list(&format!("frames/{}", job.id)).await.unwrap();
        let rows = {
            let conn = harness.conn();
            queries::assets::list_job_assets(&conn, job.id, Some(AssetKind::Frame)).unwrap()
        };
        if files.is_empty() && rows.is_empty() {
            break;
        }
        tries += 1;
        assert!(tries < 200, "frame cleanup never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // durable asset rows remain
    let conn = harness.conn();
    let rows = queries::assets::list_job_assets(&conn, job.id, None).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|a| a.kind == AssetKind::Video));
    assert!(rows.iter().any(|a| a.kind == AssetKind::Thumbnail));
}

// ---------------------------------------------------------------------------
// Transient failures retry, then succeed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let backend = Arc::new(MockBackend::new());
    backend.queue_failure(Error::model("inference worker crashed"));
    backend.queue_failure(Error::model("inference worker crashed"));
    let harness = TestHarness::with_backend(backend.clone()).await;

    let job = harness.submit("eventually succeeds");
    let done = harness
        .wait_for_status(job.id, JobStatus::Completed, Duration::from_secs(10))
        .await;

    assert_eq!(backend.synthesize_calls(), 3, "two failures plus the success");
    assert!(done.error.is_none());
    assert!(done.output_url.is_some());
}

// ---------------------------------------------------------------------------
// Retry budget exhausted: failed once, notified once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_retries_fail_the_job_and_notify_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({"event": "job.failed"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let backend = Arc::new(MockBackend::new());
    for _ in 0..4 {
        backend.queue_failure(Error::model("inference worker crashed"));
    }
    let harness = TestHarness::with_backend(backend.clone()).await;

    let mut req = common::request("doomed");
    req.webhook_url = Some(server.uri());
    let job = harness.queue.submit(&req).unwrap();

    let failed = harness
        .wait_for_status(job.id, JobStatus::Failed, Duration::from_secs(10))
        .await;

    // first attempt plus the full retry budget
    assert_eq!(backend.synthesize_calls(), 4);
    assert!(failed.error.unwrap().contains("Model error"));
    assert!(failed.output_url.is_none());

    // nothing was published
    let store = harness.queue.assets().store();
    assert!(store.list("videos").await.unwrap().is_empty());
}

#[tokio::test]
async fn validation_failures_do_not_retry() {
    let backend = Arc::new(MockBackend::new());
    backend.queue_failure(Error::validation("prompt rejected by safety filter"));
    let harness = TestHarness::with_backend(backend.clone()).await;

    let job = harness.submit("rejected");
    let failed = harness
        .wait_for_status(job.id, JobStatus::Failed, Duration::from_secs(10))
        .await;

    assert_eq!(backend.synthesize_calls(), 1, "non-retryable error retried");
    assert!(failed.error.unwrap().contains("safety filter"));
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

#[tokio::test]
async fn runaway_jobs_are_timed_out_and_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({"event": "job.failed"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut config = common::test_config();
    config.queue.job_timeout_secs = 1;
    // every backend call outlasts the watchdog
    let backend = Arc::new(MockBackend::with_latency_ms(1500));
    let harness = TestHarness::with_config_and_backend(config, backend).await;

    let mut req = common::request("runaway");
    req.webhook_url = Some(server.uri());
    let job = harness.queue.submit(&req).unwrap();

    let failed = harness
        .wait_for_status(job.id, JobStatus::Failed, Duration::from_secs(10))
        .await;
    assert!(failed.error.unwrap().contains("wall-clock limit"));

    // the worker releases its slot just after persisting the failure
    let mut tries = 0;
    while harness.queue.active_count() != 0 {
        tries += 1;
        assert!(tries < 200, "slot was never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Webhook event stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn webhook_events_arrive_in_lifecycle_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let harness = TestHarness::new().await;
    let mut req = common::request("sequenced");
    req.settings.enhance_frames = true;
    req.webhook_url = Some(server.uri());
    let job = harness.queue.submit(&req).unwrap();

    harness
        .wait_for_status(job.id, JobStatus::Completed, Duration::from_secs(10))
        .await;

    let requests = server.received_requests().await.unwrap();
    let payloads: Vec<serde_json::Value> = requests
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert!(payloads.len() >= 3, "expected a full event stream: {payloads:?}");

    assert_eq!(payloads.first().unwrap()["event"], "job.started");
    let last = payloads.last().unwrap();
    assert_eq!(last["event"], "job.completed");
    assert_eq!(last["progress"], 100.0);

    let completed = payloads.iter().filter(|p| p["event"] == "job.completed").count();
    assert_eq!(completed, 1, "terminal event must be sent exactly once");
    assert!(payloads.iter().all(|p| p["event"] != "job.failed"));
    assert!(payloads.iter().all(|p| p["jobId"] == job.id.to_string()));

    let progresses: Vec<f64> = payloads
        .iter()
        .filter_map(|p| p["progress"].as_f64())
        .collect();
    assert!(
        progresses.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {progresses:?}"
    );
}
