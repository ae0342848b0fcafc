//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which wires a file-backed pool in a tempdir, a
//! tempdir object store, a mock backend, and a running queue worker. The
//! [`TestHarness::with_server`] constructor additionally starts Axum on a
//! random port for HTTP-level testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use reelgen::backend::{GenerationBackend, MockBackend};
use reelgen::config::Config;
use reelgen::queue::QueueManager;
use reelgen::server::{create_router, AppContext};
use reelgen::storage::ObjectStore;
use reelgen_core::{JobId, JobStatus, SubmitRequest, Tier, UserId, VideoSettings};
use reelgen_db::models::Job;
use reelgen_db::{get_conn, init_pool, DbPool, PooledConnection};

/// Small fast settings so pipelines finish in milliseconds.
pub fn settings() -> VideoSettings {
    VideoSettings {
        duration: 1,
        resolution: [64, 64],
        fps: 2,
        style: None,
        enhance_frames: false,
    }
}

pub fn request(prompt: &str) -> SubmitRequest {
    request_for(UserId::new(), prompt)
}

pub fn request_for(user_id: UserId, prompt: &str) -> SubmitRequest {
    SubmitRequest {
        user_id,
        prompt: prompt.to_string(),
        settings: settings(),
        webhook_url: None,
        tier: Tier::Free,
    }
}

/// Config tuned for tests: two worker slots, immediate retries.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.queue.max_concurrent_jobs = 2;
    config.queue.poll_interval_secs = 1;
    config.queue.retry_delay_secs = 0;
    config.queue.job_timeout_secs = 30;
    config
}

/// Test harness wrapping a fully-wired queue backed by a temp directory.
pub struct TestHarness {
    pub queue: Arc<QueueManager>,
    pub db: DbPool,
    pub config: Arc<Config>,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    /// Default harness: mock backend with no latency, worker loop running.
    pub async fn new() -> Self {
        Self::with_backend(Arc::new(MockBackend::new())).await
    }

    /// Harness with a caller-supplied backend (e.g. one scripted to fail).
    pub async fn with_backend(backend: Arc<dyn GenerationBackend>) -> Self {
        Self::build(test_config(), backend, true).await
    }

    /// Harness whose queue worker is not running; jobs stay pending until
    /// the test drives the queue itself.
    pub async fn without_worker() -> Self {
        Self::build(test_config(), Arc::new(MockBackend::new()), false).await
    }

    pub async fn with_config(config: Config) -> Self {
        Self::build(config, Arc::new(MockBackend::new()), true).await
    }

    pub async fn with_config_and_backend(
        config: Config,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self::build(config, backend, true).await
    }

    async fn build(config: Config, backend: Arc<dyn GenerationBackend>, run_worker: bool) -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let db_path = dir.path().join("reelgen-test.db");
        let db = init_pool(&db_path.to_string_lossy()).expect("failed to create pool");
        let store = ObjectStore::open(dir.path(), "bucket", "http://localhost/media")
            .expect("failed to open store");

        let queue = QueueManager::new(
            db.clone(),
            store,
            backend,
            config.queue.clone(),
            &config.webhooks,
        );

        let cancel = CancellationToken::new();
        if run_worker {
            tokio::spawn(queue.clone().run(cancel.child_token()));
        }

        Self {
            queue,
            db,
            config: Arc::new(config),
            cancel,
            _dir: dir,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::serve(Self::new().await).await
    }

    /// Server variant with custom config, optionally without the queue
    /// worker so rows stay where the test puts them.
    pub async fn with_server_parts(config: Config, run_worker: bool) -> (Self, SocketAddr) {
        let harness = Self::build(config, Arc::new(MockBackend::new()), run_worker).await;
        Self::serve(harness).await
    }

    async fn serve(harness: Self) -> (Self, SocketAddr) {
        let ctx = AppContext {
            queue: harness.queue.clone(),
            config: harness.config.clone(),
        };
        let app = create_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Get a database connection from the pool.
    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get db connection")
    }

    pub fn submit(&self, prompt: &str) -> Job {
        self.queue.submit(&request(prompt)).expect("submit failed")
    }

    /// Poll until the job reaches `expected` or the deadline passes.
    pub async fn wait_for_status(&self, id: JobId, expected: JobStatus, timeout: Duration) -> Job {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self
                .queue
                .get_job(id)
                .expect("get_job failed")
                .expect("job row missing");
            if job.status == expected {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stayed {} while waiting for {} (error: {:?})",
                job.status,
                expected,
                job.error
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
