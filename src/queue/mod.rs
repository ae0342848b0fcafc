//! Job queue orchestration.
//!
//! Submission writes a `pending` row; a single worker loop claims rows FIFO
//! whenever capacity allows and spawns one task per job. The loop wakes on
//! submission rather than waiting for the next poll tick, with the tick as a
//! safety net for rows created out of band. Each job task owns its full
//! lifecycle: the retry loop, the wall-clock watchdog, terminal persistence
//! and asset cleanup.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::assets::AssetManager;
use crate::backend::GenerationBackend;
use crate::config::{QueueConfig, WebhookConfig};
use crate::pipeline::{JobContext, JobProcessor};
use crate::progress::ProgressTracker;
use crate::recovery::{FailureHandler, RetryPolicy};
use crate::storage::ObjectStore;
use crate::webhook::{WebhookNotifier, WebhookPayload};
use reelgen_core::{
    best_effort, Error, JobId, JobOutput, JobStats, JobStatus, Result, SubmitRequest,
};
use reelgen_db::models::{Job, NewJob};
use reelgen_db::{get_conn, queries, DbPool};

mod registry;

pub use registry::ActiveJobs;

const MAX_PROMPT_CHARS: usize = 2000;

/// Check a submission against the accepted parameter ranges.
pub fn validate_submission(req: &SubmitRequest) -> Result<()> {
    let prompt = req.prompt.trim();
    if prompt.is_empty() {
        return Err(Error::validation("prompt cannot be empty"));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(Error::validation(format!(
            "prompt exceeds {MAX_PROMPT_CHARS} characters"
        )));
    }

    let s = &req.settings;
    if !(1..=60).contains(&s.duration) {
        return Err(Error::validation("duration must be between 1 and 60 seconds"));
    }
    if !(1..=60).contains(&s.fps) {
        return Err(Error::validation("fps must be between 1 and 60"));
    }
    for dim in [s.width(), s.height()] {
        if !(64..=2048).contains(&dim) {
            return Err(Error::validation(
                "resolution dimensions must be between 64 and 2048 pixels",
            ));
        }
    }
    Ok(())
}

pub struct QueueManager {
    db: DbPool,
    config: QueueConfig,
    registry: Arc<ActiveJobs>,
    processor: Arc<JobProcessor>,
    recovery: Arc<FailureHandler>,
    progress: Arc<ProgressTracker>,
    notifier: Arc<WebhookNotifier>,
    assets: Arc<AssetManager>,
    drain_signal: Notify,
}

impl QueueManager {
    /// Wire up the queue and everything a job task needs.
    pub fn new(
        db: DbPool,
        store: ObjectStore,
        backend: Arc<dyn GenerationBackend>,
        config: QueueConfig,
        webhook_config: &WebhookConfig,
    ) -> Arc<Self> {
        let notifier = Arc::new(WebhookNotifier::new(webhook_config));
        let registry = Arc::new(ActiveJobs::new());
        let assets = Arc::new(AssetManager::new(db.clone(), store));
        let progress = Arc::new(ProgressTracker::new(db.clone(), notifier.clone()));
        let processor = Arc::new(JobProcessor::new(backend, assets.clone(), progress.clone()));
        let recovery = Arc::new(FailureHandler::new(
            db.clone(),
            registry.clone(),
            notifier.clone(),
            RetryPolicy::from_config(&config),
        ));

        Arc::new(Self {
            db,
            config,
            registry,
            processor,
            recovery,
            progress,
            notifier,
            assets,
            drain_signal: Notify::new(),
        })
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub fn assets(&self) -> &Arc<AssetManager> {
        &self.assets
    }

    pub fn notifier(&self) -> &Arc<WebhookNotifier> {
        &self.notifier
    }

    /// Jobs currently being processed.
    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    /// Wake the worker loop.
    pub fn poke(&self) {
        self.drain_signal.notify_one();
    }

    /// Validate, charge quota and enqueue a new job.
    pub fn submit(&self, req: &SubmitRequest) -> Result<Job> {
        validate_submission(req)?;

        let limit = self.config.monthly_limit(req.tier);
        let month = queries::usage::current_month();
        let conn = get_conn(&self.db)?;
        queries::usage::ensure_usage(&conn, req.user_id, &month, req.tier)?;
        if !queries::usage::try_increment_usage(&conn, req.user_id, &month, limit)? {
            return Err(Error::QuotaExceeded { limit });
        }

        let job = queries::jobs::create_job(
            &conn,
            &NewJob {
                user_id: req.user_id,
                prompt: req.prompt.trim(),
                settings: &req.settings,
                webhook_url: req.webhook_url.as_deref(),
            },
        )?;
        drop(conn);

        tracing::info!(
            job_id = %job.id,
            user_id = %job.user_id,
            duration = req.settings.duration,
            "Job submitted"
        );
        self.poke();
        Ok(job)
    }

    /// Cancel a job that has not started. No webhook is sent; the caller
    /// asked for the cancellation and nothing has been announced yet.
    pub fn cancel(&self, id: JobId) -> Result<bool> {
        let conn = get_conn(&self.db)?;
        let cancelled = queries::jobs::cancel_pending(&conn, id, "Cancelled by user")?;
        if cancelled {
            tracing::info!(job_id = %id, "Pending job cancelled");
        }
        Ok(cancelled)
    }

    /// Requeue a failed job from scratch. The original submission already
    /// paid the quota slot, so restarting is free.
    pub fn restart(&self, id: JobId) -> Result<bool> {
        let conn = get_conn(&self.db)?;
        let restarted = queries::jobs::restart_failed(&conn, id)?;
        drop(conn);
        if restarted {
            tracing::info!(job_id = %id, "Failed job requeued");
            self.poke();
        }
        Ok(restarted)
    }

    pub fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let conn = get_conn(&self.db)?;
        queries::jobs::get_job(&conn, id)
    }

    pub fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<Job>> {
        let conn = get_conn(&self.db)?;
        queries::jobs::list_jobs(&conn, status, limit)
    }

    pub fn stats(&self) -> Result<JobStats> {
        let conn = get_conn(&self.db)?;
        queries::jobs::counts_by_status(&conn)
    }

    /// Worker loop. Runs until the token is cancelled; in-flight job tasks
    /// are left to finish on their own.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            max_concurrent = self.config.max_concurrent_jobs,
            "Queue worker started"
        );
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.drain_signal.notified() => {}
                _ = poll.tick() => {}
            }
            self.drain().await;
        }
        tracing::info!("Queue worker stopped");
    }

    /// Claim pending jobs until capacity or the backlog runs out.
    async fn drain(self: &Arc<Self>) {
        while self.registry.active_count() < self.config.max_concurrent_jobs {
            let claimed =
                get_conn(&self.db).and_then(|conn| queries::jobs::claim_next_pending(&conn));
            let job = match claimed {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Claim query failed");
                    break;
                }
            };

            self.registry.insert(job.id);
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.run_job(job).await;
            });
        }
    }

    /// Drive one claimed job to a terminal state.
    async fn run_job(&self, job: Job) {
        let ctx = JobContext::from_job(&job);
        tracing::info!(job_id = %ctx.id, "Processing job");

        let outcome = tokio::time::timeout(
            self.config.job_timeout(),
            self.attempt_until_terminal(&ctx),
        )
        .await;

        match outcome {
            Ok(Ok(output)) => self.finish_success(&ctx, &output).await,
            Ok(Err(_)) => {
                // recovery already persisted the failure and notified
                best_effort(
                    "failed job cleanup",
                    self.assets.cleanup_job_assets(ctx.id, false).await,
                );
            }
            Err(_) => self.finish_timeout(&ctx).await,
        }

        self.progress.release(ctx.id);
        self.registry.release(ctx.id);
        // a slot opened up
        self.poke();
    }

    /// Retry loop around the pipeline. Terminal failures bubble out through
    /// the failure handler.
    async fn attempt_until_terminal(&self, ctx: &JobContext) -> Result<JobOutput> {
        loop {
            match self.processor.process(ctx).await {
                Ok(output) => return Ok(output),
                Err(error) => {
                    let plan = self.recovery.handle(ctx, error).await?;
                    tokio::time::sleep(plan.delay).await;
                }
            }
        }
    }

    async fn finish_success(&self, ctx: &JobContext, output: &JobOutput) {
        let completed = get_conn(&self.db).and_then(|conn| {
            queries::jobs::complete_job(&conn, ctx.id, &output.video_url, &output.thumbnail_url)
        });
        if best_effort("completion persist", completed).unwrap_or(false) {
            tracing::info!(job_id = %ctx.id, video_url = %output.video_url, "Job completed");
        } else {
            tracing::warn!(job_id = %ctx.id, "Job finished but its row was no longer processing");
        }
        best_effort(
            "frame cleanup",
            self.assets.cleanup_job_assets(ctx.id, true).await,
        );
    }

    async fn finish_timeout(&self, ctx: &JobContext) {
        let message = Error::timeout(format!(
            "job exceeded the {}s wall-clock limit",
            self.config.job_timeout_secs
        ))
        .to_string();

        let failed =
            get_conn(&self.db).and_then(|conn| queries::jobs::fail_job(&conn, ctx.id, &message));
        // only the writer that actually flipped the row announces the failure
        if best_effort("timeout persist", failed).unwrap_or(false) {
            tracing::error!(job_id = %ctx.id, "Job timed out");
            let payload = WebhookPayload::failed(ctx.id, ctx.user_id, &message);
            self.notifier.send(ctx.webhook_url.as_deref(), &payload).await;
        }
        best_effort(
            "timed out job cleanup",
            self.assets.cleanup_job_assets(ctx.id, false).await,
        );
    }
}
