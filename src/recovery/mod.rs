//! Failure handling and retry policy.
//!
//! Classifies a failed attempt as either worth another try or terminal.
//! Terminal failures are persisted through the conditional `fail_job`
//! update; the failure webhook is only sent when that update actually
//! transitioned the row, which keeps the notification exactly-once even
//! when the watchdog and the worker race to fail the same job.

use std::sync::Arc;
use std::time::Duration;

use crate::config::QueueConfig;
use crate::pipeline::JobContext;
use crate::queue::ActiveJobs;
use crate::webhook::{WebhookNotifier, WebhookPayload};
use reelgen_core::{best_effort, Error, Result};
use reelgen_db::{get_conn, queries, DbPool};

/// Retry budget for one job run.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        }
    }
}

/// Decision to run the job again.
#[derive(Debug, Clone, Copy)]
pub struct RetryPlan {
    /// Which retry this is (1-based).
    pub attempt: u32,
    /// Pause before the attempt starts.
    pub delay: Duration,
}

pub struct FailureHandler {
    db: DbPool,
    registry: Arc<ActiveJobs>,
    notifier: Arc<WebhookNotifier>,
    policy: RetryPolicy,
}

impl FailureHandler {
    pub fn new(
        db: DbPool,
        registry: Arc<ActiveJobs>,
        notifier: Arc<WebhookNotifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            registry,
            notifier,
            policy,
        }
    }

    /// Handle one failed attempt.
    ///
    /// Returns a [`RetryPlan`] when the error is transient and budget
    /// remains; otherwise marks the job failed and returns the error.
    pub async fn handle(&self, ctx: &JobContext, error: Error) -> Result<RetryPlan> {
        let used = self.registry.retry_count(ctx.id);
        if error.is_retryable() && used < self.policy.max_retries {
            let attempt = self.registry.bump_retry(ctx.id);
            tracing::warn!(
                job_id = %ctx.id,
                attempt,
                max_retries = self.policy.max_retries,
                error = %error,
                "Attempt failed, retrying"
            );
            return Ok(RetryPlan {
                attempt,
                delay: self.policy.delay,
            });
        }

        tracing::error!(
            job_id = %ctx.id,
            retries_used = used,
            retryable = error.is_retryable(),
            error = %error,
            "Job failed terminally"
        );

        let failed = get_conn(&self.db)
            .and_then(|conn| queries::jobs::fail_job(&conn, ctx.id, &error.to_string()));
        if best_effort("failure persist", failed).unwrap_or(false) {
            let payload = WebhookPayload::failed(ctx.id, ctx.user_id, &error.to_string());
            self.notifier.send(ctx.webhook_url.as_deref(), &payload).await;
        }

        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;
    use reelgen_core::{JobStatus, UserId, VideoSettings};
    use reelgen_db::models::NewJob;
    use reelgen_db::init_memory_pool;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct RecoveryHarness {
        handler: FailureHandler,
        registry: Arc<ActiveJobs>,
        pool: DbPool,
    }

    fn harness(max_retries: u32) -> RecoveryHarness {
        let pool = init_memory_pool().unwrap();
        let registry = Arc::new(ActiveJobs::new());
        let notifier = Arc::new(WebhookNotifier::new(&WebhookConfig::default()));
        let handler = FailureHandler::new(
            pool.clone(),
            registry.clone(),
            notifier,
            RetryPolicy {
                max_retries,
                delay: Duration::from_millis(1),
            },
        );
        RecoveryHarness {
            handler,
            registry,
            pool,
        }
    }

    fn claimed_ctx(pool: &DbPool, webhook_url: Option<String>) -> JobContext {
        let settings = VideoSettings {
            duration: 1,
            resolution: [64, 64],
            fps: 2,
            style: None,
            enhance_frames: true,
        };
        let conn = pool.get().unwrap();
        queries::jobs::create_job(
            &conn,
            &NewJob {
                user_id: UserId::new(),
                prompt: "recovery test",
                settings: &settings,
                webhook_url: webhook_url.as_deref(),
            },
        )
        .unwrap();
        let job = queries::jobs::claim_next_pending(&conn).unwrap().unwrap();
        JobContext::from_job(&job)
    }

    #[tokio::test]
    async fn transient_errors_earn_retries_until_budget_runs_out() {
        let h = harness(2);
        let ctx = claimed_ctx(&h.pool, None);
        h.registry.insert(ctx.id);

        let plan = h
            .handler
            .handle(&ctx, Error::timeout("synth hung"))
            .await
            .unwrap();
        assert_eq!(plan.attempt, 1);

        let plan = h
            .handler
            .handle(&ctx, Error::system("connection reset"))
            .await
            .unwrap();
        assert_eq!(plan.attempt, 2);

        // budget exhausted: same class of error is now terminal
        let err = h
            .handler
            .handle(&ctx, Error::timeout("synth hung again"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let conn = h.pool.get().unwrap();
        let job = queries::jobs::get_job(&conn, ctx.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Timeout: synth hung again"));
    }

    #[tokio::test]
    async fn validation_errors_fail_without_retrying() {
        let h = harness(3);
        let ctx = claimed_ctx(&h.pool, None);
        h.registry.insert(ctx.id);

        let err = h
            .handler
            .handle(&ctx, Error::validation("prompt rejected"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(h.registry.retry_count(ctx.id), 0);

        let conn = h.pool.get().unwrap();
        let job = queries::jobs::get_job(&conn, ctx.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn terminal_failure_notifies_webhook_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"event": "job.failed"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(0);
        let ctx = claimed_ctx(&h.pool, Some(server.uri()));
        h.registry.insert(ctx.id);

        h.handler
            .handle(&ctx, Error::model("bad model output"))
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn already_failed_rows_do_not_renotify() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness(0);
        let ctx = claimed_ctx(&h.pool, Some(server.uri()));
        h.registry.insert(ctx.id);

        // someone else (the watchdog) already failed the row
        {
            let conn = h.pool.get().unwrap();
            queries::jobs::fail_job(&conn, ctx.id, "Timeout: exceeded limit").unwrap();
        }

        h.handler
            .handle(&ctx, Error::model("late failure"))
            .await
            .unwrap_err();

        // original error text wins
        let conn = h.pool.get().unwrap();
        let job = queries::jobs::get_job(&conn, ctx.id).unwrap().unwrap();
        assert_eq!(job.error.as_deref(), Some("Timeout: exceeded limit"));
    }
}
