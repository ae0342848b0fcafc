//! Periodic housekeeping.
//!
//! One timer drives three sweeps: `processing` rows nothing has touched for
//! too long are failed (and their owners notified), frame directories past
//! the retention window are removed, and jobs old enough to prune are
//! counted. Pruning itself stays a manual operation; the count is there so
//! operators can see the backlog.
//!
//! The first pass runs at startup, so rows stranded by a crash recover as
//! soon as the service is back.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::assets::AssetManager;
use crate::config::MaintenanceConfig;
use crate::webhook::{WebhookNotifier, WebhookPayload};
use reelgen_core::{best_effort, AssetKind, JobId, Result};
use reelgen_db::{get_conn, queries, DbPool};

/// Outcome of one maintenance pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Stuck `processing` rows flipped to failed.
    pub stuck_reset: usize,
    /// Jobs whose leftover frame files were removed.
    pub frames_swept: usize,
    /// Jobs old enough to prune. Reported, not deleted.
    pub prunable_jobs: u64,
}

impl MaintenanceReport {
    pub fn is_quiet(&self) -> bool {
        self.stuck_reset == 0 && self.frames_swept == 0 && self.prunable_jobs == 0
    }
}

pub struct MaintenanceTask {
    db: DbPool,
    assets: Arc<AssetManager>,
    notifier: Arc<WebhookNotifier>,
    config: MaintenanceConfig,
}

impl MaintenanceTask {
    pub fn new(
        db: DbPool,
        assets: Arc<AssetManager>,
        notifier: Arc<WebhookNotifier>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            db,
            assets,
            notifier,
            config,
        }
    }

    /// Run every sweep once. A sweep that errors is logged and skipped;
    /// the remaining sweeps still run.
    pub async fn run_once(&self) -> MaintenanceReport {
        let stuck_reset =
            best_effort("stuck job sweep", self.sweep_stuck_jobs().await).unwrap_or(0);
        let frames_swept =
            best_effort("stale frame sweep", self.sweep_stale_frames().await).unwrap_or(0);
        let prunable_jobs = best_effort("prune count", self.count_prunable()).unwrap_or(0);
        MaintenanceReport {
            stuck_reset,
            frames_swept,
            prunable_jobs,
        }
    }

    /// Fail `processing` rows whose last update is older than the stuck
    /// threshold. These are jobs whose worker died without reaching a
    /// terminal state, typically across a process crash.
    async fn sweep_stuck_jobs(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::minutes(self.config.stuck_after_mins as i64);
        let message = format!(
            "Timeout: no progress for over {} minutes",
            self.config.stuck_after_mins
        );

        let reset = {
            let conn = get_conn(&self.db)?;
            queries::jobs::reset_stuck_jobs(&conn, &cutoff.to_rfc3339(), &message)?
        };

        for &id in &reset {
            tracing::warn!(job_id = %id, "Stuck job reset to failed");
            let looked_up = get_conn(&self.db).and_then(|conn| queries::jobs::get_job(&conn, id));
            if let Some(Some(job)) = best_effort("stuck job lookup", looked_up) {
                let payload = WebhookPayload::failed(job.id, job.user_id, &message);
                self.notifier.send(job.webhook_url.as_deref(), &payload).await;
            }
            best_effort(
                "stuck job cleanup",
                self.assets.cleanup_job_assets(id, false).await,
            );
        }
        Ok(reset.len())
    }

    /// Remove frame directories whose job is terminal and past the retention
    /// window, or whose job row no longer exists. Frames of live jobs are
    /// never touched, and published video output is always kept.
    async fn sweep_stale_frames(&self) -> Result<usize> {
        let keys = self.assets.store().list(AssetKind::Frame.category()).await?;
        let mut job_dirs = BTreeSet::new();
        for key in &keys {
            if let Some(segment) = key.split('/').nth(1) {
                if let Ok(uuid) = Uuid::parse_str(segment) {
                    job_dirs.insert(JobId::from(uuid));
                }
            }
        }
        if job_dirs.is_empty() {
            return Ok(0);
        }

        let cutoff = Utc::now() - ChronoDuration::hours(self.config.frame_retention_hours as i64);
        let mut swept = 0;
        for id in job_dirs {
            let job = {
                let conn = get_conn(&self.db)?;
                queries::jobs::get_job(&conn, id)?
            };
            let expired = match &job {
                None => true,
                Some(job) => job.status.is_terminal() && updated_before(&job.updated_at, cutoff),
            };
            if !expired {
                continue;
            }

            let removed = best_effort(
                "stale frame sweep",
                self.assets.cleanup_job_assets(id, true).await,
            )
            .unwrap_or(0);
            tracing::debug!(job_id = %id, files = removed, "Swept leftover frames");
            swept += 1;
        }
        Ok(swept)
    }

    fn count_prunable(&self) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.prune_after_days as i64);
        let conn = get_conn(&self.db)?;
        queries::jobs::count_jobs_older_than(&conn, &cutoff.to_rfc3339())
    }

    /// Sweep on a fixed interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval_secs,
            "Maintenance loop started"
        );
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.run_once().await;
            if report.is_quiet() {
                tracing::debug!("Maintenance pass found nothing to do");
            } else {
                tracing::info!(
                    stuck_reset = report.stuck_reset,
                    frames_swept = report.frames_swept,
                    prunable = report.prunable_jobs,
                    "Maintenance pass finished"
                );
            }
        }
        tracing::info!("Maintenance loop stopped");
    }
}

fn updated_before(timestamp: &str, cutoff: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(t) => t.with_timezone(&Utc) < cutoff,
        // unparseable rows are left alone
        Err(_) => false,
    }
}
