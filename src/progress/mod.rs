//! Progress tracking with write coalescing.
//!
//! Checkpoints arrive from the pipeline at whatever rate the backend works;
//! each persisted checkpoint costs a database write and possibly a webhook.
//! The tracker suppresses sub-1% noise, lets significant or boundary updates
//! through immediately, and coalesces the rest into one deferred write per
//! debounce window. Flushes persist through a status-guarded UPDATE, so a
//! flush that lands after the job reached a terminal state writes nothing
//! and emits nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::pipeline::JobContext;
use crate::webhook::{WebhookNotifier, WebhookPayload};
use reelgen_core::{best_effort, JobId};
use reelgen_db::{get_conn, queries, DbPool};

/// Deferred-write window for non-significant updates.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Delta below which an update is noise (unless it hits a boundary).
const MIN_DELTA: f64 = 1.0;

/// Delta at which an update always writes through immediately.
const SIGNIFICANT_DELTA: f64 = 10.0;

#[derive(Debug, Clone)]
struct PendingUpdate {
    progress: f64,
    stage: String,
}

struct ProgressEntry {
    last_reported: f64,
    last_write: Option<Instant>,
    pending: Option<PendingUpdate>,
    flush_scheduled: bool,
    started: Instant,
}

impl ProgressEntry {
    fn new() -> Self {
        Self {
            last_reported: 0.0,
            last_write: None,
            pending: None,
            flush_scheduled: false,
            started: Instant::now(),
        }
    }
}

/// What to do with one reported update.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Gate {
    /// Below the noise floor; drop it.
    Suppress,
    /// Write and notify now.
    Immediate,
    /// Coalesce; flush after the remaining window.
    Debounce(Duration),
}

/// Pure gating decision. `prev` is the last written progress (`None` before
/// the first write), `since_write` the time since that write.
fn decide(
    prev: Option<f64>,
    since_write: Option<Duration>,
    progress: f64,
    window: Duration,
) -> Gate {
    let boundary = progress <= 0.0 || progress >= 100.0;

    let Some(last) = prev else {
        return Gate::Immediate;
    };
    let delta = (progress - last).abs();
    if delta < MIN_DELTA && !boundary {
        return Gate::Suppress;
    }
    let Some(elapsed) = since_write else {
        return Gate::Immediate;
    };
    if boundary || delta >= SIGNIFICANT_DELTA || elapsed >= window {
        Gate::Immediate
    } else {
        Gate::Debounce(window - elapsed)
    }
}

/// Time left for a job, extrapolated from progress so far. Zero until any
/// progress exists.
pub fn estimate_remaining(progress: f64, started: Instant) -> Duration {
    if progress <= 0.0 {
        return Duration::ZERO;
    }
    let elapsed = started.elapsed().as_secs_f64();
    let total = elapsed / (progress.min(100.0) / 100.0);
    Duration::from_secs_f64((total - elapsed).max(0.0))
}

/// Per-job progress state shared by the pipeline and the API layer.
pub struct ProgressTracker {
    db: DbPool,
    notifier: Arc<WebhookNotifier>,
    entries: DashMap<JobId, ProgressEntry>,
    window: Duration,
}

impl ProgressTracker {
    pub fn new(db: DbPool, notifier: Arc<WebhookNotifier>) -> Self {
        Self::with_window(db, notifier, DEBOUNCE_WINDOW)
    }

    pub fn with_window(db: DbPool, notifier: Arc<WebhookNotifier>, window: Duration) -> Self {
        Self {
            db,
            notifier,
            entries: DashMap::new(),
            window,
        }
    }

    /// Report a progress checkpoint for an active job.
    pub async fn update(self: &Arc<Self>, ctx: &JobContext, progress: f64, stage: &str) {
        let progress = progress.clamp(0.0, 100.0);
        let now = Instant::now();

        // Decide under the entry lock, act after releasing it.
        let (gate, schedule_flush) = {
            let mut entry = self.entries.entry(ctx.id).or_insert_with(ProgressEntry::new);
            let prev = entry.last_write.map(|_| entry.last_reported);
            let since = entry.last_write.map(|at| now.duration_since(at));
            let gate = decide(prev, since, progress, self.window);

            let mut schedule = false;
            match gate {
                Gate::Immediate => {
                    entry.last_reported = progress;
                    entry.last_write = Some(now);
                    entry.pending = None;
                }
                Gate::Debounce(_) => {
                    entry.pending = Some(PendingUpdate {
                        progress,
                        stage: stage.to_string(),
                    });
                    if !entry.flush_scheduled {
                        entry.flush_scheduled = true;
                        schedule = true;
                    }
                }
                Gate::Suppress => {}
            }
            (gate, schedule)
        };

        match gate {
            Gate::Immediate => self.persist_and_notify(ctx, progress, stage).await,
            Gate::Debounce(remaining) if schedule_flush => {
                let tracker = Arc::clone(self);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(remaining).await;
                    tracker.flush_pending(&ctx).await;
                });
            }
            _ => {}
        }
    }

    /// Write out a coalesced update, if one is still waiting.
    async fn flush_pending(&self, ctx: &JobContext) {
        let taken = self.entries.get_mut(&ctx.id).and_then(|mut entry| {
            entry.flush_scheduled = false;
            let pending = entry.pending.take()?;
            entry.last_reported = pending.progress;
            entry.last_write = Some(Instant::now());
            Some(pending)
        });

        if let Some(update) = taken {
            self.persist_and_notify(ctx, update.progress, &update.stage)
                .await;
        }
    }

    async fn persist_and_notify(&self, ctx: &JobContext, progress: f64, stage: &str) {
        let written = get_conn(&self.db)
            .and_then(|conn| queries::jobs::update_progress(&conn, ctx.id, progress, stage));
        // the row guard refused: job already terminal, stay silent
        if !best_effort("progress persist", written).unwrap_or(false) {
            return;
        }

        let eta = self
            .entries
            .get(&ctx.id)
            .map(|entry| estimate_remaining(progress, entry.started));
        tracing::debug!(
            job_id = %ctx.id,
            progress,
            stage,
            eta_secs = eta.map(|d| d.as_secs()),
            "Job progress"
        );

        let payload = if progress <= 0.0 {
            WebhookPayload::started(ctx.id, ctx.user_id)
        } else if progress >= 100.0 {
            WebhookPayload::completed(ctx.id, ctx.user_id)
        } else {
            WebhookPayload::progress(ctx.id, ctx.user_id, progress, stage)
        };
        self.notifier.send(ctx.webhook_url.as_deref(), &payload).await;
    }

    /// Estimated seconds left for an active job, if it has made progress.
    pub fn eta_secs(&self, id: JobId) -> Option<u64> {
        let entry = self.entries.get(&id)?;
        if entry.last_reported <= 0.0 {
            return None;
        }
        Some(estimate_remaining(entry.last_reported, entry.started).as_secs())
    }

    /// Drop tracking state for a finished job. Pending flushes become no-ops.
    pub fn release(&self, id: JobId) {
        self.entries.remove(&id);
    }
}
