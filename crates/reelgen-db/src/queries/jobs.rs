//! Job lifecycle queries.
//!
//! Every status transition is a conditional UPDATE (`WHERE status = ...`),
//! so concurrent writers (worker task, watchdog, maintenance sweep) race
//! safely: the loser sees an affected-row count of zero instead of
//! clobbering the winner's terminal state.

use chrono::Utc;
use rusqlite::Connection;
use reelgen_core::{Error, JobId, JobStats, JobStatus, Result};

use crate::models::{parse_id, Job, NewJob};

const COLS: &str = "id, user_id, prompt, duration_secs, width, height, fps, style,
    enhance_frames, status, progress, stage, error, output_url, thumbnail_url,
    webhook_url, created_at, updated_at, completed_at";

/// Insert a new `pending` job and return the stored row.
pub fn create_job(conn: &Connection, new: &NewJob) -> Result<Job> {
    let id = JobId::new();
    let now = Utc::now().to_rfc3339();

    let q = format!(
        "INSERT INTO jobs (id, user_id, prompt, duration_secs, width, height, fps,
                           style, enhance_frames, status, webhook_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?11, ?11)
         RETURNING {COLS}"
    );

    conn.query_row(
        &q,
        rusqlite::params![
            id.to_string(),
            new.user_id.to_string(),
            new.prompt,
            new.settings.duration,
            new.settings.width(),
            new.settings.height(),
            new.settings.fps,
            new.settings.style.as_deref(),
            new.settings.enhance_frames,
            new.webhook_url,
            &now,
        ],
        Job::from_row,
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], Job::from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List jobs newest-first, with an optional status filter.
pub fn list_jobs(conn: &Connection, status: Option<JobStatus>, limit: i64) -> Result<Vec<Job>> {
    let rows = match status {
        Some(s) => {
            let q = format!(
                "SELECT {COLS} FROM jobs WHERE status = ?1
                 ORDER BY created_at DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params![s.as_str(), limit], Job::from_row)
                .map_err(|e| Error::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>();
            rows.map_err(|e| Error::database(e.to_string()))?
        }
        None => {
            let q = format!("SELECT {COLS} FROM jobs ORDER BY created_at DESC LIMIT ?1");
            let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
            let rows = stmt
                .query_map([limit], Job::from_row)
                .map_err(|e| Error::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>();
            rows.map_err(|e| Error::database(e.to_string()))?
        }
    };
    Ok(rows)
}

/// Atomically claim the oldest `pending` job, marking it `processing`.
///
/// FIFO by `created_at`; returns `None` when nothing is pending.
pub fn claim_next_pending(conn: &Connection) -> Result<Option<Job>> {
    let now = Utc::now().to_rfc3339();

    // SQLite RETURNING is supported since 3.35.
    let q = format!(
        "UPDATE jobs SET status='processing', updated_at=?1
         WHERE id = (
             SELECT id FROM jobs WHERE status='pending'
             ORDER BY created_at ASC LIMIT 1
         )
         RETURNING {COLS}"
    );

    let result = conn.query_row(&q, [&now], Job::from_row);
    match result {
        Ok(j) => Ok(Some(j)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Persist a progress checkpoint for an active job.
///
/// Guarded by `status='processing'` so a late debounce flush cannot touch a
/// row that has already reached a terminal state.
pub fn update_progress(conn: &Connection, id: JobId, progress: f64, stage: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE jobs SET progress=?1, stage=?2, updated_at=?3
             WHERE id=?4 AND status='processing'",
            rusqlite::params![progress, stage, now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Terminal success: store output URLs, pin progress to 100.
pub fn complete_job(
    conn: &Connection,
    id: JobId,
    output_url: &str,
    thumbnail_url: &str,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE jobs SET status='completed', progress=100.0, error=NULL,
                 output_url=?1, thumbnail_url=?2, completed_at=?3, updated_at=?3
             WHERE id=?4 AND status='processing'",
            rusqlite::params![output_url, thumbnail_url, now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Terminal failure for an active job. Progress is preserved, not zeroed,
/// so observers can see how far the job got.
pub fn fail_job(conn: &Connection, id: JobId, error: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE jobs SET status='failed', error=?1, updated_at=?2
             WHERE id=?3 AND status='processing'",
            rusqlite::params![error, now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Cancel a job that has not started yet. Only `pending` rows transition;
/// anything else leaves the row untouched and returns false.
pub fn cancel_pending(conn: &Connection, id: JobId, message: &str) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE jobs SET status='failed', error=?1, updated_at=?2
             WHERE id=?3 AND status='pending'",
            rusqlite::params![message, now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Put a `failed` job back into the pending pool, clearing every trace of
/// the failed attempt.
pub fn restart_failed(conn: &Connection, id: JobId) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE jobs SET status='pending', progress=0.0, stage=NULL, error=NULL,
                 output_url=NULL, thumbnail_url=NULL, completed_at=NULL, updated_at=?1
             WHERE id=?2 AND status='failed'",
            rusqlite::params![now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Job counts per lifecycle state.
pub fn counts_by_status(conn: &Connection) -> Result<JobStats> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })
        .map_err(|e| Error::database(e.to_string()))?;

    let mut stats = JobStats::default();
    for row in rows {
        let (status, count) = row.map_err(|e| Error::database(e.to_string()))?;
        match JobStatus::parse(&status) {
            Some(JobStatus::Pending) => stats.pending = count,
            Some(JobStatus::Processing) => stats.processing = count,
            Some(JobStatus::Completed) => stats.completed = count,
            Some(JobStatus::Failed) => stats.failed = count,
            None => return Err(Error::database(format!("unknown job status: {status}"))),
        }
    }
    Ok(stats)
}

/// Force-fail every `processing` job not touched since `stale_before`.
///
/// Returns the ids of the jobs that were reset so the caller can clean up
/// their transient assets.
pub fn reset_stuck_jobs(conn: &Connection, stale_before: &str, error: &str) -> Result<Vec<JobId>> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn
        .prepare(
            "UPDATE jobs SET status='failed', error=?1, updated_at=?2
             WHERE status='processing' AND updated_at < ?3
             RETURNING id",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let ids = stmt
        .query_map(rusqlite::params![error, now, stale_before], |row| {
            parse_id::<JobId>(row, 0)
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(ids)
}

/// Count rows older than `created_before` (the prune report; rows are not
/// yet archived or deleted).
pub fn count_jobs_older_than(conn: &Connection, created_before: &str) -> Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE created_at < ?1",
        [created_before],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}
