//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use reelgen_core::{Error, Result};

/// V1: initial schema -- jobs, assets, and monthly usage counters.
const V1_INITIAL: &str = r#"
-- Generation jobs
CREATE TABLE jobs (
    id             TEXT PRIMARY KEY,
    user_id        TEXT NOT NULL,
    prompt         TEXT NOT NULL,
    duration_secs  INTEGER NOT NULL,
    width          INTEGER NOT NULL,
    height         INTEGER NOT NULL,
    fps            INTEGER NOT NULL,
    style          TEXT,
    enhance_frames INTEGER NOT NULL DEFAULT 1,
    status         TEXT NOT NULL DEFAULT 'pending',
    progress       REAL NOT NULL DEFAULT 0,
    stage          TEXT,
    error          TEXT,
    output_url     TEXT,
    thumbnail_url  TEXT,
    webhook_url    TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    completed_at   TEXT
);

-- The claim query scans (status, created_at); the stuck-job sweep scans
-- (status, updated_at).
CREATE INDEX idx_jobs_status_created ON jobs(status, created_at);
CREATE INDEX idx_jobs_status_updated ON jobs(status, updated_at);
CREATE INDEX idx_jobs_user ON jobs(user_id);

-- Stored artifacts: frames are transient intermediates, video/thumbnail
-- are the durable output.
CREATE TABLE assets (
    id         TEXT PRIMARY KEY,
    job_id     TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    kind       TEXT NOT NULL,
    url        TEXT NOT NULL,
    seq        INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_assets_job_kind ON assets(job_id, kind);

-- Per-user monthly submission counters
CREATE TABLE monthly_usage (
    user_id     TEXT NOT NULL,
    month       TEXT NOT NULL,
    video_count INTEGER NOT NULL DEFAULT 0,
    tier        TEXT NOT NULL DEFAULT 'free',
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (user_id, month)
);
"#;

/// All migrations in order. Append new entries; never edit applied ones.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Apply any migrations that have not yet run against this connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit()
            .map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        // second call is a no-op
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn all_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();

        for table in ["jobs", "assets", "monthly_usage", "schema_migrations"] {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(n, 1, "missing table {table}");
        }
    }

    #[test]
    fn asset_rows_cascade_with_job() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO jobs (id, user_id, prompt, duration_secs, width, height, fps,
                               created_at, updated_at)
             VALUES ('j1', 'u1', 'p', 5, 640, 360, 12, '2026-01-01T00:00:00+00:00',
                     '2026-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO assets (id, job_id, kind, url, created_at)
             VALUES ('a1', 'j1', 'frame', 'u', '2026-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM jobs WHERE id='j1'", []).unwrap();
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }
}
