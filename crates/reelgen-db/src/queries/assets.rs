//! Asset bookkeeping queries.
//!
//! Asset rows are an index over object storage, not the source of truth;
//! callers tolerate missing rows and reconcile against the store listing.

use chrono::Utc;
use rusqlite::Connection;
use reelgen_core::{AssetId, AssetKind, Error, JobId, Result};

use crate::models::Asset;

const COLS: &str = "id, job_id, kind, url, seq, created_at";

/// Record one stored object for a job.
pub fn record_asset(
    conn: &Connection,
    job_id: JobId,
    kind: AssetKind,
    url: &str,
    seq: Option<u32>,
) -> Result<Asset> {
    let id = AssetId::new();
    let now = Utc::now().to_rfc3339();
    let q = format!(
        "INSERT INTO assets (id, job_id, kind, url, seq, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         RETURNING {COLS}"
    );
    conn.query_row(
        &q,
        rusqlite::params![
            id.to_string(),
            job_id.to_string(),
            kind.as_str(),
            url,
            seq,
            now
        ],
        Asset::from_row,
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// List a job's assets ordered by sequence, optionally filtered by kind.
pub fn list_job_assets(
    conn: &Connection,
    job_id: JobId,
    kind: Option<AssetKind>,
) -> Result<Vec<Asset>> {
    let rows = match kind {
        Some(k) => {
            let q = format!(
                "SELECT {COLS} FROM assets WHERE job_id = ?1 AND kind = ?2
                 ORDER BY seq ASC, created_at ASC"
            );
            let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![job_id.to_string(), k.as_str()],
                    Asset::from_row,
                )
                .map_err(|e| Error::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>();
            rows.map_err(|e| Error::database(e.to_string()))?
        }
        None => {
            let q = format!(
                "SELECT {COLS} FROM assets WHERE job_id = ?1
                 ORDER BY seq ASC, created_at ASC"
            );
            let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
            let rows = stmt
                .query_map([job_id.to_string()], Asset::from_row)
                .map_err(|e| Error::database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>();
            rows.map_err(|e| Error::database(e.to_string()))?
        }
    };
    Ok(rows)
}

/// Delete a job's asset rows, optionally restricted to one kind.
/// Returns the number of rows removed.
pub fn delete_job_assets(
    conn: &Connection,
    job_id: JobId,
    kind: Option<AssetKind>,
) -> Result<u64> {
    let n = match kind {
        Some(k) => conn
            .execute(
                "DELETE FROM assets WHERE job_id = ?1 AND kind = ?2",
                rusqlite::params![job_id.to_string(), k.as_str()],
            )
            .map_err(|e| Error::database(e.to_string()))?,
        None => conn
            .execute(
                "DELETE FROM assets WHERE job_id = ?1",
                [job_id.to_string()],
            )
            .map_err(|e| Error::database(e.to_string()))?,
    };
    Ok(n as u64)
}
