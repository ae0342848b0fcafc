//! Monthly quota accounting.
//!
//! The quota check is a single compare-and-swap UPDATE so two submissions
//! racing on the last slot cannot both get in.

use chrono::Utc;
use rusqlite::Connection;
use reelgen_core::{Error, Result, Tier, UserId};

use crate::models::MonthlyUsage;

const COLS: &str = "user_id, month, video_count, tier, updated_at";

/// Current accounting period, e.g. `2026-08`.
pub fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// Fetch a user's usage row for a month, if one exists.
pub fn get_usage(conn: &Connection, user_id: UserId, month: &str) -> Result<Option<MonthlyUsage>> {
    let q = format!("SELECT {COLS} FROM monthly_usage WHERE user_id = ?1 AND month = ?2");
    let result = conn.query_row(
        &q,
        rusqlite::params![user_id.to_string(), month],
        MonthlyUsage::from_row,
    );
    match result {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Make sure a usage row exists for this user and month, refreshing the
/// recorded tier. The count is never reset here.
pub fn ensure_usage(conn: &Connection, user_id: UserId, month: &str, tier: Tier) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO monthly_usage (user_id, month, video_count, tier, updated_at)
         VALUES (?1, ?2, 0, ?3, ?4)
         ON CONFLICT(user_id, month)
         DO UPDATE SET tier = excluded.tier, updated_at = excluded.updated_at",
        rusqlite::params![user_id.to_string(), month, tier.as_str(), now],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Claim one quota slot. Returns false when the user is already at `limit`;
/// the count is only bumped when the guard passes.
pub fn try_increment_usage(
    conn: &Connection,
    user_id: UserId,
    month: &str,
    limit: u32,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE monthly_usage SET video_count = video_count + 1, updated_at = ?1
             WHERE user_id = ?2 AND month = ?3 AND video_count < ?4",
            rusqlite::params![now, user_id.to_string(), month, limit],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}
