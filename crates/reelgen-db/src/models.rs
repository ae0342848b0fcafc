//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`.

use reelgen_core::{AssetId, AssetKind, JobId, JobStatus, Tier, UserId, VideoSettings};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Parse a UUID-based ID from a text column.
pub(crate) fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(T::from(uuid))
}

fn parse_enum<T>(
    row: &rusqlite::Row,
    idx: usize,
    parse: fn(&str) -> Option<T>,
    what: &str,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown {what}: {s}").into(),
        )
    })
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub prompt: String,
    pub duration_secs: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub style: Option<String>,
    pub enhance_frames: bool,
    pub status: JobStatus,
    pub progress: f64,
    pub stage: Option<String>,
    pub error: Option<String>,
    pub output_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub webhook_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl Job {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            user_id: parse_id(row, 1)?,
            prompt: row.get(2)?,
            duration_secs: row.get(3)?,
            width: row.get(4)?,
            height: row.get(5)?,
            fps: row.get(6)?,
            style: row.get(7)?,
            enhance_frames: row.get(8)?,
            status: parse_enum(row, 9, JobStatus::parse, "job status")?,
            progress: row.get(10)?,
            stage: row.get(11)?,
            error: row.get(12)?,
            output_url: row.get(13)?,
            thumbnail_url: row.get(14)?,
            webhook_url: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
            completed_at: row.get(18)?,
        })
    }

    /// Reassemble the settings value the job was submitted with.
    pub fn settings(&self) -> VideoSettings {
        VideoSettings {
            duration: self.duration_secs,
            resolution: [self.width, self.height],
            fps: self.fps,
            style: self.style.clone(),
            enhance_frames: self.enhance_frames,
        }
    }
}

/// Insert payload for a new job row.
#[derive(Debug)]
pub struct NewJob<'a> {
    pub user_id: UserId,
    pub prompt: &'a str,
    pub settings: &'a VideoSettings,
    pub webhook_url: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Asset {
    pub id: AssetId,
    pub job_id: JobId,
    pub kind: AssetKind,
    pub url: String,
    pub seq: Option<u32>,
    pub created_at: String,
}

impl Asset {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            job_id: parse_id(row, 1)?,
            kind: parse_enum(row, 2, AssetKind::parse, "asset kind")?,
            url: row.get(3)?,
            seq: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

// ---------------------------------------------------------------------------
// MonthlyUsage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MonthlyUsage {
    pub user_id: UserId,
    pub month: String,
    pub video_count: u32,
    pub tier: Tier,
    pub updated_at: String,
}

impl MonthlyUsage {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: parse_id(row, 0)?,
            month: row.get(1)?,
            video_count: row.get(2)?,
            tier: parse_enum(row, 3, Tier::parse, "tier")?,
            updated_at: row.get(4)?,
        })
    }
}
