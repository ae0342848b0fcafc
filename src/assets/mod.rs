//! Asset management for job artifacts.
//!
//! Couples the object store with the asset index in the database. Object
//! writes are authoritative, index rows are best-effort: a failed row insert
//! is logged and skipped, never failing the job.

use bytes::Bytes;

use crate::backend::{EncodedVideo, Frame};
use crate::storage::ObjectStore;
use reelgen_core::{best_effort, AssetKind, JobId, JobOutput, Result};
use reelgen_db::{get_conn, queries, DbPool};

pub struct AssetManager {
    db: DbPool,
    store: ObjectStore,
}

impl AssetManager {
    pub fn new(db: DbPool, store: ObjectStore) -> Self {
        Self { db, store }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Storage directory for one kind of a job's objects. The index rows
    /// store the singular kind name; object keys live under the plural
    /// category prefix.
    fn kind_prefix(job_id: JobId, kind: AssetKind) -> String {
        format!("{}/{job_id}", kind.category())
    }

    fn frame_key(job_id: JobId, index: u32) -> String {
        let prefix = Self::kind_prefix(job_id, AssetKind::Frame);
        format!("{prefix}/frame_{index:05}.png")
    }

    pub fn video_key(job_id: JobId) -> String {
        let prefix = Self::kind_prefix(job_id, AssetKind::Video);
        format!("{prefix}/video.mp4")
    }

    pub fn thumbnail_key(job_id: JobId) -> String {
        let prefix = Self::kind_prefix(job_id, AssetKind::Thumbnail);
        format!("{prefix}/thumbnail.jpg")
    }

    /// Persist intermediate frames for a job. Returns the stored keys.
    pub async fn save_frames(&self, job_id: JobId, frames: &[Frame]) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(frames.len());
        for frame in frames {
            let key = Self::frame_key(job_id, frame.index);
            self.store.upload(&key, frame.data.clone()).await?;
            keys.push(key);
        }

        let conn = get_conn(&self.db)?;
        for (frame, key) in frames.iter().zip(&keys) {
            best_effort(
                "frame asset row insert",
                queries::assets::record_asset(
                    &conn,
                    job_id,
                    AssetKind::Frame,
                    key,
                    Some(frame.index),
                ),
            );
        }

        tracing::debug!(job_id = %job_id, frames = frames.len(), "Stored frame set");
        Ok(keys)
    }

    /// Publish the final video and thumbnail.
    ///
    /// Both objects are written to a staging prefix first and then moved into
    /// place, so a half-written video is never visible under its public key.
    pub async fn save_video_assets(
        &self,
        job_id: JobId,
        encoded: &EncodedVideo,
    ) -> Result<JobOutput> {
        let staging_video = format!("staging/{job_id}/video.mp4");
        let staging_thumb = format!("staging/{job_id}/thumbnail.jpg");
        self.store
            .upload(&staging_video, encoded.video.clone())
            .await?;
        self.store
            .upload(&staging_thumb, encoded.thumbnail.clone())
            .await?;

        let video_key = Self::video_key(job_id);
        let thumb_key = Self::thumbnail_key(job_id);
        self.store.rename(&staging_video, &video_key).await?;
        self.store.rename(&staging_thumb, &thumb_key).await?;

        let conn = get_conn(&self.db)?;
        best_effort(
            "video asset row insert",
            queries::assets::record_asset(&conn, job_id, AssetKind::Video, &video_key, None),
        );
        best_effort(
            "thumbnail asset row insert",
            queries::assets::record_asset(&conn, job_id, AssetKind::Thumbnail, &thumb_key, None),
        );

        Ok(JobOutput {
            video_url: self.store.public_url(&video_key),
            thumbnail_url: self.store.public_url(&thumb_key),
        })
    }

    /// Fetch a job's stored thumbnail bytes.
    pub async fn load_thumbnail(&self, job_id: JobId) -> Result<Bytes> {
        self.store.download(&Self::thumbnail_key(job_id)).await
    }

    /// Remove a job's stored objects and index rows.
    ///
    /// Frames and staging leftovers always go. With `keep_final` the
    /// published video and thumbnail survive; without it the job leaves no
    /// trace in storage. Returns the number of objects removed.
    pub async fn cleanup_job_assets(&self, job_id: JobId, keep_final: bool) -> Result<u64> {
        let mut removed = self
            .store
            .delete_prefix(&Self::kind_prefix(job_id, AssetKind::Frame))
            .await?;
        removed += self
            .store
            .delete_prefix(&format!("staging/{job_id}"))
            .await?;
        if !keep_final {
            removed += self
                .store
                .delete_prefix(&Self::kind_prefix(job_id, AssetKind::Video))
                .await?;
            removed += self
                .store
                .delete_prefix(&Self::kind_prefix(job_id, AssetKind::Thumbnail))
                .await?;
        }

        let conn = get_conn(&self.db)?;
        if keep_final {
            queries::assets::delete_job_assets(&conn, job_id, Some(AssetKind::Frame))?;
        } else {
            queries::assets::delete_job_assets(&conn, job_id, None)?;
        }

        if removed > 0 {
            tracing::debug!(job_id = %job_id, removed, keep_final, "Cleaned up job assets");
        }
        Ok(removed)
    }
}
