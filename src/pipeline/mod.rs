//! The generation pipeline.
//!
//! One job flows through fixed checkpoints: synthesize frames, optionally
//! enhance them, assemble the video, publish the assets. Stages do not retry
//! internally; the first error propagates out and the queue's retry policy
//! decides what happens next.

use std::sync::Arc;

use crate::assets::AssetManager;
use crate::backend::GenerationBackend;
use crate::progress::ProgressTracker;
use reelgen_core::{JobId, JobOutput, Result, UserId, VideoSettings};
use reelgen_db::models::Job;

/// Immutable job facts threaded through processing.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: JobId,
    pub user_id: UserId,
    pub prompt: String,
    pub settings: VideoSettings,
    pub webhook_url: Option<String>,
}

impl JobContext {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id,
            user_id: job.user_id,
            prompt: job.prompt.clone(),
            settings: job.settings(),
            webhook_url: job.webhook_url.clone(),
        }
    }
}

/// Runs one job end to end.
pub struct JobProcessor {
    backend: Arc<dyn GenerationBackend>,
    assets: Arc<AssetManager>,
    progress: Arc<ProgressTracker>,
}

impl JobProcessor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        assets: Arc<AssetManager>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            backend,
            assets,
            progress,
        }
    }

    /// Execute the stage sequence for one claimed job.
    pub async fn process(&self, ctx: &JobContext) -> Result<JobOutput> {
        self.progress.update(ctx, 0.0, "synthesizing frames").await;
        let frames = self
            .backend
            .synthesize_frames(&ctx.prompt, &ctx.settings)
            .await?;
        self.assets.save_frames(ctx.id, &frames).await?;

        let frames = if ctx.settings.enhance_frames {
            self.progress.update(ctx, 40.0, "enhancing frames").await;
            self.backend.enhance_frames(frames).await?
        } else {
            frames
        };

        self.progress.update(ctx, 70.0, "assembling video").await;
        let encoded = self.backend.assemble_video(frames, &ctx.settings).await?;

        self.progress.update(ctx, 90.0, "uploading assets").await;
        let output = self.assets.save_video_assets(ctx.id, &encoded).await?;

        self.progress.update(ctx, 100.0, "completed").await;
        Ok(output)
    }
}
