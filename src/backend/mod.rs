//! Video generation backends.
//!
//! A [`GenerationBackend`] produces raw frames from a prompt, optionally
//! enhances them, and assembles the final encoded video. The pipeline is
//! backend-agnostic; failures surface as classified errors so the queue can
//! decide what to retry.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{BackendConfig, BackendMode};
use reelgen_core::{Result, VideoSettings};

mod http;
mod mock;

pub use http::HttpBackend;
pub use mock::MockBackend;

/// One rendered frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u32,
    /// Encoded PNG bytes.
    pub data: Bytes,
}

/// Output of the assembly stage.
#[derive(Debug, Clone)]
pub struct EncodedVideo {
    /// MP4 container bytes.
    pub video: Bytes,
    /// JPEG poster image.
    pub thumbnail: Bytes,
}

/// Stage-level interface to a video generation engine.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Render the initial frame sequence for a prompt.
    async fn synthesize_frames(
        &self,
        prompt: &str,
        settings: &VideoSettings,
    ) -> Result<Vec<Frame>>;

    /// Run the enhancement model over already-rendered frames.
    async fn enhance_frames(&self, frames: Vec<Frame>) -> Result<Vec<Frame>>;

    /// Encode frames into the final video plus a poster thumbnail.
    async fn assemble_video(
        &self,
        frames: Vec<Frame>,
        settings: &VideoSettings,
    ) -> Result<EncodedVideo>;
}

/// Build the backend selected by configuration.
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn GenerationBackend>> {
    match config.mode {
        BackendMode::Mock => Ok(Arc::new(MockBackend::with_latency_ms(
            config.mock_latency_ms,
        ))),
        BackendMode::Http => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                reelgen_core::Error::validation("http backend requires a base_url")
            })?;
            Ok(Arc::new(HttpBackend::new(
                base_url,
                config.api_key.as_deref(),
            )))
        }
    }
}
