//! Synthetic in-process backend.
//!
//! Renders deterministic gradient frames and wraps them in a minimal MP4
//! shell, so the full pipeline runs without any external generation service.
//! Failures can be scripted to drive retry behavior in tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, RgbImage};
use parking_lot::Mutex;

use super::{EncodedVideo, Frame, GenerationBackend};
use reelgen_core::{Error, Result, VideoSettings};

/// Upper bound on rendered frames per job; keeps mock renders quick even for
/// long durations.
const MAX_FRAMES: u32 = 48;

pub struct MockBackend {
    latency: Duration,
    scripted_failures: Mutex<Vec<Error>>,
    synthesize_calls: AtomicU32,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_latency_ms(0)
    }

    pub fn with_latency_ms(latency_ms: u64) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            scripted_failures: Mutex::new(Vec::new()),
            synthesize_calls: AtomicU32::new(0),
        }
    }

    /// Queue an error to be returned by the next `synthesize_frames` call.
    /// Queued errors are consumed in order; once drained, calls succeed.
    pub fn queue_failure(&self, error: Error) {
        self.scripted_failures.lock().push(error);
    }

    /// Number of synthesis attempts so far, scripted failures included.
    pub fn synthesize_calls(&self) -> u32 {
        self.synthesize_calls.load(Ordering::SeqCst)
    }

    fn next_scripted_failure(&self) -> Option<Error> {
        let mut failures = self.scripted_failures.lock();
        if failures.is_empty() {
            None
        } else {
            Some(failures.remove(0))
        }
    }

    async fn simulate_work(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_count(settings: &VideoSettings) -> u32 {
    (settings.duration * settings.fps).clamp(1, MAX_FRAMES)
}

/// Deterministic gradient tile for one frame index.
fn render_frame(index: u32, width: u32, height: u32) -> Result<Bytes> {
    let shift = (index * 7 % 255) as u8;
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = ((x * 255) / width.max(1)) as u8;
        let g = ((y * 255) / height.max(1)) as u8;
        image::Rgb([r.wrapping_add(shift), g, shift])
    });
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| Error::model(format!("frame render failed: {e}")))?;
    Ok(Bytes::from(buf.into_inner()))
}

/// Minimal MP4 shell: an `ftyp` box followed by an `mdat` box whose payload
/// records the fps and per-frame sizes. Enough structure for downstream code
/// that sniffs the container type.
fn fake_mp4(frames: &[Frame], fps: u32) -> Bytes {
    let brand: &[u8] = b"isom\x00\x00\x02\x00isomiso2avc1mp41";
    let mut buf = Vec::new();
    buf.extend_from_slice(&((8 + brand.len()) as u32).to_be_bytes());
    buf.extend_from_slice(b"ftyp");
    buf.extend_from_slice(brand);

    let mut mdat = Vec::new();
    mdat.extend_from_slice(&fps.to_be_bytes());
    for frame in frames {
        mdat.extend_from_slice(&(frame.data.len() as u32).to_be_bytes());
    }
    buf.extend_from_slice(&((8 + mdat.len()) as u32).to_be_bytes());
    buf.extend_from_slice(b"mdat");
    buf.extend_from_slice(&mdat);

    Bytes::from(buf)
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn synthesize_frames(
        &self,
        _prompt: &str,
        settings: &VideoSettings,
    ) -> Result<Vec<Frame>> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.next_scripted_failure() {
            return Err(error);
        }
        self.simulate_work().await;

        (0..frame_count(settings))
            .map(|index| {
                Ok(Frame {
                    index,
                    data: render_frame(index, settings.width(), settings.height())?,
                })
            })
            .collect()
    }

    async fn enhance_frames(&self, frames: Vec<Frame>) -> Result<Vec<Frame>> {
        self.simulate_work().await;

        frames
            .into_iter()
            .map(|frame| {
                let img = image::load_from_memory(&frame.data)
                    .map_err(|e| Error::model(format!("unreadable frame: {e}")))?;
                let brightened = image::imageops::brighten(&img.to_rgb8(), 24);
                let mut buf = Cursor::new(Vec::new());
                image::DynamicImage::ImageRgb8(brightened)
                    .write_to(&mut buf, ImageFormat::Png)
                    .map_err(|e| Error::model(format!("frame re-encode failed: {e}")))?;
                Ok(Frame {
                    index: frame.index,
                    data: Bytes::from(buf.into_inner()),
                })
            })
            .collect()
    }

    async fn assemble_video(
        &self,
        frames: Vec<Frame>,
        settings: &VideoSettings,
    ) -> Result<EncodedVideo> {
        if frames.is_empty() {
            return Err(Error::model("cannot assemble a video from zero frames"));
        }
        self.simulate_work().await;

        // Poster thumbnail comes from the middle of the sequence.
        let poster = &frames[frames.len() / 2];
        let img = image::load_from_memory(&poster.data)
            .map_err(|e| Error::model(format!("unreadable poster frame: {e}")))?;
        let mut thumb = Cursor::new(Vec::new());
        img.write_to(&mut thumb, ImageFormat::Jpeg)
            .map_err(|e| Error::model(format!("thumbnail encode failed: {e}")))?;

        Ok(EncodedVideo {
            video: fake_mp4(&frames, settings.fps),
            thumbnail: Bytes::from(thumb.into_inner()),
        })
    }
}
