//! HTTP generation backend.
//!
//! Speaks to a remote generation service: `POST /v1/synthesize`,
//! `/v1/enhance` and `/v1/encode`, with frame payloads carried as base64.
//! Response statuses are folded into the error taxonomy so the retry policy
//! knows a 429 is worth another attempt and a 422 is not.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{EncodedVideo, Frame, GenerationBackend};
use reelgen_core::{Error, Result, VideoSettings};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Wire types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct FrameDto {
    index: u32,
    /// Base64-encoded PNG.
    data: String,
}

impl FrameDto {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            index: frame.index,
            data: STANDARD.encode(&frame.data),
        }
    }

    fn into_frame(self) -> Result<Frame> {
        let data = STANDARD
            .decode(&self.data)
            .map_err(|e| Error::model(format!("undecodable frame payload: {e}")))?;
        Ok(Frame {
            index: self.index,
            data: Bytes::from(data),
        })
    }
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    prompt: &'a str,
    duration: u32,
    width: u32,
    height: u32,
    fps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct FramesResponse {
    frames: Vec<FrameDto>,
}

#[derive(Debug, Serialize)]
struct EnhanceRequest {
    frames: Vec<FrameDto>,
}

#[derive(Debug, Serialize)]
struct EncodeRequest {
    frames: Vec<FrameDto>,
    fps: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    /// Base64-encoded MP4.
    video: String,
    /// Base64-encoded JPEG.
    thumbnail: String,
}

// ---------------------------------------------------------------------------
// Backend implementation
// ---------------------------------------------------------------------------

/// Client for a remote generation service.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build backend client: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, path, &detail));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| Error::model(format!("bad response from {path}: {e}")))
    }
}

fn map_transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("generation service request timed out: {e}"))
    } else if e.is_connect() {
        Error::system(format!("generation service unreachable: {e}"))
    } else {
        Error::from_message(&e.to_string())
    }
}

fn map_status_error(status: StatusCode, path: &str, detail: &str) -> Error {
    let message = format!("{path} returned {status}: {detail}");
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Error::timeout(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::validation(message),
        StatusCode::TOO_MANY_REQUESTS => Error::model(message),
        s if s.is_server_error() => Error::model(message),
        _ => Error::from_message(&message),
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn synthesize_frames(
        &self,
        prompt: &str,
        settings: &VideoSettings,
    ) -> Result<Vec<Frame>> {
        let request = SynthesizeRequest {
            prompt,
            duration: settings.duration,
            width: settings.width(),
            height: settings.height(),
            fps: settings.fps,
            style: settings.style.as_deref(),
        };
        let response: FramesResponse = self.post_json("/v1/synthesize", &request).await?;
        response
            .frames
            .into_iter()
            .map(FrameDto::into_frame)
            .collect()
    }

    async fn enhance_frames(&self, frames: Vec<Frame>) -> Result<Vec<Frame>> {
        let request = EnhanceRequest {
            frames: frames.iter().map(FrameDto::from_frame).collect(),
        };
        let response: FramesResponse = self.post_json("/v1/enhance", &request).await?;
        response
            .frames
            .into_iter()
            .map(FrameDto::into_frame)
            .collect()
    }

    async fn assemble_video(
        &self,
        frames: Vec<Frame>,
        settings: &VideoSettings,
    ) -> Result<EncodedVideo> {
        let request = EncodeRequest {
            frames: frames.iter().map(FrameDto::from_frame).collect(),
            fps: settings.fps,
            width: settings.width(),
            height: settings.height(),
        };
        let response: EncodeResponse = self.post_json("/v1/encode", &request).await?;
        let video = STANDARD
            .decode(&response.video)
            .map_err(|e| Error::model(format!("undecodable video payload: {e}")))?;
        let thumbnail = STANDARD
            .decode(&response.thumbnail)
            .map_err(|e| Error::model(format!("undecodable thumbnail payload: {e}")))?;
        Ok(EncodedVideo {
            video: Bytes::from(video),
            thumbnail: Bytes::from(thumbnail),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_settings() -> VideoSettings {
        VideoSettings {
            duration: 2,
            resolution: [320, 180],
            fps: 4,
            style: Some("sketch".into()),
            enhance_frames: true,
        }
    }

    #[tokio::test]
    async fn synthesize_decodes_base64_frames() {
        let server = MockServer::start().await;
        let png = STANDARD.encode(b"fake png");
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .and(body_partial_json(serde_json::json!({
                "prompt": "a red square",
                "width": 320,
                "height": 180,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "frames": [{"index": 0, "data": png}]
            })))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), None);
        let frames = backend
            .synthesize_frames("a red square", &test_settings())
            .await
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].data[..], b"fake png");
    }

    #[tokio::test]
    async fn api_key_is_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "frames": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), Some("sekrit"));
        backend
            .synthesize_frames("p", &test_settings())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rate_limit_maps_to_retryable_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), None);
        let err = backend
            .synthesize_frames("p", &test_settings())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unprocessable_prompt_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("prompt rejected"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), None);
        let err = backend
            .synthesize_frames("p", &test_settings())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn gateway_timeout_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(504))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), None);
        let err = backend
            .enhance_frames(vec![Frame {
                index: 0,
                data: Bytes::from_static(b"png"),
            }])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), reelgen_core::ErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn encode_returns_video_and_thumbnail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/encode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "video": STANDARD.encode(b"mp4"),
                "thumbnail": STANDARD.encode(b"jpg"),
            })))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), None);
        let encoded = backend
            .assemble_video(
                vec![Frame {
                    index: 0,
                    data: Bytes::from_static(b"png"),
                }],
                &test_settings(),
            )
            .await
            .unwrap();
        assert_eq!(&encoded.video[..], b"mp4");
        assert_eq!(&encoded.thumbnail[..], b"jpg");
    }
}
