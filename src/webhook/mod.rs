//! Outbound webhook notifications.
//!
//! Deliveries are awaited so events for one job stay ordered, but failures
//! are logged and swallowed: a dead receiver never affects job processing.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::WebhookConfig;
use reelgen_core::{JobId, UserId};

/// Lifecycle events surfaced to webhook receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEvent {
    #[serde(rename = "job.started")]
    Started,
    #[serde(rename = "job.progress")]
    Progress,
    #[serde(rename = "job.completed")]
    Completed,
    #[serde(rename = "job.failed")]
    Failed,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "job.started",
            Self::Progress => "job.progress",
            Self::Completed => "job.completed",
            Self::Failed => "job.failed",
        }
    }
}

/// JSON body POSTed to the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: JobEvent,
    pub job_id: JobId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl WebhookPayload {
    fn new(event: JobEvent, job_id: JobId, user_id: UserId) -> Self {
        Self {
            event,
            job_id,
            user_id,
            progress: None,
            stage: None,
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn started(job_id: JobId, user_id: UserId) -> Self {
        Self::new(JobEvent::Started, job_id, user_id)
    }

    pub fn progress(job_id: JobId, user_id: UserId, progress: f64, stage: &str) -> Self {
        let mut p = Self::new(JobEvent::Progress, job_id, user_id);
        p.progress = Some(progress);
        p.stage = Some(stage.to_string());
        p
    }

    pub fn completed(job_id: JobId, user_id: UserId) -> Self {
        let mut p = Self::new(JobEvent::Completed, job_id, user_id);
        p.progress = Some(100.0);
        p
    }

    pub fn failed(job_id: JobId, user_id: UserId, error: &str) -> Self {
        let mut p = Self::new(JobEvent::Failed, job_id, user_id);
        p.error = Some(error.to_string());
        p
    }
}

/// HTTP client for webhook deliveries.
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build webhook client: {}", e);
                Client::new()
            });
        Self { client }
    }

    /// Deliver a payload. Never fails; delivery problems are logged.
    pub async fn send(&self, url: Option<&str>, payload: &WebhookPayload) {
        let Some(url) = url else { return };

        match self.client.post(url).json(payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(
                    job_id = %payload.job_id,
                    event = payload.event.as_str(),
                    "Webhook delivered"
                );
            }
            Ok(response) => {
                tracing::warn!(
                    job_id = %payload.job_id,
                    event = payload.event.as_str(),
                    status = %response.status(),
                    "Webhook receiver returned an error status"
                );
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %payload.job_id,
                    event = payload.event.as_str(),
                    error = %e,
                    "Webhook delivery failed"
                );
            }
        }
    }
}
