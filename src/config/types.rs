use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use reelgen_core::Tier;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub webhooks: WebhookConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8700
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("reelgen.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for the object store.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Bucket name under the root; all object keys live below it.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Base URL prepended to object keys when building public media URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./media")
}
fn default_bucket() -> String {
    "reelgen".to_string()
}
fn default_public_base_url() -> String {
    "http://127.0.0.1:8700/media".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            bucket: default_bucket(),
            public_base_url: default_public_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Jobs allowed to run at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,

    /// Wall-clock limit for one job, all retries included.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Retries after the initial attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between retry attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Fallback polling interval when no submissions arrive.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_free_limit")]
    pub free_tier_monthly_limit: u32,

    #[serde(default = "default_pro_limit")]
    pub pro_tier_monthly_limit: u32,
}

fn default_max_concurrent() -> usize {
    3
}
fn default_job_timeout() -> u64 {
    600
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    5
}
fn default_poll_interval() -> u64 {
    2
}
fn default_free_limit() -> u32 {
    10
}
fn default_pro_limit() -> u32 {
    100
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent(),
            job_timeout_secs: default_job_timeout(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            poll_interval_secs: default_poll_interval(),
            free_tier_monthly_limit: default_free_limit(),
            pro_tier_monthly_limit: default_pro_limit(),
        }
    }
}

impl QueueConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Monthly video allowance for a tier.
    pub fn monthly_limit(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free_tier_monthly_limit,
            Tier::Pro => self.pro_tier_monthly_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// In-process synthetic backend; no external service needed.
    Mock,
    /// Remote generation service spoken to over HTTP.
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_mode")]
    pub mode: BackendMode,

    /// Base URL of the generation service (http mode).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token for the generation service (http mode).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Artificial per-stage latency for the mock backend, in milliseconds.
    #[serde(default)]
    pub mock_latency_ms: u64,
}

fn default_backend_mode() -> BackendMode {
    BackendMode::Mock
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: default_backend_mode(),
            base_url: None,
            api_key: None,
            mock_latency_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    /// Per-request timeout for webhook deliveries.
    #[serde(default = "default_webhook_timeout")]
    pub request_timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 {
    5
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_webhook_timeout(),
        }
    }
}

impl WebhookConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_enabled")]
    pub enabled: bool,

    /// Seconds between maintenance sweeps.
    #[serde(default = "default_maintenance_interval")]
    pub interval_secs: u64,

    /// A processing job untouched this long is considered stuck.
    #[serde(default = "default_stuck_after")]
    pub stuck_after_mins: u64,

    /// Intermediate frames for terminal jobs are removed after this long.
    #[serde(default = "default_frame_retention")]
    pub frame_retention_hours: u64,

    /// Jobs older than this show up in the prune report.
    #[serde(default = "default_prune_after")]
    pub prune_after_days: u64,
}

fn default_maintenance_enabled() -> bool {
    true
}
fn default_maintenance_interval() -> u64 {
    300
}
fn default_stuck_after() -> u64 {
    30
}
fn default_frame_retention() -> u64 {
    24
}
fn default_prune_after() -> u64 {
    30
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_maintenance_enabled(),
            interval_secs: default_maintenance_interval(),
            stuck_after_mins: default_stuck_after(),
            frame_retention_hours: default_frame_retention(),
            prune_after_days: default_prune_after(),
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
