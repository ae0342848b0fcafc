mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./reelgen.toml",
        "~/.config/reelgen/config.toml",
        "/etc/reelgen/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.queue.max_concurrent_jobs == 0 {
        anyhow::bail!("queue.max_concurrent_jobs must be at least 1");
    }

    if config.queue.job_timeout_secs == 0 {
        anyhow::bail!("queue.job_timeout_secs must be at least 1");
    }

    if config.storage.bucket.is_empty() {
        anyhow::bail!("storage.bucket cannot be empty");
    }

    if config.backend.mode == BackendMode::Http && config.backend.base_url.is_none() {
        anyhow::bail!("backend.base_url is required when backend.mode is 'http'");
    }

    Ok(())
}
