use crate::config::Config;
use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Deserialize)]
struct StaticConfig {
    #[serde(default = "default_base_url")]
    base_url: String,
    data_dir: PathBuf,
    target_event_name: String,
    #[serde(default = "default_http_timeout")]
    http_timeout_secs: u64,
    #[serde(default)]
    max_total_backoff_secs: Option<u64>,
}

fn default_base_url() -> String {
    "https://api.calendly.com".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

/// Loads a static YAML config file (no secrets) and injects required env vars
/// for secrets. Returns a fully merged Config or an error.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let api_key = match std::env::var("CALENDLY_API_KEY") {
        Ok(key) => {
            info!("CALENDLY_API_KEY found in env");
            key
        }
        Err(e) => {
            error!(error = ?e, "CALENDLY_API_KEY environment variable not set");
            return Err(anyhow::anyhow!(
                "CALENDLY_API_KEY environment variable not set: {e}"
            ));
        }
    };

    let config = Config {
        api_key,
        base_url: static_conf.base_url.trim_end_matches('/').to_string(),
        data_dir: static_conf.data_dir,
        target_event_name: static_conf.target_event_name,
        http_timeout_secs: static_conf.http_timeout_secs,
        max_total_backoff_secs: static_conf.max_total_backoff_secs,
    };

    info!(
        base_url = %config.base_url,
        data_dir = %config.data_dir.display(),
        "Config loaded and merged successfully"
    );

    Ok(config)
}
