use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Runtime configuration for the download and analytics pipeline.
///
/// Secrets (the API token) are merged in from the environment by
/// `load_config`; the rest comes from the YAML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bearer token for the upstream scheduling API.
    pub api_key: String,
    /// Base URL of the upstream API.
    pub base_url: String,
    /// Directory the downloader writes JSON dumps into, and the
    /// reconciler reads them back from.
    pub data_dir: PathBuf,
    /// Exact event-type name that defines the analytics cohort.
    pub target_event_name: String,
    /// Per-request HTTP timeout in seconds.
    pub http_timeout_secs: u64,
    /// Cap on cumulative rate-limit backoff per request, in seconds.
    /// `None` preserves the retry-forever policy.
    pub max_total_backoff_secs: Option<u64>,
}

impl Config {
    pub fn trace_loaded(&self) {
        info!(
            base_url = %self.base_url,
            data_dir = %self.data_dir.display(),
            target_event_name = %self.target_event_name,
            http_timeout_secs = self.http_timeout_secs,
            max_total_backoff_secs = ?self.max_total_backoff_secs,
            api_key_set = !self.api_key.is_empty(),
            "Loaded Config"
        );
        debug!(?self, "Config loaded (full debug)");
    }

    /// Directory holding per-event invitee files.
    pub fn invitees_dir(&self) -> PathBuf {
        self.data_dir.join("invitees")
    }
}
