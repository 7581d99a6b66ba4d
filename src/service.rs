//! Outbound facade consumed by the request router and the CLI:
//! start a background download, poll its progress, and compute the
//! summary/preview from the persisted data.

use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use crate::analytics::{AnalyticsEngine, AnalyticsReport};
use crate::client::{ApiClient, HttpTransport, ReqwestTransport, TransportError};
use crate::config::Config;
use crate::download::{BulkDownloader, TOTAL_STEPS};
use crate::progress::{DownloadCoordinator, ProgressSnapshot, RunState, StartOutcome};
use crate::reconcile::{DataPreview, ReconcileError, Reconciler};

/// Acknowledgement returned by `start_download`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartResponse {
    pub status: &'static str,
    pub message: String,
}

/// Failure modes of `get_summary`.
#[derive(Debug)]
pub enum SummaryError {
    /// No download has completed yet; the caller should trigger one.
    NoData(String),
    /// Persisted data exists but could not be read back.
    Reconcile(ReconcileError),
}

impl std::fmt::Display for SummaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryError::NoData(msg) => write!(f, "{msg}"),
            SummaryError::Reconcile(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SummaryError {}

impl From<ReconcileError> for SummaryError {
    fn from(e: ReconcileError) -> Self {
        SummaryError::Reconcile(e)
    }
}

pub struct Service {
    config: Config,
    coordinator: DownloadCoordinator,
}

impl Service {
    pub fn new(config: Config) -> Self {
        Service {
            config,
            coordinator: DownloadCoordinator::new(TOTAL_STEPS),
        }
    }

    /// Start a background download with the production transport.
    pub fn start_download(&self) -> Result<StartResponse, TransportError> {
        let transport = ReqwestTransport::new(
            &self.config.api_key,
            Duration::from_secs(self.config.http_timeout_secs),
        )?;
        Ok(self.start_download_with(transport))
    }

    /// Start a background download over an explicit transport. At most one
    /// run may be in flight: a second request is acknowledged with
    /// `already_running` instead of starting another.
    pub fn start_download_with<T>(&self, transport: T) -> StartResponse
    where
        T: HttpTransport + 'static,
    {
        match self.coordinator.try_start() {
            StartOutcome::AlreadyRunning => StartResponse {
                status: "already_running",
                message: "A download is already in progress".to_string(),
            },
            StartOutcome::Started => {
                let client = ApiClient::new(
                    transport,
                    self.config.max_total_backoff_secs.map(Duration::from_secs),
                );
                let downloader = BulkDownloader::new(
                    self.config.clone(),
                    client,
                    self.coordinator.progress.clone(),
                );
                let coordinator = self.coordinator.clone();
                tokio::spawn(async move {
                    match downloader.run().await {
                        Ok(summary) => {
                            info!(?summary, "Download run completed");
                            coordinator.finish(Ok(summary));
                        }
                        Err(e) => {
                            error!(error = %e, "Download run failed");
                            coordinator.finish(Err(e.to_string()));
                        }
                    }
                });
                StartResponse {
                    status: "started",
                    message: "Data download started in background".to_string(),
                }
            }
        }
    }

    pub fn get_progress(&self) -> ProgressSnapshot {
        self.coordinator.progress.snapshot()
    }

    pub fn run_state(&self) -> RunState {
        self.coordinator.run_state()
    }

    pub fn is_downloading(&self) -> bool {
        self.coordinator.is_running()
    }

    /// Reconcile the persisted data and compute the full analytics report.
    pub fn get_summary(&self) -> Result<AnalyticsReport, SummaryError> {
        let mut reconciler = Reconciler::new(self.config.clone());
        if !reconciler.load()? {
            return Err(SummaryError::NoData(
                "Failed to load data. Please download scheduling data first.".to_string(),
            ));
        }
        let (granularity, rows) = reconciler.build_table();
        if rows.is_empty() {
            return Err(SummaryError::NoData(format!(
                "No data available for analysis. Please ensure '{}' events exist.",
                self.config.target_event_name
            )));
        }
        info!(rows = rows.len(), ?granularity, "Generating analytics report");
        Ok(AnalyticsEngine::new(granularity, &rows).report())
    }

    /// Preview of the available data, with zeroed defaults before any
    /// download has completed.
    pub fn get_preview(&self) -> Result<DataPreview, ReconcileError> {
        let mut reconciler = Reconciler::new(self.config.clone());
        if !reconciler.load()? {
            return Ok(DataPreview::no_data(
                "No data available. Please download scheduling data first.",
            ));
        }
        Ok(reconciler.preview())
    }
}
