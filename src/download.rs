//! Bulk downloader: executes the fixed resource-acquisition sequence and
//! persists each resource set under the configured data directory.
//!
//! Steps 1-3 (account profile, organization memberships, event types) are
//! mandatory and abort the run on failure. The remaining steps degrade
//! gracefully: a failure fetching one event type's scheduled events or one
//! event's invitees is logged and skipped, never fatal.

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::client::{ApiClient, ClientError, HttpTransport};
use crate::config::Config;
use crate::model::{str_field, unwrap_resource};
use crate::progress::ProgressReporter;

/// Number of coarse-grained progress steps in one full run.
pub const TOTAL_STEPS: u32 = 6;

/// Structured result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub organization_memberships: usize,
    pub event_types: usize,
    /// Event types whose name matches the configured target, for the
    /// analytics cohort. Diagnostic only.
    pub matching_event_types: usize,
    pub scheduled_events: usize,
    pub invitees: usize,
}

#[derive(Debug)]
pub enum DownloadError {
    /// A mandatory step failed against the upstream API.
    Client(ClientError),
    /// No organization identifier could be resolved from the account
    /// profile.
    MissingOrganization,
    Io(std::io::Error),
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadError::Client(e) => {
                if let ClientError::Status { status: 401, .. } = e {
                    write!(f, "Authentication failed. Please check your API key: {e}")
                } else {
                    write!(f, "Failed to download data: {e}")
                }
            }
            DownloadError::MissingOrganization => {
                write!(f, "Could not find organization URI in user data")
            }
            DownloadError::Io(e) => write!(f, "Failed to persist downloaded data: {e}"),
        }
    }
}

impl std::error::Error for DownloadError {}

impl From<ClientError> for DownloadError {
    fn from(e: ClientError) -> Self {
        DownloadError::Client(e)
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        DownloadError::Io(e)
    }
}

pub struct BulkDownloader<T> {
    config: Config,
    client: ApiClient<T>,
    progress: ProgressReporter,
}

impl<T: HttpTransport> BulkDownloader<T> {
    pub fn new(config: Config, client: ApiClient<T>, progress: ProgressReporter) -> Self {
        BulkDownloader {
            config,
            client,
            progress,
        }
    }

    /// Run the full acquisition sequence, returning a summary on success
    /// or the first fatal error.
    pub async fn run(&self) -> Result<DownloadSummary, DownloadError> {
        fs::create_dir_all(self.config.invitees_dir())?;
        let base = &self.config.base_url;

        // Step 1: account profile, to resolve the organization URI.
        self.progress.update(
            1,
            "Fetching user information",
            "Getting account details from the scheduling API",
        );
        let me = self
            .client
            .fetch_json(&format!("{base}/users/me"), &[])
            .await?;
        write_json_atomic(&self.config.data_dir.join("users_me.json"), &me)?;

        let org_uri = resolve_organization_uri(&me).ok_or(DownloadError::MissingOrganization)?;
        info!(organization = %org_uri, "Resolved organization URI");
        let org_params = vec![("organization".to_string(), org_uri.clone())];

        // Step 2: organization memberships (team roster).
        self.progress.update(
            2,
            "Fetching organization memberships",
            "Getting team member information",
        );
        let memberships = self
            .client
            .paginate(&format!("{base}/organization_memberships"), &org_params)
            .await?;
        write_json_atomic(
            &self.config.data_dir.join("organization_memberships.json"),
            &Value::Array(memberships.clone()),
        )?;
        info!(count = memberships.len(), "Saved organization memberships");

        // Step 3: event types, the critical input for the analytics cohort.
        self.progress.update(
            3,
            "Fetching event types",
            "Getting all event type configurations",
        );
        let event_types = self
            .client
            .paginate(&format!("{base}/event_types"), &org_params)
            .await?;
        write_json_atomic(
            &self.config.data_dir.join("event_types.json"),
            &Value::Array(event_types.clone()),
        )?;

        let target = &self.config.target_event_name;
        let matching_event_types = event_types
            .iter()
            .filter(|et| event_type_name(et) == *target)
            .count();
        info!(
            count = event_types.len(),
            matching = matching_event_types,
            target = %target,
            "Saved event types"
        );
        if matching_event_types == 0 {
            warn!(target = %target, "No event types matched the target name");
            for et in event_types.iter().take(10) {
                warn!(name = %event_type_name(et), "Available event type");
            }
        }

        // Step 4: user profiles. Optional; the endpoint is missing on some
        // plans, so failure is logged and skipped.
        self.progress.update(4, "Fetching user profiles", "Getting user details");
        match self
            .client
            .paginate(&format!("{base}/users"), &org_params)
            .await
        {
            Ok(users) => {
                write_json_atomic(
                    &self.config.data_dir.join("users.json"),
                    &Value::Array(users),
                )?;
            }
            Err(e) => {
                warn!(error = %e, "Skipping user profiles step");
            }
        }

        // Step 5: scheduled events per event type, tagged with the owning
        // event type and combined into a single file.
        self.progress.update(
            5,
            "Fetching scheduled events",
            "Getting booked meetings for each event type",
        );
        let mut scheduled_events: Vec<Value> = Vec::new();
        for et in &event_types {
            let Some(uri) = event_type_uri(et) else {
                continue;
            };
            let name = event_type_name(et);
            let params = vec![
                ("organization".to_string(), org_uri.clone()),
                ("event_type".to_string(), uri.clone()),
            ];
            match self
                .client
                .paginate(&format!("{base}/scheduled_events"), &params)
                .await
            {
                Ok(events) => {
                    for mut event in events {
                        if let Some(obj) = event.as_object_mut() {
                            obj.insert("_event_type_name".to_string(), Value::String(name.clone()));
                            obj.insert("_event_type_uri".to_string(), Value::String(uri.clone()));
                        }
                        scheduled_events.push(event);
                    }
                }
                Err(e) => {
                    warn!(
                        event_type = %name,
                        uri = %uri,
                        error = %e,
                        "Skipping scheduled events for event type"
                    );
                }
            }
        }
        write_json_atomic(
            &self.config.data_dir.join("scheduled_events.json"),
            &Value::Array(scheduled_events.clone()),
        )?;
        info!(count = scheduled_events.len(), "Saved scheduled events");

        // Step 6: invitees per scheduled event, one file per event named by
        // the trailing URI path segment.
        self.progress.update(
            6,
            "Fetching invitees",
            "Getting attendee records for each scheduled event",
        );
        let mut invitee_count = 0usize;
        for event in &scheduled_events {
            let data = unwrap_resource(event);
            let Some(uri) = str_field(data, "uri") else {
                continue;
            };
            let event_id = trailing_segment(&uri);
            if event_id.is_empty() {
                continue;
            }
            match self.client.paginate(&format!("{uri}/invitees"), &[]).await {
                Ok(invitees) => {
                    invitee_count += invitees.len();
                    write_json_atomic(
                        &self.config.invitees_dir().join(format!("{event_id}.json")),
                        &Value::Array(invitees),
                    )?;
                }
                Err(e) => {
                    warn!(event = %uri, error = %e, "Skipping invitees for event");
                }
            }
        }
        info!(count = invitee_count, "Saved invitee records");

        Ok(DownloadSummary {
            organization_memberships: memberships.len(),
            event_types: event_types.len(),
            matching_event_types,
            scheduled_events: scheduled_events.len(),
            invitees: invitee_count,
        })
    }
}

/// Resolve the organization URI from the account profile, trying the known
/// response structures in order.
pub fn resolve_organization_uri(me: &Value) -> Option<String> {
    me.get("resource")
        .and_then(|r| r.get("current_organization"))
        .or_else(|| me.get("current_organization"))
        .or_else(|| me.get("data").and_then(|d| d.get("current_organization")))
        .or_else(|| me.get("organization"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// Event-type name, honouring the optional `resource` envelope.
pub fn event_type_name(event_type: &Value) -> String {
    str_field(unwrap_resource(event_type), "name").unwrap_or_else(|| "Unknown".to_string())
}

/// Event-type URI, honouring the optional `resource` envelope.
pub fn event_type_uri(event_type: &Value) -> Option<String> {
    str_field(unwrap_resource(event_type), "uri")
}

fn trailing_segment(uri: &str) -> &str {
    uri.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Write a JSON value via a temp file in the same directory, then rename,
/// so a concurrently-triggered reconciliation never sees partial output.
pub fn write_json_atomic(path: &Path, value: &Value) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
