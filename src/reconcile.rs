//! Record reconciler: loads the persisted JSON dumps, filters to the
//! cohort of interest and joins invitee, scheduled-event and event-type
//! records into a flat analytic table.
//!
//! "No data yet" is an expected, common condition here (the caller simply
//! has not run a download), so the load phase reports boolean success
//! rather than erroring. Missing optional files degrade the table to a
//! coarser granularity tier instead of failing.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::model::{
    normalize_internal_note, parse_timestamp, str_field, unwrap_resource, AnalyticRecord,
    Granularity,
};
use crate::questions;
use serde::Serialize;

#[derive(Debug)]
pub enum ReconcileError {
    Io(std::io::Error),
    /// A mandatory persisted file exists but does not hold valid JSON.
    Json {
        path: String,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Io(e) => write!(f, "failed to read persisted data: {e}"),
            ReconcileError::Json { path, source } => {
                write!(f, "corrupt persisted data in {path}: {source}")
            }
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<std::io::Error> for ReconcileError {
    fn from(e: std::io::Error) -> Self {
        ReconcileError::Io(e)
    }
}

/// Preview of what is available before running full aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct DataPreview {
    pub granularity: Granularity,
    pub total_events: usize,
    pub total_invitees: usize,
    pub internal_notes_distribution: BTreeMap<String, u64>,
    pub status_distribution: BTreeMap<String, u64>,
    pub date_range: DateRangePreview,
    pub columns_available: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DateRangePreview {
    pub min_date: Option<String>,
    pub max_date: Option<String>,
}

impl DataPreview {
    pub fn no_data(message: &str) -> Self {
        DataPreview {
            granularity: Granularity::EventType,
            total_events: 0,
            total_invitees: 0,
            internal_notes_distribution: BTreeMap::new(),
            status_distribution: BTreeMap::new(),
            date_range: DateRangePreview::default(),
            columns_available: Vec::new(),
            message: Some(message.to_string()),
        }
    }
}

/// Loads persisted resources and reconciles them into `AnalyticRecord`s.
pub struct Reconciler {
    config: Config,
    /// Event types matching the target cohort, unwrapped.
    cohort_event_types: Vec<Value>,
    /// uri -> normalized internal note, for joining.
    cohort_notes: HashMap<String, Option<String>>,
    /// Retained scheduled events, unwrapped.
    scheduled_events: Vec<Value>,
    /// (invitee, parent scheduled event) pairs, both unwrapped.
    invitees: Vec<(Value, Value)>,
}

impl Reconciler {
    pub fn new(config: Config) -> Self {
        Reconciler {
            config,
            cohort_event_types: Vec::new(),
            cohort_notes: HashMap::new(),
            scheduled_events: Vec::new(),
            invitees: Vec::new(),
        }
    }

    /// Whether a download has produced the mandatory event-types file.
    pub fn data_exists(&self) -> bool {
        self.config.data_dir.join("event_types.json").exists()
    }

    /// Load persisted data. `Ok(false)` means no data has been downloaded
    /// yet; missing optional files merely reduce the available granularity.
    pub fn load(&mut self) -> Result<bool, ReconcileError> {
        let event_types_path = self.config.data_dir.join("event_types.json");
        if !event_types_path.exists() {
            info!(path = %event_types_path.display(), "Event types file not found, no data yet");
            return Ok(false);
        }

        let event_types = read_json_array(&event_types_path)?;
        info!(count = event_types.len(), "Loaded event types from file");

        let target = self.config.target_event_name.clone();
        self.cohort_event_types.clear();
        self.cohort_notes.clear();
        for event_type in &event_types {
            let data = unwrap_resource(event_type);
            if str_field(data, "name").as_deref() == Some(target.as_str()) {
                if let Some(uri) = str_field(data, "uri") {
                    self.cohort_notes
                        .insert(uri, normalize_internal_note(data.get("internal_note")));
                }
                self.cohort_event_types.push(data.clone());
            }
        }
        info!(
            count = self.cohort_event_types.len(),
            target = %target,
            "Filtered event types to cohort"
        );
        if self.cohort_event_types.is_empty() {
            warn!(target = %target, "No event types matched the cohort name");
        }

        let scheduled_events_path = self.config.data_dir.join("scheduled_events.json");
        self.scheduled_events.clear();
        if !scheduled_events_path.exists() {
            info!(
                path = %scheduled_events_path.display(),
                "Scheduled events file not found, degrading to event-type analytics"
            );
        } else {
            let scheduled_events = read_json_array(&scheduled_events_path)?;
            info!(count = scheduled_events.len(), "Loaded scheduled events from file");
            for event in &scheduled_events {
                let data = unwrap_resource(event);
                let type_uri = str_field(data, "event_type");
                let tag_name = str_field(event, "_event_type_name");
                let in_cohort = type_uri
                    .as_ref()
                    .map(|uri| self.cohort_notes.contains_key(uri))
                    .unwrap_or(false)
                    || tag_name.as_deref() == Some(target.as_str());
                if in_cohort {
                    self.scheduled_events.push(data.clone());
                }
            }
            info!(
                count = self.scheduled_events.len(),
                "Filtered scheduled events to cohort"
            );
        }

        self.load_invitees();
        Ok(true)
    }

    /// Load per-event invitee files for the retained scheduled events,
    /// attaching the parent event to each invitee. Missing directory or
    /// malformed per-event files are tolerated.
    fn load_invitees(&mut self) {
        self.invitees.clear();
        let invitees_dir = self.config.invitees_dir();
        if !invitees_dir.exists() {
            info!("Invitees directory not found, degrading to event-level analytics");
            return;
        }

        for event in &self.scheduled_events {
            let Some(uri) = str_field(event, "uri") else {
                continue;
            };
            let event_id = uri.trim_end_matches('/').rsplit('/').next().unwrap_or("");
            if event_id.is_empty() {
                continue;
            }
            let invitee_file = invitees_dir.join(format!("{event_id}.json"));
            if !invitee_file.exists() {
                continue;
            }
            match read_json_array(&invitee_file) {
                Ok(event_invitees) => {
                    for invitee in event_invitees {
                        let data = unwrap_resource(&invitee).clone();
                        self.invitees.push((data, event.clone()));
                    }
                }
                Err(e) => {
                    warn!(event_id, error = %e, "Skipping malformed invitee file");
                }
            }
        }
        info!(count = self.invitees.len(), "Loaded invitee records");
    }

    /// Build the analytic table from the richest populated source tier.
    pub fn build_table(&self) -> (Granularity, Vec<AnalyticRecord>) {
        if !self.invitees.is_empty() {
            info!("Building table from invitee data (most detailed)");
            return (Granularity::Invitee, self.rows_from_invitees());
        }
        if !self.scheduled_events.is_empty() {
            info!("Building table from scheduled events");
            return (Granularity::ScheduledEvent, self.rows_from_scheduled_events());
        }
        if !self.cohort_event_types.is_empty() {
            info!("Building table from event types only (basic analytics)");
            return (Granularity::EventType, self.rows_from_event_types());
        }
        info!("No data available to build the analytic table");
        (Granularity::EventType, Vec::new())
    }

    /// Cohort label for a scheduled event's event-type URI. An unresolved
    /// reference falls back to "Unknown" rather than failing.
    fn label_for(&self, event_type_uri: Option<&str>) -> Option<String> {
        match event_type_uri.and_then(|uri| self.cohort_notes.get(uri)) {
            Some(note) => note.clone(),
            None => Some("Unknown".to_string()),
        }
    }

    fn rows_from_invitees(&self) -> Vec<AnalyticRecord> {
        let mut rows = Vec::with_capacity(self.invitees.len());
        for (invitee, event) in &self.invitees {
            let type_uri = str_field(event, "event_type");
            let mut record = AnalyticRecord {
                invitee_id: str_field(invitee, "uri"),
                event_id: str_field(event, "uri"),
                event_type_uri: type_uri.clone(),
                internal_note: self.label_for(type_uri.as_deref()),
                invitee_name: str_field(invitee, "name"),
                invitee_email: str_field(invitee, "email"),
                status: str_field(invitee, "status"),
                created_at: parse_timestamp(invitee.get("created_at")),
                scheduled_event_created_at: parse_timestamp(event.get("created_at")),
                scheduled_event_start_time: parse_timestamp(event.get("start_time")),
                scheduled_event_end_time: parse_timestamp(event.get("end_time")),
                ..AnalyticRecord::default()
            };

            if let Some(pairs) = invitee.get("questions_and_answers").and_then(Value::as_array) {
                for qa in pairs {
                    let question = qa.get("question").and_then(Value::as_str).unwrap_or("");
                    let answer = qa.get("answer").and_then(Value::as_str).unwrap_or("");
                    questions::apply_answer(&mut record, question, answer);
                }
            }
            rows.push(record);
        }
        rows
    }

    fn rows_from_scheduled_events(&self) -> Vec<AnalyticRecord> {
        self.scheduled_events
            .iter()
            .map(|event| {
                let type_uri = str_field(event, "event_type");
                AnalyticRecord {
                    event_id: str_field(event, "uri"),
                    event_type_uri: type_uri.clone(),
                    internal_note: self.label_for(type_uri.as_deref()),
                    status: str_field(event, "status"),
                    scheduled_event_created_at: parse_timestamp(event.get("created_at")),
                    scheduled_event_start_time: parse_timestamp(event.get("start_time")),
                    scheduled_event_end_time: parse_timestamp(event.get("end_time")),
                    ..AnalyticRecord::default()
                }
            })
            .collect()
    }

    fn rows_from_event_types(&self) -> Vec<AnalyticRecord> {
        self.cohort_event_types
            .iter()
            .map(|event_type| AnalyticRecord {
                event_type_uri: str_field(event_type, "uri"),
                internal_note: normalize_internal_note(event_type.get("internal_note")),
                duration: event_type.get("duration").and_then(Value::as_f64),
                active: event_type.get("active").and_then(Value::as_bool),
                created_at: parse_timestamp(event_type.get("created_at")),
                ..AnalyticRecord::default()
            })
            .collect()
    }

    /// Row counts, distributions and column inventory of the current table.
    pub fn preview(&self) -> DataPreview {
        let (granularity, rows) = self.build_table();

        let total_events = if !self.scheduled_events.is_empty() {
            self.scheduled_events.len()
        } else {
            self.cohort_event_types.len()
        };

        let mut internal_notes = BTreeMap::new();
        let mut statuses = BTreeMap::new();
        let mut dates = Vec::new();
        for row in &rows {
            if let Some(note) = &row.internal_note {
                *internal_notes.entry(note.clone()).or_insert(0u64) += 1;
            }
            if let Some(status) = &row.status {
                *statuses.entry(status.clone()).or_insert(0u64) += 1;
            }
            if let Some(date) = row.analysis_date(granularity) {
                dates.push(date);
            }
        }

        let date_range = DateRangePreview {
            min_date: dates.iter().min().map(|d| d.to_rfc3339()),
            max_date: dates.iter().max().map(|d| d.to_rfc3339()),
        };

        DataPreview {
            granularity,
            total_events,
            total_invitees: self.invitees.len(),
            internal_notes_distribution: internal_notes,
            status_distribution: statuses,
            date_range,
            columns_available: if rows.is_empty() {
                Vec::new()
            } else {
                granularity.columns()
            },
            message: None,
        }
    }
}

fn read_json_array(path: &Path) -> Result<Vec<Value>, ReconcileError> {
    let content = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&content).map_err(|e| ReconcileError::Json {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}
