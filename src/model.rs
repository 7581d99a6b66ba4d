//! Typed analytic table model and permissive JSON field access helpers.
//!
//! Raw API payloads stay `serde_json::Value` all the way through download
//! and reconciliation: the upstream shapes are inconsistent across endpoint
//! versions, and several resources arrive wrapped in a `resource` envelope.
//! The reconciler flattens them into `AnalyticRecord` rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Which entity type the analytic table was built from. The tiers carry
/// very different row semantics, so every derived output is tagged with
/// the tier that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Invitee,
    ScheduledEvent,
    EventType,
}

impl Granularity {
    /// Column inventory of the rows produced at this tier.
    pub fn columns(&self) -> Vec<&'static str> {
        match self {
            Granularity::Invitee => vec![
                "invitee_id",
                "event_id",
                "event_type_uri",
                "internal_note",
                "invitee_name",
                "invitee_email",
                "status",
                "created_at",
                "scheduled_event_created_at",
                "scheduled_event_start_time",
                "scheduled_event_end_time",
                "interested_service",
                "discovery_channel",
                "website_url",
                "phone_number",
                "linkedin_url",
            ],
            Granularity::ScheduledEvent => vec![
                "event_id",
                "event_type_uri",
                "internal_note",
                "status",
                "scheduled_event_created_at",
                "scheduled_event_start_time",
                "scheduled_event_end_time",
            ],
            Granularity::EventType => vec![
                "event_type_uri",
                "name",
                "internal_note",
                "duration",
                "active",
                "created_at",
            ],
        }
    }
}

/// One denormalized row of the analytic table. Population depends on the
/// granularity tier; absent fields stay `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyticRecord {
    pub invitee_id: Option<String>,
    pub event_id: Option<String>,
    pub event_type_uri: Option<String>,
    /// Cohort label. `None` when the source note was missing, null or
    /// whitespace-only; `"Unknown"` when the event-type URI did not
    /// resolve.
    pub internal_note: Option<String>,
    pub invitee_name: Option<String>,
    pub invitee_email: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub scheduled_event_created_at: Option<DateTime<Utc>>,
    pub scheduled_event_start_time: Option<DateTime<Utc>>,
    pub scheduled_event_end_time: Option<DateTime<Utc>>,
    /// Event-type duration in minutes; only populated at the event-type
    /// tier.
    pub duration: Option<f64>,
    pub active: Option<bool>,
    pub interested_service: Option<String>,
    pub discovery_channel: Option<String>,
    pub website_url: Option<String>,
    pub phone_number: Option<String>,
    pub linkedin_url: Option<String>,
}

impl AnalyticRecord {
    /// The timestamp used for temporal analysis at the given tier:
    /// event start time for invitee/scheduled-event rows, creation time
    /// for event-type rows.
    pub fn analysis_date(&self, granularity: Granularity) -> Option<DateTime<Utc>> {
        match granularity {
            Granularity::Invitee | Granularity::ScheduledEvent => self.scheduled_event_start_time,
            Granularity::EventType => self.created_at,
        }
    }
}

/// Parse a timestamp permissively: unparseable or missing input yields
/// `None`, never an error that would abort the row.
pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Unwrap the optional `resource` envelope some endpoints use.
pub fn unwrap_resource(value: &Value) -> &Value {
    value.get("resource").filter(|r| r.is_object()).unwrap_or(value)
}

/// Non-empty string field accessor.
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// Normalize an internal note: null, missing or whitespace-only input is
/// treated as absent, never as a valid cohort label.
pub fn normalize_internal_note(value: Option<&Value>) -> Option<String> {
    let raw = value?.as_str()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
