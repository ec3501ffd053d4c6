//! # Real-Time Events
//!
//! Change notifications delivered by the transport, one per row change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// New record inserted
    Insert,
    /// Existing record updated
    Update,
    /// Record deleted
    Delete,
}

impl ChangeKind {
    /// Parse the wire spelling, case-insensitively
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A row change on a watched resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Change type
    pub kind: ChangeKind,

    /// Resource (table) name
    pub resource: String,

    /// Schema name (default: "public")
    #[serde(default = "default_schema")]
    pub schema: String,

    /// New record data (for INSERT/UPDATE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_record: Option<Value>,

    /// Old record data (for UPDATE/DELETE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,

    /// Commit timestamp reported by the backend
    pub commit_timestamp: DateTime<Utc>,
}

fn default_schema() -> String {
    "public".to_string()
}

impl ChangeEvent {
    /// Create an INSERT event
    pub fn insert(resource: impl Into<String>, record: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            resource: resource.into(),
            schema: default_schema(),
            new_record: Some(record),
            old_record: None,
            commit_timestamp: Utc::now(),
        }
    }

    /// Create an UPDATE event
    pub fn update(resource: impl Into<String>, old_record: Value, new_record: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            resource: resource.into(),
            schema: default_schema(),
            new_record: Some(new_record),
            old_record: Some(old_record),
            commit_timestamp: Utc::now(),
        }
    }

    /// Create a DELETE event
    pub fn delete(resource: impl Into<String>, record: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            resource: resource.into(),
            schema: default_schema(),
            new_record: None,
            old_record: Some(record),
            commit_timestamp: Utc::now(),
        }
    }

    /// The record this change is about: the new row, or the old one for deletes
    pub fn record(&self) -> Option<&Value> {
        self.new_record.as_ref().or(self.old_record.as_ref())
    }

    /// Parse a postgres-changes style payload.
    ///
    /// Accepts either the bare payload or one wrapped in `{"payload": ...}`.
    /// The change type is read from `eventType`, `type` or `event`. Returns
    /// `None` when the payload lacks a table or a recognizable change type.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let payload = value.get("payload").unwrap_or(value);

        let kind = ["eventType", "type", "event"]
            .iter()
            .filter_map(|key| payload.get(*key).and_then(Value::as_str))
            .find_map(ChangeKind::parse)?;

        let resource = payload.get("table").and_then(Value::as_str)?.to_string();

        let schema = payload
            .get("schema")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(default_schema);

        let commit_timestamp = payload
            .get("commit_timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(Self {
            kind,
            resource,
            schema,
            new_record: non_empty_record(payload.get("new")),
            old_record: non_empty_record(payload.get("old")),
            commit_timestamp,
        })
    }
}

// Backends send `{}` for the side of the change that does not exist.
fn non_empty_record(value: Option<&Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(v) => Some(v.clone()),
    }
}
