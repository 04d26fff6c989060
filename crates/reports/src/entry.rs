//! Row and state types written by the [`MigrationLogger`](crate::MigrationLogger).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use marcmig_core::error::{ClassifiedError, PRIORITY_CRITICAL, STAGE_STREAM};
use marcmig_core::types::Timestamp;

/// CSV header of the tabular migration log, in column order.
pub const LOG_COLUMNS: [&str; 9] = [
    "recid", "stage", "type", "error", "field", "value", "message", "clean", "priority",
];

/// Type column of a whole-stream failure row.
pub const STREAM_FAILURE: &str = "StreamFailure";

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// One row of `migration_errors.csv`.
///
/// Field order matches [`LOG_COLUMNS`]; the csv writer derives the header
/// from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub recid: String,
    pub stage: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub error: String,
    pub field: String,
    pub value: String,
    pub message: String,
    pub clean: bool,
    pub priority: String,
}

impl LogEntry {
    /// A failure row for a classified error.
    pub fn failure(recid: impl Into<String>, err: &ClassifiedError) -> Self {
        let d = err.details();
        Self {
            recid: recid.into(),
            stage: d.stage.clone().unwrap_or_default(),
            kind: err.type_name().to_string(),
            error: err.description().to_string(),
            field: render_field(d.field.as_deref(), d.subfield.as_deref()),
            value: d.value.as_ref().map(render_value).unwrap_or_default(),
            message: d.message.clone().unwrap_or_default(),
            clean: false,
            priority: d.priority.clone().unwrap_or_default(),
        }
    }

    /// A clean row, carrying any warnings staged for the record.
    pub fn success(recid: impl Into<String>, state: Option<SuccessState>) -> Self {
        let state = state.unwrap_or_default();
        Self {
            recid: recid.into(),
            stage: state.stage,
            kind: state.kind,
            error: state.error,
            field: state.field,
            value: state.value,
            message: state.message,
            clean: true,
            priority: state.priority,
        }
    }

    /// A row recording that a whole stream stopped.
    pub fn stream_failure(stream: &str, message: impl Into<String>) -> Self {
        Self {
            stage: STAGE_STREAM.to_string(),
            kind: STREAM_FAILURE.to_string(),
            error: format!("[STREAM FAILED] {stream}"),
            message: message.into(),
            clean: false,
            priority: PRIORITY_CRITICAL.to_string(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// SuccessState
// ---------------------------------------------------------------------------

/// Warnings accumulated for a record that may still succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessState {
    pub stage: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub error: String,
    pub field: String,
    pub value: String,
    pub message: String,
    pub priority: String,
}

impl SuccessState {
    pub fn from_warning(err: &ClassifiedError) -> Self {
        let LogEntry {
            stage,
            kind,
            error,
            field,
            value,
            message,
            priority,
            ..
        } = LogEntry::failure(String::new(), err);
        Self {
            stage,
            kind,
            error,
            field,
            value,
            message,
            priority,
        }
    }

    /// Fold a later state into this one.
    ///
    /// `message` and `value` are newline-joined; every other column keeps
    /// the first state's value.
    pub fn merge(&mut self, later: SuccessState) {
        self.message = format!("{}\n{}", self.message, later.message);
        self.value = format!("{}\n{}", self.value, later.value);
    }
}

// ---------------------------------------------------------------------------
// RecordState
// ---------------------------------------------------------------------------

/// One element of the per-record state dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordState {
    pub recid: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// `created`, `updated`, `skipped` or `failed`.
    pub action: String,
    #[serde(default)]
    pub updated: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// `field`, or `field subfield: code` when a subfield is known.
pub fn render_field(field: Option<&str>, subfield: Option<&str>) -> String {
    match (field, subfield.filter(|s| !s.is_empty())) {
        (Some(field), Some(sub)) => format!("{field} subfield: {sub}"),
        (None, Some(sub)) => format!("subfield: {sub}"),
        (Some(field), None) => field.to_string(),
        (None, None) => String::new(),
    }
}

/// Strings verbatim, everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
