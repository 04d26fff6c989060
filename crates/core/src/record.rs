//! Legacy input records and the intermediate structured form.
//!
//! A [`RawLegacyRecord`] is one element of an extracted dump file. Its
//! [`Revision`]s are timestamped snapshots of the legacy field data; the
//! resolver turns the latest one into a [`StructuredRecord`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ClassifiedError;
use crate::types::{parse_timestamp, recid_string, Timestamp};

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// One historical snapshot of a legacy record.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub timestamp: Timestamp,
    /// Legacy field tag (e.g. `245__a`) to value.
    pub fields: Map<String, Value>,
}

/// A legacy record as read from a dump file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLegacyRecord {
    pub recid: String,
    pub revisions: Vec<Revision>,
}

impl RawLegacyRecord {
    /// Parse a dump element.
    ///
    /// Revisions are accepted either as `[timestamp, {fields}]` pairs or as
    /// `{"modification_datetime": .., "fields": {..}}` objects. A missing
    /// `revisions` key yields an empty list; the resolver rejects it.
    pub fn from_value(value: &Value) -> Result<Self, ClassifiedError> {
        let obj = value.as_object().ok_or_else(|| {
            ClassifiedError::unexpected_value("Legacy record must be a JSON object")
        })?;

        let recid = obj.get("recid").and_then(recid_string).ok_or_else(|| {
            ClassifiedError::missing_required_field("Legacy record has no usable recid")
                .with_field("recid")
        })?;

        let revisions = match obj.get("revisions") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| parse_revision(i, item))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.with_recid(recid.clone()))?,
            Some(other) => {
                return Err(ClassifiedError::unexpected_value("revisions must be an array")
                    .with_field("revisions")
                    .with_value(other.clone())
                    .with_recid(recid));
            }
        };

        Ok(Self { recid, revisions })
    }
}

fn parse_revision(index: usize, item: &Value) -> Result<Revision, ClassifiedError> {
    let (ts, fields) = match item {
        Value::Array(pair) if pair.len() == 2 => (&pair[0], &pair[1]),
        Value::Object(obj) => match (obj.get("modification_datetime"), obj.get("fields")) {
            (Some(ts), Some(fields)) => (ts, fields),
            _ => return Err(malformed_revision(index, item)),
        },
        _ => return Err(malformed_revision(index, item)),
    };

    let timestamp = parse_timestamp(ts).ok_or_else(|| {
        ClassifiedError::unexpected_value(format!("Revision {index} has an unparseable timestamp"))
            .with_field("revisions")
            .with_value(ts.clone())
    })?;
    let fields = fields
        .as_object()
        .cloned()
        .ok_or_else(|| malformed_revision(index, item))?;

    Ok(Revision { timestamp, fields })
}

fn malformed_revision(index: usize, item: &Value) -> ClassifiedError {
    ClassifiedError::unexpected_value(format!("Revision {index} is malformed"))
        .with_field("revisions")
        .with_value(item.clone())
}

// ---------------------------------------------------------------------------
// Structured (intermediate) form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affiliations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// Semantically normalised record built from the authoritative revision.
///
/// This is what the full-record dump stores, keyed by `legacy_recid`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub legacy_recid: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
    #[serde(default)]
    pub languages: Vec<String>,
    /// Normalised dates in encounter order. May contain duplicates; the
    /// transformer resolves them.
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    /// Original creation marker, when the legacy record carries one.
    pub created: Option<Timestamp>,
    pub submitter: Option<String>,
    #[serde(default)]
    pub restricted: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
