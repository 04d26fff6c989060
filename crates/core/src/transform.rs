//! Record transformation into the target document shape.
//!
//! [`RecordTransformer`] turns a resolved legacy record into a
//! [`TargetRecord`]: timestamps, a sparse metadata mapping, the parent
//! envelope, and explicit [`Decision`]s for fields this version does not
//! decide yet.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{ClassifiedError, ErrorDetails, PRIORITY_WARNING, STAGE_TRANSFORM};
use crate::record::{RawLegacyRecord, StructuredRecord};
use crate::resolver::ResolvedRecord;
use crate::types::{today, Timestamp};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome for a target field.
///
/// `Deferred` means "let the loader or target system choose a default" and
/// is omitted from serialized output. `Absent` is known to be empty and
/// serializes as `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Decision<T> {
    Set(T),
    Absent,
    #[default]
    Deferred,
}

impl<T> Decision<T> {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred)
    }
}

impl<T: Serialize> Serialize for Decision<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Set(value) => value.serialize(serializer),
            Self::Absent | Self::Deferred => serializer.serialize_none(),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Decision<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Self::Set(value),
            None => Self::Absent,
        })
    }
}

// ---------------------------------------------------------------------------
// Target record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordJson {
    pub created: Timestamp,
    pub updated: Timestamp,
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Decision::is_deferred")]
    pub access: Decision<Value>,
    #[serde(default, skip_serializing_if = "Decision::is_deferred")]
    pub pids: Decision<Value>,
    #[serde(default, skip_serializing_if = "Decision::is_deferred")]
    pub files: Decision<Value>,
    #[serde(default, skip_serializing_if = "Decision::is_deferred")]
    pub custom_fields: Decision<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentJson {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentEnvelope {
    pub created: Timestamp,
    pub updated: Timestamp,
    pub json: ParentJson,
}

/// The envelope handed to the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub created: Timestamp,
    pub updated: Timestamp,
    pub recid: String,
    pub json: RecordJson,
    pub parent: ParentEnvelope,
}

impl TargetRecord {
    /// Identity the loader upserts on.
    pub fn parent_id(&self) -> &str {
        &self.parent.json.id
    }
}

/// Deterministic parent id for a legacy recid.
pub fn parent_id(recid: &str) -> String {
    format!("{recid}-parent")
}

// ---------------------------------------------------------------------------
// Transformer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformOptions {
    /// Emit a `LossyConversion` warning when several distinct dates are
    /// collapsed into one. Off by default to keep historical log output.
    #[serde(default)]
    pub warn_on_collapsed_dates: bool,
}

#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub record: TargetRecord,
    /// Non-fatal findings raised by the transformer itself.
    pub warnings: Vec<ClassifiedError>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordTransformer {
    options: TransformOptions,
}

impl RecordTransformer {
    pub fn new(options: TransformOptions) -> Self {
        Self { options }
    }

    pub fn transform(
        &self,
        raw: &RawLegacyRecord,
        resolved: &ResolvedRecord,
    ) -> Result<TransformOutput, ClassifiedError> {
        let structured = &resolved.structured;
        let recid = raw.recid.clone();
        let mut warnings = Vec::new();

        if structured.restricted && !structured.files.is_empty() {
            return Err(ClassifiedError::restricted_file_detected(format!(
                "Record {recid} has files under an access restriction"
            ))
            .with_field("5061_")
            .with_recid(recid));
        }

        let metadata = self
            .metadata(structured, &recid, &mut warnings)
            .map_err(|e| e.with_recid(recid.clone()))?;

        let created = structured.created.unwrap_or_else(today);
        let updated = resolved.timestamp;

        let record = TargetRecord {
            created,
            updated,
            json: RecordJson {
                created,
                updated,
                metadata,
                access: Decision::Deferred,
                pids: Decision::Deferred,
                files: Decision::Deferred,
                custom_fields: Decision::Deferred,
            },
            parent: ParentEnvelope {
                created,
                updated,
                json: ParentJson {
                    id: parent_id(&recid),
                },
            },
            recid,
        };

        Ok(TransformOutput { record, warnings })
    }

    fn metadata(
        &self,
        structured: &StructuredRecord,
        recid: &str,
        warnings: &mut Vec<ClassifiedError>,
    ) -> Result<Map<String, Value>, ClassifiedError> {
        let title = structured.title.clone().ok_or_else(|| {
            ClassifiedError::missing_required_field(format!("Record {recid} has no title"))
                .with_field("245__")
                .with_subfield("a")
        })?;
        let description = structured
            .description
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| title.clone());
        let date = self.resolve_date(&structured.dates, recid, warnings)?;

        let mut metadata = Map::new();
        metadata.insert("title".into(), Value::String(title));
        metadata.insert("description".into(), Value::String(description));
        metadata.insert("contributors".into(), to_json(&structured.contributors)?);
        metadata.insert("languages".into(), to_json(&structured.languages)?);
        metadata.insert("date".into(), Value::String(date));

        Ok(drop_falsy(metadata))
    }

    /// Pick one date out of every date the record carries.
    ///
    /// One distinct value is used as is; several collapse to the first
    /// encountered; none is an error.
    fn resolve_date(
        &self,
        dates: &[String],
        recid: &str,
        warnings: &mut Vec<ClassifiedError>,
    ) -> Result<String, ClassifiedError> {
        let mut distinct: Vec<&String> = Vec::new();
        for date in dates {
            if !date.is_empty() && !distinct.contains(&date) {
                distinct.push(date);
            }
        }

        match distinct.as_slice() {
            [] => Err(ClassifiedError::unexpected_value(format!(
                "No valid date found in record: {recid}."
            ))),
            [only] => Ok((*only).clone()),
            [first, ..] => {
                if self.options.warn_on_collapsed_dates {
                    warnings.push(ClassifiedError::LossyConversion(ErrorDetails {
                        message: Some(format!(
                            "Collapsed {} distinct dates into {first}",
                            distinct.len()
                        )),
                        field: Some("date".into()),
                        value: Some(Value::from(
                            distinct.iter().map(|d| d.as_str()).collect::<Vec<_>>(),
                        )),
                        stage: Some(STAGE_TRANSFORM.into()),
                        recid: Some(recid.to_string()),
                        priority: Some(PRIORITY_WARNING.into()),
                        ..Default::default()
                    }));
                }
                Ok((*first).clone())
            }
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ClassifiedError> {
    serde_json::to_value(value)
        .map_err(|e| ClassifiedError::unexpected_value(format!("Unserializable value: {e}")))
}

/// Python-style truthiness: null, `false`, zero, and empty strings,
/// arrays or objects are all falsy.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Remove every falsy entry. Absent optional fields must not reach the
/// target as empty strings.
pub fn drop_falsy(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().filter(|(_, v)| !is_falsy(v)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::RevisionResolver;
    use crate::rules::video_lecture_rules;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn run(input: Value, options: TransformOptions) -> Result<TransformOutput, ClassifiedError> {
        let raw = RawLegacyRecord::from_value(&input).unwrap();
        let resolved = RevisionResolver::new(video_lecture_rules().unwrap()).resolve(&raw)?;
        RecordTransformer::new(options).transform(&raw, &resolved)
    }

    fn ok(input: Value) -> TargetRecord {
        run(input, TransformOptions::default()).unwrap().record
    }

    // -- scenario ----------------------------------------------------------

    #[test]
    fn latest_revision_scenario() {
        let record = ok(json!({
            "recid": 7,
            "revisions": [
                [100, {"245__a": "Talk", "269__c": "2001-01-01"}],
                [200, {"245__a": "Talk v2", "269__c": "2001-01-01"}]
            ]
        }));
        assert_eq!(record.recid, "7");
        assert_eq!(record.json.metadata["title"], json!("Talk v2"));
        assert_eq!(record.updated.timestamp(), 200);
        assert_eq!(record.parent_id(), "7-parent");
        assert_eq!(record.parent.created, record.created);
        assert_eq!(record.parent.updated, record.updated);
    }

    // -- metadata ----------------------------------------------------------

    #[test]
    fn description_falls_back_to_title() {
        let record = ok(json!({"recid": 1, "revisions": [[1, {"245__a": "T", "269__c": "2000"}]]}));
        assert_eq!(record.json.metadata["description"], json!("T"));
    }

    #[test]
    fn metadata_is_sparse() {
        let record = ok(json!({"recid": 1, "revisions": [[1, {"245__a": "T", "269__c": "2000"}]]}));
        let keys: Vec<_> = record.json.metadata.keys().cloned().collect();
        assert_eq!(keys, vec!["date", "description", "title"]);
        assert!(record.json.metadata.values().all(|v| !is_falsy(v)));
    }

    #[test]
    fn missing_title_is_missing_required_field() {
        let err = run(json!({"recid": 2, "revisions": [[1, {"269__c": "2000"}]]}), Default::default())
            .unwrap_err();
        assert_matches!(err, ClassifiedError::MissingRequiredField(ref d)
            if d.recid.as_deref() == Some("2") && d.field.as_deref() == Some("245__"));
    }

    #[test]
    fn restricted_files_detected() {
        let err = run(
            json!({"recid": 3, "revisions": [[1, {
                "245__a": "T", "269__c": "2000", "5061_a": "CERN", "8564_u": "https://x/y.pdf"
            }]]}),
            Default::default(),
        )
        .unwrap_err();
        assert_matches!(err, ClassifiedError::RestrictedFileDetected(_));
    }

    #[test]
    fn falsy_values() {
        for v in [json!(null), json!(""), json!([]), json!({}), json!(false), json!(0), json!(0.0)] {
            assert!(is_falsy(&v), "{v} should be falsy");
        }
        for v in [json!("x"), json!([0]), json!({"a": null}), json!(true), json!(1)] {
            assert!(!is_falsy(&v), "{v} should be truthy");
        }
    }

    // -- dates -------------------------------------------------------------

    #[test]
    fn zero_dates_is_unexpected_value_without_field() {
        let err = run(json!({"recid": 4, "revisions": [[1, {"245__a": "T"}]]}), Default::default())
            .unwrap_err();
        assert_matches!(err, ClassifiedError::UnexpectedValue(ref d) if d.field.is_none());
        assert_eq!(err.details().message.as_deref(), Some("No valid date found in record: 4."));
        assert_eq!(err.description(), "[UNEXPECTED INPUT VALUE]");
    }

    #[test]
    fn duplicate_dates_collapse_silently() {
        let out = run(
            json!({"recid": 5, "revisions": [[1, {
                "245__a": "T", "269__c": "2010-05-12", "518__d": "2010-05-12T10:00:00"
            }]]}),
            Default::default(),
        )
        .unwrap();
        assert_eq!(out.record.json.metadata["date"], json!("2010-05-12"));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn distinct_dates_pick_first_without_warning_by_default() {
        let out = run(
            json!({"recid": 6, "revisions": [[1, {"245__a": "T", "269__c": "2010", "518__d": "2011-01-01"}]]}),
            Default::default(),
        )
        .unwrap();
        assert_eq!(out.record.json.metadata["date"], json!("2010"));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn distinct_dates_warn_when_enabled() {
        let out = run(
            json!({"recid": 6, "revisions": [[1, {"245__a": "T", "269__c": "2010", "518__d": "2011-01-01"}]]}),
            TransformOptions {
                warn_on_collapsed_dates: true,
            },
        )
        .unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert_matches!(out.warnings[0], ClassifiedError::LossyConversion(_));
    }

    // -- created / deferred ------------------------------------------------

    #[test]
    fn created_from_marker_or_today() {
        let with_marker = ok(json!({"recid": 1, "revisions": [[1, {
            "245__a": "T", "269__c": "2000", "961__x": "2005-06-07"
        }]]}));
        assert_eq!(with_marker.created.to_rfc3339(), "2005-06-07T00:00:00+00:00");

        let without = ok(json!({"recid": 1, "revisions": [[1, {"245__a": "T", "269__c": "2000"}]]}));
        assert_eq!(without.created, today());
    }

    #[test]
    fn deferred_fields_omitted_absent_fields_null() {
        let mut record = ok(json!({"recid": 1, "revisions": [[1, {"245__a": "T", "269__c": "2000"}]]}));
        record.json.access = Decision::Absent;
        let value = serde_json::to_value(&record).unwrap();
        let json = value["json"].as_object().unwrap();
        assert!(json.contains_key("access"));
        assert!(json["access"].is_null());
        assert!(!json.contains_key("pids"));
        assert!(!json.contains_key("custom_fields"));

        let back: TargetRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.json.access, Decision::Absent);
        assert_eq!(back.json.pids, Decision::Deferred);
    }
}
