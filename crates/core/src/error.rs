//! Error types shared by every migration stage.
//!
//! [`ClassifiedError`] is the closed set of per-record failure kinds. The
//! stream runner matches on it to decide whether a record is logged as a
//! degraded success or as a failure; it never aborts a stream.
//!
//! [`CoreError`] covers misuse of the core API itself (e.g. an invalid
//! rule registry) and is not tied to any single record.

use std::fmt;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Stage and priority names
// ---------------------------------------------------------------------------

pub const STAGE_EXTRACT: &str = "extract";
pub const STAGE_TRANSFORM: &str = "transform";
pub const STAGE_LOAD: &str = "load";
pub const STAGE_STREAM: &str = "stream";

pub const PRIORITY_WARNING: &str = "warning";
pub const PRIORITY_CRITICAL: &str = "critical";

// ---------------------------------------------------------------------------
// Error details
// ---------------------------------------------------------------------------

/// Structured payload carried by every [`ClassifiedError`].
///
/// All fields are optional: rules fill in what they know, and the
/// migration logger renders missing values as empty columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorDetails {
    pub message: Option<String>,
    pub field: Option<String>,
    pub subfield: Option<String>,
    pub value: Option<Value>,
    pub stage: Option<String>,
    pub recid: Option<String>,
    pub priority: Option<String>,
}

impl ErrorDetails {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            stage: Some(STAGE_TRANSFORM.to_string()),
            ..Default::default()
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.field) {
            (Some(msg), _) => f.write_str(msg),
            (None, Some(field)) => write!(f, "field {field}"),
            (None, None) => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// ClassifiedError
// ---------------------------------------------------------------------------

/// A per-record failure the pipeline knows how to classify.
///
/// `LossyConversion` is informational: the record is still migrated but
/// logged as degraded. Every other kind is fatal for the current record
/// only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifiedError {
    #[error("[Migration rule missing] {0}")]
    LossyConversion(ErrorDetails),

    #[error("[UNEXPECTED INPUT VALUE] {0}")]
    UnexpectedValue(ErrorDetails),

    #[error("[MISSING REQUIRED FIELD] {0}")]
    MissingRequiredField(ErrorDetails),

    #[error("[MANUAL IMPORT REQUIRED] {0}")]
    ManualImportRequired(ErrorDetails),

    #[error("[Restricted file detected] {0}")]
    RestrictedFileDetected(ErrorDetails),
}

impl ClassifiedError {
    /// A legacy tag with no conversion rule. Always a warning.
    pub fn lossy(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self::LossyConversion(ErrorDetails {
            message: Some(format!("No migration rule for legacy field {tag}")),
            field: Some(tag),
            stage: Some(STAGE_TRANSFORM.to_string()),
            priority: Some(PRIORITY_WARNING.to_string()),
            ..Default::default()
        })
    }

    pub fn unexpected_value(message: impl Into<String>) -> Self {
        Self::UnexpectedValue(ErrorDetails::new(message))
    }

    pub fn missing_required_field(message: impl Into<String>) -> Self {
        Self::MissingRequiredField(ErrorDetails::new(message))
    }

    pub fn manual_import_required(message: impl Into<String>) -> Self {
        Self::ManualImportRequired(ErrorDetails::new(message))
    }

    pub fn restricted_file_detected(message: impl Into<String>) -> Self {
        Self::RestrictedFileDetected(ErrorDetails::new(message))
    }

    pub fn details(&self) -> &ErrorDetails {
        match self {
            Self::LossyConversion(d)
            | Self::UnexpectedValue(d)
            | Self::MissingRequiredField(d)
            | Self::ManualImportRequired(d)
            | Self::RestrictedFileDetected(d) => d,
        }
    }

    pub fn details_mut(&mut self) -> &mut ErrorDetails {
        match self {
            Self::LossyConversion(d)
            | Self::UnexpectedValue(d)
            | Self::MissingRequiredField(d)
            | Self::ManualImportRequired(d)
            | Self::RestrictedFileDetected(d) => d,
        }
    }

    /// Type name written to the `type` column of the migration log.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::LossyConversion(_) => "LossyConversion",
            Self::UnexpectedValue(_) => "UnexpectedValue",
            Self::MissingRequiredField(_) => "MissingRequiredField",
            Self::ManualImportRequired(_) => "ManualImportRequired",
            Self::RestrictedFileDetected(_) => "RestrictedFileDetected",
        }
    }

    /// Human-readable category written to the `error` column.
    pub fn description(&self) -> &'static str {
        match self {
            Self::LossyConversion(_) => "[Migration rule missing]",
            Self::UnexpectedValue(_) => "[UNEXPECTED INPUT VALUE]",
            Self::MissingRequiredField(_) => "[MISSING REQUIRED FIELD]",
            Self::ManualImportRequired(_) => "[MANUAL IMPORT REQUIRED]",
            Self::RestrictedFileDetected(_) => "[Restricted file detected]",
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::LossyConversion(_))
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.details_mut().field = Some(field.into());
        self
    }

    pub fn with_subfield(mut self, subfield: impl Into<String>) -> Self {
        self.details_mut().subfield = Some(subfield.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.details_mut().value = Some(value.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.details_mut().stage = Some(stage.into());
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.details_mut().priority = Some(priority.into());
        self
    }

    /// Attach the record id unless a more specific one is already set.
    pub fn with_recid(mut self, recid: impl Into<String>) -> Self {
        let details = self.details_mut();
        if details.recid.is_none() {
            details.recid = Some(recid.into());
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossy_is_the_only_non_fatal_kind() {
        assert!(!ClassifiedError::lossy("999__a").is_fatal());
        assert!(ClassifiedError::unexpected_value("x").is_fatal());
        assert!(ClassifiedError::missing_required_field("x").is_fatal());
        assert!(ClassifiedError::manual_import_required("x").is_fatal());
        assert!(ClassifiedError::restricted_file_detected("x").is_fatal());
    }

    #[test]
    fn lossy_carries_tag_and_warning_priority() {
        let err = ClassifiedError::lossy("595__a");
        let d = err.details();
        assert_eq!(d.field.as_deref(), Some("595__a"));
        assert_eq!(d.priority.as_deref(), Some(PRIORITY_WARNING));
        assert_eq!(d.stage.as_deref(), Some(STAGE_TRANSFORM));
        assert_eq!(err.type_name(), "LossyConversion");
    }

    #[test]
    fn display_prefixes_description() {
        let err = ClassifiedError::unexpected_value("No valid date found in record: 7.");
        assert_eq!(
            err.to_string(),
            "[UNEXPECTED INPUT VALUE] No valid date found in record: 7."
        );
        assert_eq!(err.description(), "[UNEXPECTED INPUT VALUE]");
    }

    #[test]
    fn builders_fill_details() {
        let err = ClassifiedError::unexpected_value("bad language")
            .with_field("041__")
            .with_subfield("a")
            .with_value("english!");
        let d = err.details();
        assert_eq!(d.field.as_deref(), Some("041__"));
        assert_eq!(d.subfield.as_deref(), Some("a"));
        assert_eq!(d.value, Some(Value::from("english!")));
    }

    #[test]
    fn with_recid_does_not_override_existing() {
        let err = ClassifiedError::missing_required_field("x")
            .with_recid("1")
            .with_recid("2");
        assert_eq!(err.details().recid.as_deref(), Some("1"));
    }
}
