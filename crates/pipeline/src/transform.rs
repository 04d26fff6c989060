//! The transform stage: raw dump element to [`LoadEntry`].

use serde_json::Value;

use marcmig_core::record::StructuredRecord;
use marcmig_core::rules::video_lecture_rules;
use marcmig_core::{ClassifiedError, RawLegacyRecord, RecordTransformer, RevisionResolver, TransformOptions};

use crate::error::PipelineError;
use crate::load::LoadEntry;

/// Output of a successful transform.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub entry: LoadEntry,
    /// Intermediate form written to the full-record dump.
    pub structured: StructuredRecord,
    /// Non-fatal findings to stage as success state.
    pub warnings: Vec<ClassifiedError>,
}

pub trait Transform: Send + Sync {
    fn transform(&self, raw: &Value) -> Result<Transformed, ClassifiedError>;
}

/// Resolver plus transformer over the video lecture rule table.
#[derive(Debug)]
pub struct LegacyRecordTransform {
    resolver: RevisionResolver,
    transformer: RecordTransformer,
}

impl LegacyRecordTransform {
    pub fn new(resolver: RevisionResolver, options: TransformOptions) -> Self {
        Self {
            resolver,
            transformer: RecordTransformer::new(options),
        }
    }

    /// Build from a stream's `transform` configuration block.
    pub fn from_config(config: &Value) -> Result<Self, PipelineError> {
        let options: TransformOptions = crate::config::stage_config(config)?;
        Ok(Self::new(RevisionResolver::new(video_lecture_rules()?), options))
    }
}

impl Transform for LegacyRecordTransform {
    fn transform(&self, raw: &Value) -> Result<Transformed, ClassifiedError> {
        let raw = RawLegacyRecord::from_value(raw)?;
        let resolved = self.resolver.resolve(&raw)?;
        let output = self.transformer.transform(&raw, &resolved)?;

        let legacy_recid = resolved
            .legacy_recid()
            .map(str::to_string)
            .unwrap_or_else(|| raw.recid.clone());
        let mut warnings = resolved.warnings;
        warnings.extend(output.warnings);

        Ok(Transformed {
            entry: LoadEntry {
                legacy_recid,
                record: output.record,
            },
            structured: resolved.structured,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn warnings_from_both_stages_are_merged() {
        let transform = LegacyRecordTransform::from_config(&json!({"warn_on_collapsed_dates": true})).unwrap();
        let out = transform
            .transform(&json!({
                "recid": 21,
                "revisions": [[1, {"245__a": "T", "269__c": "2010", "518__d": "2011-01-01", "777__a": "x"}]]
            }))
            .unwrap();
        assert_eq!(out.warnings.len(), 2);
        assert_eq!(out.entry.legacy_recid, "21");
        assert_eq!(out.entry.parent_id(), "21-parent");
    }

    #[test]
    fn null_config_uses_defaults() {
        assert!(LegacyRecordTransform::from_config(&Value::Null).is_ok());
    }

    #[test]
    fn unknown_option_rejected() {
        assert_matches!(
            LegacyRecordTransform::from_config(&json!({"collapse": "loudly"})),
            Err(PipelineError::Config(_))
        );
    }

    #[test]
    fn failures_are_classified() {
        let transform = LegacyRecordTransform::from_config(&Value::Null).unwrap();
        assert_matches!(
            transform.transform(&json!({"recid": 22, "revisions": []})),
            Err(ClassifiedError::MissingRequiredField(_))
        );
    }
}
