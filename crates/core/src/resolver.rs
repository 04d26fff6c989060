//! Revision resolution.
//!
//! Picks the authoritative revision of a legacy record and converts its
//! field mapping into a [`StructuredRecord`] through the rule registry.

use crate::error::ClassifiedError;
use crate::record::{RawLegacyRecord, Revision, StructuredRecord};
use crate::rules::RuleRegistry;
use crate::types::Timestamp;

/// The authoritative revision of one record, converted.
#[derive(Debug, Clone)]
pub struct ResolvedRecord {
    /// Timestamp of the selected revision.
    pub timestamp: Timestamp,
    pub structured: StructuredRecord,
    /// Non-fatal findings. A record with warnings is migrated but degraded.
    pub warnings: Vec<ClassifiedError>,
}

impl ResolvedRecord {
    pub fn is_lossy(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Key used for the full-record dump.
    pub fn legacy_recid(&self) -> Option<&str> {
        self.structured.legacy_recid.as_deref()
    }
}

/// Select the revision with the greatest timestamp.
///
/// Ties go to the revision seen last, since dumps are append-ordered.
pub fn latest_revision(revisions: &[Revision]) -> Option<&Revision> {
    // `max_by_key` already returns the last of several equal maxima.
    revisions.iter().max_by_key(|rev| rev.timestamp)
}

#[derive(Debug)]
pub struct RevisionResolver {
    rules: RuleRegistry,
}

impl RevisionResolver {
    pub fn new(rules: RuleRegistry) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn resolve(&self, raw: &RawLegacyRecord) -> Result<ResolvedRecord, ClassifiedError> {
        let revision = latest_revision(&raw.revisions).ok_or_else(|| {
            ClassifiedError::missing_required_field(format!("Record {} has no revisions", raw.recid))
                .with_field("revisions")
                .with_recid(raw.recid.clone())
        })?;

        let conversion = self
            .rules
            .convert(&revision.fields)
            .map_err(|e| e.with_recid(raw.recid.clone()))?;

        let mut structured = conversion.record;
        if structured.legacy_recid.is_none() {
            structured.legacy_recid = Some(raw.recid.clone());
        }
        let warnings: Vec<ClassifiedError> = conversion
            .warnings
            .into_iter()
            .map(|w| w.with_recid(raw.recid.clone()))
            .collect();

        if !warnings.is_empty() {
            tracing::debug!(recid = %raw.recid, warnings = warnings.len(), "Lossy conversion");
        }

        Ok(ResolvedRecord {
            timestamp: revision.timestamp,
            structured,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::video_lecture_rules;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn resolver() -> RevisionResolver {
        RevisionResolver::new(video_lecture_rules().unwrap())
    }

    fn raw(value: serde_json::Value) -> RawLegacyRecord {
        RawLegacyRecord::from_value(&value).unwrap()
    }

    #[test]
    fn picks_maximum_timestamp() {
        let r = raw(json!({
            "recid": 7,
            "revisions": [[300, {"245__a": "Newest"}], [100, {"245__a": "Talk"}], [200, {"245__a": "Talk v2"}]]
        }));
        let resolved = resolver().resolve(&r).unwrap();
        assert_eq!(resolved.timestamp.timestamp(), 300);
        assert_eq!(resolved.structured.title.as_deref(), Some("Newest"));
    }

    #[test]
    fn ties_go_to_last_seen() {
        let r = raw(json!({
            "recid": 7,
            "revisions": [[200, {"245__a": "First"}], [100, {"245__a": "Old"}], [200, {"245__a": "Second"}]]
        }));
        let resolved = resolver().resolve(&r).unwrap();
        assert_eq!(resolved.structured.title.as_deref(), Some("Second"));
    }

    #[test]
    fn empty_revisions_is_missing_required_field() {
        let r = raw(json!({"recid": 7, "revisions": []}));
        let err = resolver().resolve(&r).unwrap_err();
        assert_matches!(err, ClassifiedError::MissingRequiredField(ref d)
            if d.recid.as_deref() == Some("7") && d.stage.as_deref() == Some("transform"));
    }

    #[test]
    fn unmapped_tags_collected_not_fatal() {
        let r = raw(json!({
            "recid": 8,
            "revisions": [[1, {"245__a": "T", "595__a": "ignored", "777__a": "x", "778__b": "y"}]]
        }));
        let resolved = resolver().resolve(&r).unwrap();
        assert!(resolved.is_lossy());
        assert_eq!(resolved.warnings.len(), 2);
        assert!(resolved
            .warnings
            .iter()
            .all(|w| w.details().recid.as_deref() == Some("8")));
    }

    #[test]
    fn legacy_recid_falls_back_to_raw_recid() {
        let r = raw(json!({"recid": 11, "revisions": [[1, {"245__a": "T"}]]}));
        assert_eq!(resolver().resolve(&r).unwrap().legacy_recid(), Some("11"));
    }

    #[test]
    fn rule_errors_carry_recid() {
        let r = raw(json!({"recid": 12, "revisions": [[1, {"041__a": "klingon"}]]}));
        let err = resolver().resolve(&r).unwrap_err();
        assert_eq!(err.details().recid.as_deref(), Some("12"));
    }
}
