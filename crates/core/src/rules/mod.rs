//! Legacy field conversion rules.
//!
//! A [`RuleRegistry`] maps legacy *fields* (tag plus indicators, e.g.
//! `700__`) to [`FieldRule`] handlers, and keeps the allow-list of full
//! tags (e.g. `700__0`) that are deliberately dropped. Every tag found in a
//! revision is exactly one of: implemented by a rule, ignored, or unmapped.
//! Unmapped tags are data loss and surface as `LossyConversion` warnings.

pub mod video_lecture;

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::error::{ClassifiedError, CoreError};
use crate::record::StructuredRecord;

pub use video_lecture::video_lecture_rules;

// ---------------------------------------------------------------------------
// Tag handling
// ---------------------------------------------------------------------------

/// Split a legacy tag into `(field, subfield)`.
///
/// `245__a` -> (`245__`, `a`); control fields such as `001` have an empty
/// subfield code.
pub fn split_tag(tag: &str) -> (&str, &str) {
    if tag.len() > 5 && tag.is_char_boundary(5) {
        tag.split_at(5)
    } else {
        (tag, "")
    }
}

/// How the registry treats one legacy tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagDisposition {
    Implemented,
    Ignored,
    Unmapped,
}

// ---------------------------------------------------------------------------
// FieldGroup
// ---------------------------------------------------------------------------

/// All subfield values of one legacy field, as handed to a [`FieldRule`].
///
/// Array values are flattened into repeated occurrences; occurrence `i` of
/// one subfield lines up with occurrence `i` of its siblings. A `null`
/// inside an array keeps its slot so later occurrences stay aligned.
#[derive(Debug, Default)]
pub struct FieldGroup<'a> {
    field: &'a str,
    subfields: BTreeMap<&'a str, Vec<Option<&'a Value>>>,
}

impl<'a> FieldGroup<'a> {
    pub fn new(field: &'a str) -> Self {
        Self {
            field,
            subfields: BTreeMap::new(),
        }
    }

    pub fn field(&self) -> &str {
        self.field
    }

    pub fn push(&mut self, code: &'a str, value: &'a Value) {
        let slots = self.subfields.entry(code).or_default();
        match value {
            Value::Null => {}
            Value::Array(items) => slots.extend(items.iter().map(|v| Some(v).filter(|v| !v.is_null()))),
            other => slots.push(Some(other)),
        }
    }

    /// Non-null occurrences of a subfield.
    pub fn values(&self, code: &str) -> impl Iterator<Item = &'a Value> + '_ {
        self.slots(code).iter().flatten().copied()
    }

    pub fn has(&self, code: &str) -> bool {
        self.values(code).next().is_some()
    }

    /// All non-null occurrences of a subfield as trimmed strings. Numbers
    /// are stringified; anything else is an unexpected value.
    pub fn strings(&self, code: &str) -> Result<Vec<String>, ClassifiedError> {
        self.values(code).map(|v| self.as_string(code, v)).collect()
    }

    /// Non-empty occurrences of a subfield with their slot index, for
    /// walking sibling subfields in step via [`FieldGroup::string_at`].
    pub fn occurrences(&self, code: &str) -> Result<Vec<(usize, String)>, ClassifiedError> {
        let mut found = Vec::new();
        for (i, slot) in self.slots(code).iter().enumerate() {
            if let Some(v) = slot {
                let s = self.as_string(code, v)?;
                if !s.is_empty() {
                    found.push((i, s));
                }
            }
        }
        Ok(found)
    }

    /// Occurrence `index` of a subfield, if present and non-empty.
    pub fn string_at(&self, code: &str, index: usize) -> Result<Option<String>, ClassifiedError> {
        match self.slots(code).get(index) {
            Some(Some(v)) => self.as_string(code, v).map(|s| Some(s).filter(|s| !s.is_empty())),
            Some(None) | None => Ok(None),
        }
    }

    /// First non-empty occurrence of a subfield.
    pub fn first_string(&self, code: &str) -> Result<Option<String>, ClassifiedError> {
        Ok(self.strings(code)?.into_iter().find(|s| !s.is_empty()))
    }

    fn slots(&self, code: &str) -> &[Option<&'a Value>] {
        self.subfields.get(code).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Build an `UnexpectedValue` error pointing at this field.
    pub fn unexpected(&self, code: &str, message: impl Into<String>, value: &Value) -> ClassifiedError {
        let err = ClassifiedError::unexpected_value(message)
            .with_field(self.field)
            .with_value(value.clone());
        if code.is_empty() {
            err
        } else {
            err.with_subfield(code)
        }
    }

    fn as_string(&self, code: &str, value: &Value) -> Result<String, ClassifiedError> {
        match value {
            Value::String(s) => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(self.unexpected(code, "Expected a text value", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldRule
// ---------------------------------------------------------------------------

/// Converts one legacy field into part of a [`StructuredRecord`].
pub trait FieldRule: Send + Sync {
    /// Field key this rule handles (`245__`, `001`, ...).
    fn field(&self) -> &'static str;

    /// Subfield codes this rule consumes. Control fields use `""`.
    fn subfields(&self) -> &'static [&'static str];

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError>;
}

// ---------------------------------------------------------------------------
// RuleRegistry
// ---------------------------------------------------------------------------

/// Output of [`RuleRegistry::convert`]: the structured record plus every
/// non-fatal warning collected along the way.
#[derive(Debug, Clone, Default)]
pub struct Conversion {
    pub record: StructuredRecord,
    pub warnings: Vec<ClassifiedError>,
}

pub struct RuleRegistry {
    rules: BTreeMap<&'static str, Box<dyn FieldRule>>,
    ignored: BTreeSet<String>,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .field("ignored", &self.ignored.len())
            .finish()
    }
}

impl RuleRegistry {
    /// Build a registry, rejecting duplicate fields and tags that are both
    /// implemented and ignored.
    pub fn new<'s>(
        rules: Vec<Box<dyn FieldRule>>,
        ignored: impl IntoIterator<Item = &'s str>,
    ) -> Result<Self, CoreError> {
        let ignored: BTreeSet<String> = ignored.into_iter().map(str::to_string).collect();
        let mut by_field: BTreeMap<&'static str, Box<dyn FieldRule>> = BTreeMap::new();

        for rule in rules {
            let field = rule.field();
            for code in rule.subfields() {
                let tag = format!("{field}{code}");
                if ignored.contains(&tag) {
                    return Err(CoreError::Validation(format!(
                        "Legacy tag {tag} is both implemented and ignored"
                    )));
                }
            }
            if by_field.insert(field, rule).is_some() {
                return Err(CoreError::Validation(format!(
                    "Legacy field {field} has more than one rule"
                )));
            }
        }

        Ok(Self {
            rules: by_field,
            ignored,
        })
    }

    pub fn disposition(&self, tag: &str) -> TagDisposition {
        if self.ignored.contains(tag) {
            return TagDisposition::Ignored;
        }
        let (field, code) = split_tag(tag);
        match self.rules.get(field) {
            Some(rule) if rule.subfields().iter().any(|c| *c == code) => TagDisposition::Implemented,
            _ => TagDisposition::Unmapped,
        }
    }

    /// Every full tag some rule consumes, sorted.
    pub fn implemented_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .rules
            .values()
            .flat_map(|rule| rule.subfields().iter().map(move |code| format!("{}{code}", rule.field())))
            .collect();
        tags.sort();
        tags
    }

    pub fn ignored_tags(&self) -> impl Iterator<Item = &str> {
        self.ignored.iter().map(String::as_str)
    }

    /// Apply the rule set to one revision's field mapping.
    ///
    /// Fields are applied in field-key order so that repeated values (such
    /// as dates spread across `269__` and `518__`) accumulate
    /// deterministically. The first fatal rule error aborts the record.
    pub fn convert(&self, fields: &Map<String, Value>) -> Result<Conversion, ClassifiedError> {
        let mut groups: BTreeMap<&str, FieldGroup<'_>> = BTreeMap::new();
        let mut warnings = Vec::new();

        for (tag, value) in fields {
            match self.disposition(tag) {
                TagDisposition::Ignored => {}
                TagDisposition::Unmapped => warnings.push(ClassifiedError::lossy(tag.as_str())),
                TagDisposition::Implemented => {
                    let (field, code) = split_tag(tag);
                    groups
                        .entry(field)
                        .or_insert_with(|| FieldGroup::new(field))
                        .push(code, value);
                }
            }
        }

        let mut record = StructuredRecord::default();
        for (field, group) in &groups {
            if let Some(rule) = self.rules.get(*field) {
                rule.apply(group, &mut record)?;
            }
        }

        Ok(Conversion { record, warnings })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    struct Title;

    impl FieldRule for Title {
        fn field(&self) -> &'static str {
            "245__"
        }

        fn subfields(&self) -> &'static [&'static str] {
            &["a"]
        }

        fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
            record.title = group.first_string("a")?;
            Ok(())
        }
    }

    fn registry() -> RuleRegistry {
        RuleRegistry::new(vec![Box::new(Title)], ["245__b"]).unwrap()
    }

    // -- split_tag --------------------------------------------------------

    #[test]
    fn split_data_and_control_tags() {
        assert_eq!(split_tag("245__a"), ("245__", "a"));
        assert_eq!(split_tag("001"), ("001", ""));
        assert_eq!(split_tag("8564_u"), ("8564_", "u"));
    }

    // -- registry construction -------------------------------------------

    #[test]
    fn overlapping_declarations_rejected() {
        let err = RuleRegistry::new(vec![Box::new(Title)], ["245__a"]).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("245__a"));
    }

    #[test]
    fn duplicate_field_rejected() {
        let err = RuleRegistry::new(vec![Box::new(Title), Box::new(Title)], []).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn dispositions() {
        let reg = registry();
        assert_eq!(reg.disposition("245__a"), TagDisposition::Implemented);
        assert_eq!(reg.disposition("245__b"), TagDisposition::Ignored);
        assert_eq!(reg.disposition("245__c"), TagDisposition::Unmapped);
        assert_eq!(reg.disposition("999__a"), TagDisposition::Unmapped);
        assert_eq!(reg.implemented_tags(), vec!["245__a".to_string()]);
    }

    // -- convert ----------------------------------------------------------

    #[test]
    fn unmapped_tags_become_warnings() {
        let fields = json!({"245__a": "Talk", "245__b": "dropped", "595__a": "note", "999__z": 1});
        let conv = registry().convert(fields.as_object().unwrap()).unwrap();
        assert_eq!(conv.record.title.as_deref(), Some("Talk"));
        let tags: Vec<_> = conv
            .warnings
            .iter()
            .map(|w| w.details().field.clone().unwrap())
            .collect();
        assert_eq!(tags, vec!["595__a", "999__z"]);
        assert!(conv.warnings.iter().all(|w| !w.is_fatal()));
    }

    #[test]
    fn array_values_are_occurrences() {
        let value = json!(["x", null, "y"]);
        let mut group = FieldGroup::new("700__");
        group.push("a", &value);
        assert_eq!(group.strings("a").unwrap(), vec!["x", "y"]);
        assert!(group.string_at("a", 1).unwrap().is_none());
        assert_eq!(group.string_at("a", 2).unwrap().as_deref(), Some("y"));
        assert!(group.string_at("a", 5).unwrap().is_none());
    }

    /// A null slot in one subfield does not shift its siblings.
    #[test]
    fn null_occurrences_keep_alignment() {
        let names = json!(["Alpha", null, "Gamma"]);
        let affiliations = json!([null, "CERN", "EPFL"]);
        let mut group = FieldGroup::new("700__");
        group.push("a", &names);
        group.push("u", &affiliations);

        let pairs: Vec<_> = group
            .occurrences("a")
            .unwrap()
            .into_iter()
            .map(|(i, name)| (name, group.string_at("u", i).unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Alpha".to_string(), None),
                ("Gamma".to_string(), Some("EPFL".to_string())),
            ]
        );
        assert!(group.has("u"));
    }

    #[test]
    fn non_text_value_is_unexpected() {
        let value = json!({"nested": true});
        let mut group = FieldGroup::new("245__");
        group.push("a", &value);
        let err = group.strings("a").unwrap_err();
        assert_matches!(err, ClassifiedError::UnexpectedValue(ref d)
            if d.field.as_deref() == Some("245__") && d.subfield.as_deref() == Some("a"));
    }
}
