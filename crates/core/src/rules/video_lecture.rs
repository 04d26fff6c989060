//! Rule table for legacy video lecture records.

use chrono::{NaiveDate, NaiveDateTime};

use super::{FieldGroup, FieldRule, RuleRegistry};
use crate::error::{ClassifiedError, CoreError};
use crate::record::{Contributor, FileEntry, StructuredRecord};
use crate::types::parse_timestamp;

/// Master file system every migratable master path must live on.
pub const MASTER_FILE_SYSTEM: &str = "MediaArchive";

/// Tags whose content is dropped on purpose.
pub const IGNORED_TAGS: &[&str] = &[
    "003",
    "340__a", "340__d", "340__9", "340__k", "340__j", "340__8",
    "961__h", "961__l", "961__a", "961__b",
    "964__a",
    "916__a", "916__d", "916__e", "916__n", "916__s", "916__w", "916__y",
    "901__u",
    "583__a", "583__c", "583__z",
    "306__a", "336__a",
    "981__a",
    "960__a",
    "980__a", "980__b",
    "65027a", "650172", "65017a", "6531_9", "6531_a", "690C_a",
    "490__a", "490__v",
    "111__a", "111__9", "111__g", "111__z", "111__c",
    "084__a", "084__2",
    "518__r", "518__g", "518__h", "518__l",
    "970__a",
    "542__d", "542__g", "542__3",
    "540__a", "540__b", "540__u", "540__3",
    "962__n", "962__b",
    "088__9", "088__z", "088__a",
    "035__9", "035__a",
    "246__a", "246__i", "246__b", "246__n", "246__p",
    "500__a", "500__b", "500__9",
    "852__c", "852__b", "852__8", "852__h", "852__a", "852__x", "852__9",
    "260__c", "260__a", "260__b",
    "110__a",
    "700__m", "700__0", "100__0",
    "270__p",
    "595__a", "595__z",
    "710__5", "710__a", "710__g",
    "693__a", "693__e", "693__p", "693__s",
    "0248_a", "0248_p", "0248_q",
    "300__2", "300__b", "300__8", "300__a",
    "250__a",
    "240__a", "337__a",
    "963__a",
    "8564_8", "8564_s",
];

/// Build the registry for video lecture records.
pub fn video_lecture_rules() -> Result<RuleRegistry, CoreError> {
    let rules: Vec<Box<dyn FieldRule>> = vec![
        Box::new(LegacyRecid),
        Box::new(Title),
        Box::new(Description),
        Box::new(Languages),
        Box::new(ContributorRule {
            field: "100__",
            subfields: &["a", "u", "9"],
            name: "a",
            affiliation: "u",
            role: None,
            default_role: None,
        }),
        Box::new(ContributorRule {
            field: "700__",
            subfields: &["a", "u", "e", "9"],
            name: "a",
            affiliation: "u",
            role: Some("e"),
            default_role: None,
        }),
        Box::new(ContributorRule {
            field: "906__",
            subfields: &["p", "u"],
            name: "p",
            affiliation: "u",
            role: None,
            default_role: Some("Speaker"),
        }),
        Box::new(DateRule {
            field: "269__",
            subfields: &["a", "b", "c"],
            dates: &["c"],
            expected: &[("a", "Geneva"), ("b", "CERN")],
        }),
        Box::new(DateRule {
            field: "518__",
            subfields: &["a", "d"],
            dates: &["d", "a"],
            expected: &[],
        }),
        Box::new(CreationDate),
        Box::new(FileRule {
            field: "8567_",
            subfields: &["u", "y", "2"],
            kind: None,
            system: Some("2"),
            default_kind: Some("master"),
            required_system: Some(MASTER_FILE_SYSTEM),
        }),
        Box::new(FileRule {
            field: "8564_",
            subfields: &["u", "y", "q", "x"],
            kind: Some("q"),
            system: Some("x"),
            default_kind: None,
            required_system: None,
        }),
        Box::new(Submitter { field: "859__" }),
        Box::new(Submitter { field: "8560_" }),
        Box::new(AccessRestriction),
    ];
    RuleRegistry::new(rules, IGNORED_TAGS.iter().copied())
}

// ---------------------------------------------------------------------------
// Identifiers and text
// ---------------------------------------------------------------------------

struct LegacyRecid;

impl FieldRule for LegacyRecid {
    fn field(&self) -> &'static str {
        "001"
    }

    fn subfields(&self) -> &'static [&'static str] {
        &[""]
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        if let Some(recid) = group.first_string("")? {
            if !recid.chars().all(|c| c.is_ascii_digit()) {
                return Err(group.unexpected("", "Legacy recid must be numeric", &recid.into()));
            }
            record.legacy_recid = Some(recid);
        }
        Ok(())
    }
}

struct Title;

impl FieldRule for Title {
    fn field(&self) -> &'static str {
        "245__"
    }

    fn subfields(&self) -> &'static [&'static str] {
        &["a"]
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        let mut titles: Vec<String> = group.strings("a")?.into_iter().filter(|t| !t.is_empty()).collect();
        titles.dedup();
        if titles.len() > 1 {
            return Err(group.unexpected("a", "Record has more than one title", &titles.into()));
        }
        record.title = titles.pop();
        Ok(())
    }
}

struct Description;

impl FieldRule for Description {
    fn field(&self) -> &'static str {
        "520__"
    }

    fn subfields(&self) -> &'static [&'static str] {
        &["a"]
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        let parts: Vec<String> = group.strings("a")?.into_iter().filter(|p| !p.is_empty()).collect();
        if !parts.is_empty() {
            record.description = Some(parts.join("\n"));
        }
        Ok(())
    }
}

struct Languages;

impl FieldRule for Languages {
    fn field(&self) -> &'static str {
        "041__"
    }

    fn subfields(&self) -> &'static [&'static str] {
        &["a"]
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        for lang in group.strings("a")? {
            let code = lang.to_lowercase();
            if code.is_empty() {
                continue;
            }
            if !(2..=3).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(group.unexpected("a", "Unrecognised language code", &lang.into()));
            }
            if !record.languages.contains(&code) {
                record.languages.push(code);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Contributors
// ---------------------------------------------------------------------------

/// Names with aligned affiliation and role subfields.
struct ContributorRule {
    field: &'static str,
    subfields: &'static [&'static str],
    name: &'static str,
    affiliation: &'static str,
    role: Option<&'static str>,
    default_role: Option<&'static str>,
}

impl FieldRule for ContributorRule {
    fn field(&self) -> &'static str {
        self.field
    }

    fn subfields(&self) -> &'static [&'static str] {
        self.subfields
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        for (i, name) in group.occurrences(self.name)? {
            let affiliations = group
                .string_at(self.affiliation, i)?
                .map(|a| {
                    a.split(';')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            let role = match self.role {
                Some(code) => group.string_at(code, i)?,
                None => None,
            }
            .or_else(|| self.default_role.map(str::to_string));

            let contributor = Contributor {
                name,
                affiliations,
                role,
            };
            if !record.contributors.contains(&contributor) {
                record.contributors.push(contributor);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Collects dates from `dates` subfields and checks fixed-value siblings.
struct DateRule {
    field: &'static str,
    subfields: &'static [&'static str],
    dates: &'static [&'static str],
    expected: &'static [(&'static str, &'static str)],
}

impl FieldRule for DateRule {
    fn field(&self) -> &'static str {
        self.field
    }

    fn subfields(&self) -> &'static [&'static str] {
        self.subfields
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        for (code, expected) in self.expected {
            for value in group.strings(code)? {
                if !value.is_empty() && value != *expected {
                    return Err(group.unexpected(
                        code,
                        format!("Expected {expected} in {}{code}", self.field),
                        &value.into(),
                    ));
                }
            }
        }
        for code in self.dates {
            for raw in group.strings(code)? {
                if raw.is_empty() {
                    continue;
                }
                let date = normalize_date(&raw)
                    .ok_or_else(|| group.unexpected(code, "Unparseable date", &raw.clone().into()))?;
                record.dates.push(date);
            }
        }
        Ok(())
    }
}

/// Normalise a legacy date to `YYYY-MM-DD`, or `YYYY` for year-only values.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() == 4 && raw.chars().all(|c| c.is_ascii_digit()) {
        return Some(raw.to_string());
    }
    for fmt in ["%Y-%m-%d", "%d %b %Y", "%d %B %Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date().format("%Y-%m-%d").to_string());
        }
    }
    None
}

struct CreationDate;

impl FieldRule for CreationDate {
    fn field(&self) -> &'static str {
        "961__"
    }

    // `c` is the legacy modification date; revisions already carry it.
    fn subfields(&self) -> &'static [&'static str] {
        &["x", "c"]
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        if let Some(value) = group.values("x").next() {
            let created = parse_timestamp(value)
                .ok_or_else(|| group.unexpected("x", "Unparseable creation date", value))?;
            record.created = Some(created);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Files, submitter, access
// ---------------------------------------------------------------------------

struct FileRule {
    field: &'static str,
    subfields: &'static [&'static str],
    kind: Option<&'static str>,
    system: Option<&'static str>,
    default_kind: Option<&'static str>,
    required_system: Option<&'static str>,
}

impl FieldRule for FileRule {
    fn field(&self) -> &'static str {
        self.field
    }

    fn subfields(&self) -> &'static [&'static str] {
        self.subfields
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        for (i, uri) in group.occurrences("u")? {
            let system = match self.system {
                Some(code) => group.string_at(code, i)?,
                None => None,
            };
            if let (Some(required), Some(sys)) = (self.required_system, system.as_deref()) {
                if sys != required {
                    return Err(ClassifiedError::manual_import_required(format!(
                        "File {uri} is stored on {sys}, not {required}"
                    ))
                    .with_field(self.field)
                    .with_subfield(self.system.unwrap_or_default())
                    .with_value(sys));
                }
            }
            let kind = match self.kind {
                Some(code) => group.string_at(code, i)?,
                None => None,
            }
            .or_else(|| self.default_kind.map(str::to_string));

            record.files.push(FileEntry {
                uri,
                description: group.string_at("y", i)?,
                kind,
                system,
            });
        }
        Ok(())
    }
}

struct Submitter {
    field: &'static str,
}

impl FieldRule for Submitter {
    fn field(&self) -> &'static str {
        self.field
    }

    fn subfields(&self) -> &'static [&'static str] {
        &["f"]
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        if let Some(email) = group.first_string("f")? {
            if !email.contains('@') {
                return Err(group.unexpected("f", "Submitter is not an email address", &email.into()));
            }
            record.submitter.get_or_insert(email.to_lowercase());
        }
        Ok(())
    }
}

/// Any access restriction marks the whole record as restricted.
struct AccessRestriction;

impl FieldRule for AccessRestriction {
    fn field(&self) -> &'static str {
        "5061_"
    }

    fn subfields(&self) -> &'static [&'static str] {
        &["a", "d", "f", "2", "5"]
    }

    fn apply(&self, group: &FieldGroup<'_>, record: &mut StructuredRecord) -> Result<(), ClassifiedError> {
        if self.subfields().iter().any(|code| group.has(code)) {
            record.restricted = true;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
