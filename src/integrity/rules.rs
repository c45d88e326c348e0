//! Built-in validation rules.
//!
//! Each rule inspects one record (optionally against the whole dataset) and
//! reports at most one violation. Rules are grouped by the level that first
//! enables them.

use super::validation_config::ValidationLevel;
use crate::error::Result;
use crate::record::{Record, RecordSchema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationCategory {
    Structural,
    Content,
    Linguistic,
    Reference,
    Corruption,
}

/// Structured error codes. Healing eligibility and strategy lookup key off
/// these, never off message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationCode {
    MissingIdentifier,
    MissingSubgroups,
    EmptySubgroup,
    MissingField,
    InvalidCategory,
    InvalidSubCategory,
    InvalidRole,
    UnknownTag,
    DuplicateTag,
    MissingRoleForFinite,
    DuplicateEntry,
    InvalidCharacters,
    EncodingArtifact,
    SurroundingWhitespace,
    DuplicateIdentifier,
    RuleFailure,
}

impl ValidationCode {
    /// Codes that are healable regardless of severity.
    pub const HEALABLE: [ValidationCode; 8] = [
        ValidationCode::MissingRoleForFinite,
        ValidationCode::DuplicateEntry,
        ValidationCode::InvalidCharacters,
        ValidationCode::EncodingArtifact,
        ValidationCode::SurroundingWhitespace,
        ValidationCode::DuplicateTag,
        ValidationCode::UnknownTag,
        ValidationCode::EmptySubgroup,
    ];
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a rule reports when it finds a problem.
#[derive(Debug, Clone)]
pub struct Violation {
    pub code: ValidationCode,
    pub message: String,
    pub severity: ValidationSeverity,
    pub context: BTreeMap<String, String>,
}

impl Violation {
    pub fn new(code: ValidationCode, severity: ValidationSeverity, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }
}

/// A violation attributed to the rule that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub rule: String,
    pub code: ValidationCode,
    pub message: String,
    pub severity: ValidationSeverity,
    pub category: ValidationCategory,
    pub context: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn is_healable(&self) -> bool {
        ValidationCode::HEALABLE.contains(&self.code) || self.severity < ValidationSeverity::Critical
    }
}

pub type RuleCheck =
    Arc<dyn Fn(&Record, Option<&[Record]>, &RecordSchema) -> Result<Option<Violation>> + Send + Sync>;

#[derive(Clone)]
pub struct ValidationRule {
    pub name: String,
    pub level: ValidationLevel,
    pub category: ValidationCategory,
    pub check: RuleCheck,
}

impl ValidationRule {
    pub fn new<F>(
        name: impl Into<String>,
        level: ValidationLevel,
        category: ValidationCategory,
        check: F,
    ) -> Self
    where
        F: Fn(&Record, Option<&[Record]>, &RecordSchema) -> Result<Option<Violation>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            level,
            category,
            check: Arc::new(check),
        }
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("category", &self.category)
            .finish()
    }
}

pub fn default_rules() -> Vec<ValidationRule> {
    use ValidationCategory::*;
    use ValidationLevel::*;

    vec![
        ValidationRule::new("required_identifier", Basic, Structural, required_identifier),
        ValidationRule::new("required_subgroups", Basic, Structural, required_subgroups),
        ValidationRule::new("non_empty_entries", Basic, Structural, non_empty_entries),
        ValidationRule::new("required_entry_fields", Basic, Structural, required_entry_fields),
        ValidationRule::new("known_categories", Standard, Content, known_categories),
        ValidationRule::new("known_sub_categories", Standard, Content, known_sub_categories),
        ValidationRule::new("known_roles", Standard, Content, known_roles),
        ValidationRule::new("known_tags", Standard, Content, known_tags),
        ValidationRule::new("unique_tags", Standard, Content, unique_tags),
        ValidationRule::new("finite_role_required", Standard, Content, finite_role_required),
        ValidationRule::new("unique_forms", Standard, Linguistic, unique_forms),
        ValidationRule::new("valid_characters", Comprehensive, Linguistic, valid_characters),
        ValidationRule::new("encoding_artifacts", Comprehensive, Linguistic, encoding_artifacts),
        ValidationRule::new("trimmed_fields", Comprehensive, Linguistic, trimmed_fields),
        ValidationRule::new("unique_identifier", Strict, Reference, unique_identifier),
    ]
}

type RuleResult = Result<Option<Violation>>;

fn required_identifier(record: &Record, _: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    if record.id.trim().is_empty() {
        return Ok(Some(Violation::new(
            ValidationCode::MissingIdentifier,
            ValidationSeverity::Critical,
            "Missing record identifier",
        )));
    }
    Ok(None)
}

fn required_subgroups(record: &Record, _: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    if record.subgroups.is_empty() {
        return Ok(Some(Violation::new(
            ValidationCode::MissingSubgroups,
            ValidationSeverity::Critical,
            "Record has no sub-groups",
        )));
    }
    Ok(None)
}

fn non_empty_entries(record: &Record, _: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    let empty: Vec<usize> = record
        .subgroups
        .iter()
        .enumerate()
        .filter(|(_, g)| g.entries.is_empty())
        .map(|(i, _)| i)
        .collect();

    if empty.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        Violation::new(
            ValidationCode::EmptySubgroup,
            ValidationSeverity::High,
            "Sub-group has no entries",
        )
        .with_context("subgroups", format!("{:?}", empty)),
    ))
}

fn required_entry_fields(record: &Record, _: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    for (g, group) in record.subgroups.iter().enumerate() {
        for (e, entry) in group.entries.iter().enumerate() {
            let missing = if entry.category.trim().is_empty() {
                Some("category")
            } else if entry.sub_category.trim().is_empty() {
                Some("sub_category")
            } else if entry.value.trim().is_empty() {
                Some("value")
            } else {
                None
            };

            if let Some(field) = missing {
                return Ok(Some(
                    Violation::new(
                        ValidationCode::MissingField,
                        ValidationSeverity::High,
                        format!("Missing required field '{}'", field),
                    )
                    .with_context("subgroup", g)
                    .with_context("entry", e),
                ));
            }
        }
    }
    Ok(None)
}

fn known_categories(record: &Record, _: Option<&[Record]>, schema: &RecordSchema) -> RuleResult {
    let bad = record
        .subgroups
        .iter()
        .flat_map(|g| g.entries.iter())
        .find(|e| !schema.allows_category(&e.category));

    Ok(bad.map(|entry| {
        Violation::new(
            ValidationCode::InvalidCategory,
            ValidationSeverity::Medium,
            format!("Invalid category '{}'", entry.category),
        )
        .with_context("value", &entry.category)
    }))
}

fn known_sub_categories(record: &Record, _: Option<&[Record]>, schema: &RecordSchema) -> RuleResult {
    let bad = record
        .subgroups
        .iter()
        .flat_map(|g| g.entries.iter())
        .find(|e| !schema.allows_sub_category(&e.sub_category));

    Ok(bad.map(|entry| {
        Violation::new(
            ValidationCode::InvalidSubCategory,
            ValidationSeverity::Medium,
            format!("Invalid sub-category '{}'", entry.sub_category),
        )
        .with_context("value", &entry.sub_category)
    }))
}

fn known_roles(record: &Record, _: Option<&[Record]>, schema: &RecordSchema) -> RuleResult {
    let bad = record
        .subgroups
        .iter()
        .flat_map(|g| g.entries.iter())
        .filter_map(|e| e.role.as_deref())
        .find(|role| !schema.allows_role(role));

    Ok(bad.map(|role| {
        Violation::new(
            ValidationCode::InvalidRole,
            ValidationSeverity::Medium,
            format!("Invalid role '{}'", role),
        )
        .with_context("value", role)
    }))
}

fn known_tags(record: &Record, _: Option<&[Record]>, schema: &RecordSchema) -> RuleResult {
    let unknown: Vec<&str> = record
        .subgroups
        .iter()
        .flat_map(|g| g.tags.iter())
        .filter(|t| !schema.allows_tag(t))
        .map(String::as_str)
        .collect();

    if unknown.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        Violation::new(
            ValidationCode::UnknownTag,
            ValidationSeverity::Low,
            format!("Unknown region tag '{}'", unknown[0]),
        )
        .with_context("count", unknown.len()),
    ))
}

fn unique_tags(record: &Record, _: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    for (g, group) in record.subgroups.iter().enumerate() {
        let mut seen = HashSet::new();
        if let Some(dup) = group.tags.iter().find(|t| !seen.insert(t.as_str())) {
            return Ok(Some(
                Violation::new(
                    ValidationCode::DuplicateTag,
                    ValidationSeverity::Low,
                    format!("Duplicate region tag '{}'", dup),
                )
                .with_context("subgroup", g),
            ));
        }
    }
    Ok(None)
}

fn finite_role_required(record: &Record, _: Option<&[Record]>, schema: &RecordSchema) -> RuleResult {
    let missing = record
        .subgroups
        .iter()
        .flat_map(|g| g.entries.iter())
        .filter(|e| schema.is_finite(&e.category) && e.role.is_none())
        .count();

    if missing == 0 {
        return Ok(None);
    }
    Ok(Some(
        Violation::new(
            ValidationCode::MissingRoleForFinite,
            ValidationSeverity::Medium,
            "Missing role for finite entry",
        )
        .with_context("count", missing),
    ))
}

fn unique_forms(record: &Record, _: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    let mut duplicates = 0usize;
    let mut first: Option<(usize, String)> = None;

    for (g, group) in record.subgroups.iter().enumerate() {
        let mut seen = HashSet::new();
        for entry in &group.entries {
            if !seen.insert(entry.form_key()) {
                duplicates += 1;
                if first.is_none() {
                    first = Some((
                        g,
                        format!("{}/{}/{}", entry.category, entry.sub_category, entry.role.as_deref().unwrap_or("-")),
                    ));
                }
            }
        }
    }

    Ok(first.map(|(g, key)| {
        Violation::new(
            ValidationCode::DuplicateEntry,
            ValidationSeverity::Medium,
            "Duplicate form detected",
        )
        .with_context("subgroup", g)
        .with_context("form", key)
        .with_context("count", duplicates)
    }))
}

/// Control characters, replacement characters and zero-width marks.
pub(crate) fn is_invalid_char(c: char) -> bool {
    (c.is_control() && c != '\n' && c != '\t')
        || matches!(c, '\u{FFFD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}')
}

fn valid_characters(record: &Record, _: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    let bad = record
        .subgroups
        .iter()
        .flat_map(|g| g.entries.iter())
        .find(|e| e.value.chars().any(is_invalid_char));

    Ok(bad.map(|entry| {
        Violation::new(
            ValidationCode::InvalidCharacters,
            ValidationSeverity::Medium,
            "Invalid characters in value",
        )
        .with_context("value", entry.value.escape_debug())
    }))
}

/// UTF-8 text that was decoded as Latin-1 leaves `Ã`/`Â` followed by a
/// continuation-range character.
pub(crate) fn has_encoding_artifact(value: &str) -> bool {
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if matches!(c, '\u{00C2}' | '\u{00C3}') {
            if let Some(next) = chars.peek() {
                if ('\u{0080}'..='\u{00BF}').contains(next) {
                    return true;
                }
            }
        }
    }
    false
}

fn encoding_artifacts(record: &Record, _: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    let bad = record
        .subgroups
        .iter()
        .flat_map(|g| g.entries.iter())
        .find(|e| has_encoding_artifact(&e.value));

    Ok(bad.map(|entry| {
        Violation::new(
            ValidationCode::EncodingArtifact,
            ValidationSeverity::Medium,
            "Encoding artifact in value",
        )
        .with_context("value", &entry.value)
    }))
}

fn trimmed_fields(record: &Record, _: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    fn untrimmed(s: &str) -> bool {
        s.trim() != s
    }

    let bad = record.subgroups.iter().flat_map(|g| g.entries.iter()).any(|e| {
        untrimmed(&e.category)
            || untrimmed(&e.sub_category)
            || untrimmed(&e.value)
            || e.role.as_deref().is_some_and(untrimmed)
    }) || record
        .subgroups
        .iter()
        .flat_map(|g| g.tags.iter())
        .any(|t| untrimmed(t));

    if !bad {
        return Ok(None);
    }
    Ok(Some(Violation::new(
        ValidationCode::SurroundingWhitespace,
        ValidationSeverity::Low,
        "Surrounding whitespace in field",
    )))
}

fn unique_identifier(record: &Record, all: Option<&[Record]>, _: &RecordSchema) -> RuleResult {
    let Some(all) = all else {
        return Ok(None);
    };

    let contained = all.iter().any(|r| std::ptr::eq(r, record));
    let others = all
        .iter()
        .filter(|r| r.id == record.id && !std::ptr::eq(*r, record))
        .count();

    // A record validated outside the slice is usually a copy of one of its
    // members, so one match is itself.
    let duplicated = if contained { others >= 1 } else { others >= 2 };
    if !duplicated {
        return Ok(None);
    }
    Ok(Some(
        Violation::new(
            ValidationCode::DuplicateIdentifier,
            ValidationSeverity::Critical,
            format!("Duplicate identifier '{}'", record.id),
        )
        .with_context("occurrences", if contained { others + 1 } else { others }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{LeafEntry, SubGroup};

    fn record(entries: Vec<LeafEntry>) -> Record {
        Record::new("x", vec![SubGroup::new(["r1"], entries)])
    }

    #[test]
    fn test_duplicate_forms_reported_once() {
        let rec = record(vec![
            LeafEntry::new("a", "b", "v"),
            LeafEntry::new("a", "b", "v"),
            LeafEntry::new("a", "c", "w"),
        ]);
        let violation = unique_forms(&rec, None, &RecordSchema::default())
            .unwrap()
            .unwrap();
        assert_eq!(violation.code, ValidationCode::DuplicateEntry);
        assert_eq!(violation.message, "Duplicate form detected");
        assert_eq!(violation.context["count"], "1");
    }

    #[test]
    fn test_finite_entries_need_roles() {
        let schema = RecordSchema::lexical();
        let rec = record(vec![LeafEntry::new("indicative", "pres", "hablo")]);
        let violation = finite_role_required(&rec, None, &schema).unwrap().unwrap();
        assert_eq!(violation.code, ValidationCode::MissingRoleForFinite);

        let ok = record(vec![LeafEntry::new("nonfinite", "inf", "hablar")]);
        assert!(finite_role_required(&ok, None, &schema).unwrap().is_none());
    }

    #[test]
    fn test_invalid_characters_detected() {
        let rec = record(vec![LeafEntry::new("a", "b", "ha\u{200B}blo")]);
        assert!(valid_characters(&rec, None, &RecordSchema::default())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_encoding_artifact_detection() {
        assert!(has_encoding_artifact("hablÃ©"));
        assert!(!has_encoding_artifact("hablé"));
        assert!(!has_encoding_artifact("Ã"));
    }

    #[test]
    fn test_duplicate_identifier_needs_dataset() {
        let a = record(vec![LeafEntry::new("a", "b", "v")]);
        let b = a.clone();
        let schema = RecordSchema::default();
        assert!(unique_identifier(&a, None, &schema).unwrap().is_none());

        let all = vec![a.clone(), b];
        assert!(unique_identifier(&all[0], Some(all.as_slice()), &schema).unwrap().is_some());

        let single = vec![a.clone()];
        assert!(unique_identifier(&a, Some(single.as_slice()), &schema).unwrap().is_none());
    }

    #[test]
    fn test_healable_classification() {
        let critical = ValidationError {
            rule: "unique_identifier".into(),
            code: ValidationCode::DuplicateIdentifier,
            message: String::new(),
            severity: ValidationSeverity::Critical,
            category: ValidationCategory::Reference,
            context: BTreeMap::new(),
        };
        assert!(!critical.is_healable());

        let allow_listed = ValidationError {
            code: ValidationCode::DuplicateEntry,
            severity: ValidationSeverity::Critical,
            ..critical.clone()
        };
        assert!(allow_listed.is_healable());

        let minor = ValidationError {
            code: ValidationCode::InvalidCategory,
            severity: ValidationSeverity::Medium,
            ..critical
        };
        assert!(minor.is_healable());
    }
}
