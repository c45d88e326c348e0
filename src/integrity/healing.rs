//! Healing strategies, one per healable validation code.
//!
//! A strategy mutates the record in place and reports whether it changed
//! anything. Whether the change is kept is decided by the guard after
//! re-validation.

use super::rules::{has_encoding_artifact, is_invalid_char, ValidationCode, ValidationError};
use crate::record::{Record, RecordSchema};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

pub type HealingFn = fn(&mut Record, &ValidationError, &RecordSchema) -> bool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAttempt {
    pub record_id: String,
    pub code: ValidationCode,
    pub rule: String,
    pub strategy: String,
    pub success: bool,
    pub rolled_back: bool,
    pub errors_before: usize,
    pub errors_after: usize,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealingReport {
    /// At least one strategy was kept.
    pub healed: bool,
    /// The healed record, or an exact copy of the input when nothing helped.
    pub record: Record,
    pub original_error_count: usize,
    pub remaining_errors: Vec<ValidationError>,
    pub attempts: Vec<HealingAttempt>,
}

pub fn default_strategies() -> HashMap<ValidationCode, (&'static str, HealingFn)> {
    let mut table: HashMap<ValidationCode, (&'static str, HealingFn)> = HashMap::new();
    table.insert(ValidationCode::EmptySubgroup, ("drop_empty_subgroups", drop_empty_subgroups));
    table.insert(
        ValidationCode::MissingRoleForFinite,
        ("drop_roleless_finite_entries", drop_roleless_finite_entries),
    );
    table.insert(ValidationCode::DuplicateEntry, ("dedupe_forms", dedupe_forms));
    table.insert(ValidationCode::DuplicateTag, ("dedupe_tags", dedupe_tags));
    table.insert(ValidationCode::UnknownTag, ("drop_unknown_tags", drop_unknown_tags));
    table.insert(ValidationCode::InvalidCharacters, ("strip_invalid_characters", strip_invalid_characters));
    table.insert(ValidationCode::EncodingArtifact, ("repair_encoding", repair_encoding));
    table.insert(ValidationCode::SurroundingWhitespace, ("trim_fields", trim_fields));
    table.insert(ValidationCode::InvalidRole, ("drop_nonfinite_roles", drop_nonfinite_roles));
    table
}

fn drop_empty_subgroups(record: &mut Record, _: &ValidationError, _: &RecordSchema) -> bool {
    let before = record.subgroups.len();
    record.subgroups.retain(|g| !g.entries.is_empty());
    record.subgroups.len() != before
}

fn drop_roleless_finite_entries(record: &mut Record, _: &ValidationError, schema: &RecordSchema) -> bool {
    let mut changed = false;
    for group in &mut record.subgroups {
        let keep: Vec<_> = group
            .entries
            .iter()
            .filter(|e| !(schema.is_finite(&e.category) && e.role.is_none()))
            .cloned()
            .collect();
        // Never empty a sub-group; that trades one error for a worse one.
        if !keep.is_empty() && keep.len() != group.entries.len() {
            group.entries = keep;
            changed = true;
        }
    }
    changed
}

fn dedupe_forms(record: &mut Record, _: &ValidationError, _: &RecordSchema) -> bool {
    let mut changed = false;
    for group in &mut record.subgroups {
        let mut seen = HashSet::new();
        let before = group.entries.len();
        group.entries.retain(|e| {
            seen.insert((e.category.clone(), e.sub_category.clone(), e.role.clone()))
        });
        changed |= group.entries.len() != before;
    }
    changed
}

fn dedupe_tags(record: &mut Record, _: &ValidationError, _: &RecordSchema) -> bool {
    let mut changed = false;
    for group in &mut record.subgroups {
        let mut seen = HashSet::new();
        let before = group.tags.len();
        group.tags.retain(|t| seen.insert(t.clone()));
        changed |= group.tags.len() != before;
    }
    changed
}

fn drop_unknown_tags(record: &mut Record, _: &ValidationError, schema: &RecordSchema) -> bool {
    let mut changed = false;
    for group in &mut record.subgroups {
        let before = group.tags.len();
        group.tags.retain(|t| schema.allows_tag(t));
        changed |= group.tags.len() != before;
    }
    changed
}

fn strip_invalid_characters(record: &mut Record, _: &ValidationError, _: &RecordSchema) -> bool {
    let mut changed = false;
    for entry in record.subgroups.iter_mut().flat_map(|g| g.entries.iter_mut()) {
        if entry.value.chars().any(is_invalid_char) {
            entry.value = entry.value.chars().filter(|c| !is_invalid_char(*c)).collect();
            changed = true;
        }
    }
    changed
}

/// Re-decode text whose UTF-8 bytes were read as Latin-1.
fn repair_mojibake(value: &str) -> Option<String> {
    let bytes: Option<Vec<u8>> = value
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect();
    String::from_utf8(bytes?).ok()
}

fn repair_encoding(record: &mut Record, _: &ValidationError, _: &RecordSchema) -> bool {
    let mut changed = false;
    for entry in record.subgroups.iter_mut().flat_map(|g| g.entries.iter_mut()) {
        if has_encoding_artifact(&entry.value) {
            if let Some(fixed) = repair_mojibake(&entry.value) {
                entry.value = fixed;
                changed = true;
            }
        }
    }
    changed
}

fn trim_fields(record: &mut Record, _: &ValidationError, _: &RecordSchema) -> bool {
    fn trim(s: &mut String) -> bool {
        let trimmed = s.trim();
        if trimmed.len() == s.len() {
            return false;
        }
        *s = trimmed.to_string();
        true
    }

    let mut changed = false;
    for group in &mut record.subgroups {
        for tag in &mut group.tags {
            changed |= trim(tag);
        }
        for entry in &mut group.entries {
            changed |= trim(&mut entry.category);
            changed |= trim(&mut entry.sub_category);
            changed |= trim(&mut entry.value);
            if let Some(role) = entry.role.as_mut() {
                changed |= trim(role);
            }
        }
    }
    changed
}

fn drop_nonfinite_roles(record: &mut Record, _: &ValidationError, schema: &RecordSchema) -> bool {
    let mut changed = false;
    for entry in record.subgroups.iter_mut().flat_map(|g| g.entries.iter_mut()) {
        let invalid = entry.role.as_deref().is_some_and(|r| !schema.allows_role(r));
        if invalid && !schema.is_finite(&entry.category) {
            entry.role = None;
            changed = true;
        }
    }
    changed
}
