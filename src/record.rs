//! Dataset record model.
//!
//! A record is a lexical entry: a unique identifier plus one or more
//! sub-groups, each tagged with the regions/variants it applies to and
//! carrying an ordered list of leaf entries (category, sub-category, value,
//! optional role).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub subgroups: Vec<SubGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGroup {
    #[serde(default)]
    pub tags: Vec<String>,
    pub entries: Vec<LeafEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeafEntry {
    #[serde(rename = "cat", alias = "category")]
    pub category: String,
    #[serde(rename = "sub", alias = "sub_category")]
    pub sub_category: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl LeafEntry {
    pub fn new(
        category: impl Into<String>,
        sub_category: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            sub_category: sub_category.into(),
            value: value.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Identity of an entry inside its sub-group. Two entries with the same
    /// key describe the same form.
    pub fn form_key(&self) -> (&str, &str, Option<&str>) {
        (&self.category, &self.sub_category, self.role.as_deref())
    }
}

impl SubGroup {
    pub fn new<I, S>(tags: I, entries: Vec<LeafEntry>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            entries,
        }
    }
}

impl Record {
    pub fn new(id: impl Into<String>, subgroups: Vec<SubGroup>) -> Self {
        Self {
            id: id.into(),
            subgroups,
        }
    }

    /// Deserialize an untyped value; anything not matching the record shape
    /// is rejected.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn many_from_json(value: serde_json::Value) -> Result<Vec<Self>> {
        match value {
            serde_json::Value::Array(items) => items.into_iter().map(Self::from_json).collect(),
            other => Err(Error::Serialization(format!(
                "expected an array of records, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// CRC32 over the canonical JSON encoding.
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        match serde_json::to_vec(self) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(self.id.as_bytes()),
        }
        hasher.finalize()
    }

    pub fn entry_count(&self) -> usize {
        self.subgroups.iter().map(|g| g.entries.len()).sum()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.subgroups
            .iter()
            .any(|g| g.tags.iter().any(|t| t == tag))
    }

    /// Cheap structural check used on the serving path: identifier present,
    /// sub-groups present, every sub-group has leaf entries.
    pub fn is_structurally_sound(&self) -> bool {
        !self.id.trim().is_empty()
            && !self.subgroups.is_empty()
            && self.subgroups.iter().all(|g| !g.entries.is_empty())
    }

    /// Rough in-memory footprint, used for memory accounting.
    pub fn approx_bytes(&self) -> usize {
        let mut total = std::mem::size_of::<Record>() + self.id.len();
        for group in &self.subgroups {
            total += std::mem::size_of::<SubGroup>();
            total += group.tags.iter().map(|t| t.len() + 24).sum::<usize>();
            for entry in &group.entries {
                total += std::mem::size_of::<LeafEntry>()
                    + entry.category.len()
                    + entry.sub_category.len()
                    + entry.value.len()
                    + entry.role.as_ref().map_or(0, |r| r.len());
            }
        }
        total
    }
}

/// Sample the first `sample` records for structural soundness. An empty
/// dataset never passes.
pub fn sample_check(records: &[Record], sample: usize) -> bool {
    !records.is_empty()
        && records
            .iter()
            .take(sample.max(1))
            .all(Record::is_structurally_sound)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Enumerated vocabularies used by content-level validation.
///
/// An empty set means the corresponding field is unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub sub_categories: BTreeSet<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Categories whose entries must carry a role.
    #[serde(default)]
    pub finite_categories: BTreeSet<String>,
}

impl RecordSchema {
    /// Verb-conjugation vocabulary.
    pub fn lexical() -> Self {
        fn set(items: &[&str]) -> BTreeSet<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Self {
            categories: set(&["indicative", "subjunctive", "imperative", "nonfinite"]),
            sub_categories: set(&[
                "pres",
                "pret",
                "impf",
                "fut",
                "cond",
                "pres_perf",
                "plpf",
                "fut_perf",
                "cond_perf",
                "subj_pres",
                "subj_impf",
                "subj_perf",
                "subj_plpf",
                "impAff",
                "impNeg",
                "inf",
                "ger",
                "part",
            ]),
            roles: set(&["1s", "2s_tu", "2s_vos", "3s", "1p", "2p_vosotros", "3p"]),
            tags: set(&["la_general", "rioplatense", "peninsular"]),
            finite_categories: set(&["indicative", "subjunctive", "imperative"]),
        }
    }

    pub fn allows_category(&self, category: &str) -> bool {
        self.categories.is_empty() || self.categories.contains(category)
    }

    pub fn allows_sub_category(&self, sub_category: &str) -> bool {
        self.sub_categories.is_empty() || self.sub_categories.contains(sub_category)
    }

    pub fn allows_role(&self, role: &str) -> bool {
        self.roles.is_empty() || self.roles.contains(role)
    }

    pub fn allows_tag(&self, tag: &str) -> bool {
        self.tags.is_empty() || self.tags.contains(tag)
    }

    pub fn is_finite(&self, category: &str) -> bool {
        self.finite_categories.contains(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        Record::new(
            "hablar",
            vec![SubGroup::new(
                ["la_general"],
                vec![LeafEntry::new("indicative", "pres", "hablo").with_role("1s")],
            )],
        )
    }

    #[test]
    fn test_short_field_names_round_trip() {
        let value = json!({
            "id": "x",
            "subgroups": [{"tags": ["r1"], "entries": [{"cat": "a", "sub": "b", "value": "v"}]}]
        });
        let record = Record::from_json(value).unwrap();
        assert_eq!(record.subgroups[0].entries[0].category, "a");
        assert_eq!(record.subgroups[0].entries[0].sub_category, "b");
        assert!(record.subgroups[0].entries[0].role.is_none());
    }

    #[test]
    fn test_long_field_aliases_accepted() {
        let value = json!({
            "id": "x",
            "subgroups": [{"tags": [], "entries": [{"category": "a", "sub_category": "b", "value": "v"}]}]
        });
        assert!(Record::from_json(value).is_ok());
    }

    #[test]
    fn test_wrong_shape_rejected() {
        assert!(Record::from_json(json!({"id": "x"})).is_err());
        assert!(Record::from_json(json!({"id": "x", "subgroups": "nope"})).is_err());
        assert!(Record::many_from_json(json!({"id": "x"})).is_err());
    }

    #[test]
    fn test_checksum_tracks_content() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.checksum(), b.checksum());
        b.subgroups[0].entries[0].value = "hablé".into();
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_sample_check() {
        assert!(sample_check(&[sample()], 3));
        assert!(!sample_check(&[], 3));

        let mut broken = sample();
        broken.subgroups[0].entries.clear();
        assert!(!sample_check(&[sample(), broken.clone()], 3));
        // Only the first `sample` records are inspected.
        assert!(sample_check(&[sample(), broken], 1));
    }

    #[test]
    fn test_schema_unrestricted_by_default() {
        let schema = RecordSchema::default();
        assert!(schema.allows_category("anything"));
        assert!(!schema.is_finite("indicative"));

        let lexical = RecordSchema::lexical();
        assert!(lexical.allows_category("indicative"));
        assert!(!lexical.allows_category("a"));
        assert!(lexical.is_finite("subjunctive"));
    }
}
