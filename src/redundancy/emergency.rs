//! The hardcoded floor dataset. Small, immutable, and valid under the
//! lexical schema at every validation level.

use crate::record::{LeafEntry, Record, SubGroup};

const REGIONS: [&str; 1] = ["la_general"];

fn present(forms: [(&str, &str); 6]) -> Vec<LeafEntry> {
    forms
        .iter()
        .map(|(role, value)| LeafEntry::new("indicative", "pres", *value).with_role(*role))
        .collect()
}

fn verb(id: &str, infinitive: &str, gerund: &str, forms: [(&str, &str); 6]) -> Record {
    Record::new(
        id,
        vec![
            SubGroup::new(REGIONS, present(forms)),
            SubGroup::new(
                REGIONS,
                vec![
                    LeafEntry::new("nonfinite", "inf", infinitive),
                    LeafEntry::new("nonfinite", "ger", gerund),
                ],
            ),
        ],
    )
}

pub fn emergency_records() -> Vec<Record> {
    vec![
        verb(
            "hablar",
            "hablar",
            "hablando",
            [
                ("1s", "hablo"),
                ("2s_tu", "hablas"),
                ("3s", "habla"),
                ("1p", "hablamos"),
                ("2p_vosotros", "habláis"),
                ("3p", "hablan"),
            ],
        ),
        verb(
            "ser",
            "ser",
            "siendo",
            [
                ("1s", "soy"),
                ("2s_tu", "eres"),
                ("3s", "es"),
                ("1p", "somos"),
                ("2p_vosotros", "sois"),
                ("3p", "son"),
            ],
        ),
        verb(
            "tener",
            "tener",
            "teniendo",
            [
                ("1s", "tengo"),
                ("2s_tu", "tienes"),
                ("3s", "tiene"),
                ("1p", "tenemos"),
                ("2p_vosotros", "tenéis"),
                ("3p", "tienen"),
            ],
        ),
        verb(
            "vivir",
            "vivir",
            "viviendo",
            [
                ("1s", "vivo"),
                ("2s_tu", "vives"),
                ("3s", "vive"),
                ("1p", "vivimos"),
                ("2p_vosotros", "vivís"),
                ("3p", "viven"),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::{IntegrityConfig, IntegrityGuard, ValidationLevel};
    use crate::record::sample_check;

    #[test]
    fn test_emergency_dataset_is_strictly_valid() {
        let records = emergency_records();
        assert!(sample_check(&records, records.len()));

        let guard = IntegrityGuard::new(IntegrityConfig::development());
        let batch = guard.validate_batch(&records, ValidationLevel::Strict);
        assert!(batch.valid, "{:?}", batch.summary);
    }
}
