use resilient_dataset::{LeafEntry, Record, SubGroup};

const ROLES: [&str; 6] = ["1s", "2s_tu", "3s", "1p", "2p_vosotros", "3p"];
const ENDINGS: [&str; 6] = ["o", "as", "a", "amos", "áis", "an"];

/// A regular -ar verb with a present paradigm and its nonfinite forms.
pub fn regular_verb(stem: &str) -> Record {
    let present = ROLES
        .iter()
        .zip(ENDINGS)
        .map(|(role, ending)| {
            LeafEntry::new("indicative", "pres", format!("{}{}", stem, ending)).with_role(*role)
        })
        .collect();

    Record::new(
        format!("{}ar", stem),
        vec![
            SubGroup::new(["la_general"], present),
            SubGroup::new(
                ["la_general", "rioplatense"],
                vec![
                    LeafEntry::new("nonfinite", "inf", format!("{}ar", stem)),
                    LeafEntry::new("nonfinite", "ger", format!("{}ando", stem)),
                ],
            ),
        ],
    )
}

pub fn sample_dataset() -> Vec<Record> {
    ["habl", "cant", "bail", "estudi", "trabaj", "camin"]
        .into_iter()
        .map(regular_verb)
        .collect()
}

/// A dataset whose leading record fails the serving-path structural check.
pub fn corrupt_dataset() -> Vec<Record> {
    let mut records = sample_dataset();
    records[0].subgroups.clear();
    records
}
