// src/table/group.rs
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::{RowSequence, Value};

/// Values of the group-by columns for one group.
pub type GroupKey = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub key: GroupKey,
    pub rows: RowSequence,
}

/// Hashable form of one key cell. `Int(1)` and `Text("1")` stay distinct, as do
/// `Null` and an absent column.
#[derive(Debug, PartialEq, Eq, Hash)]
enum KeyCell {
    Absent,
    Null,
    Int(i64),
    Float(u64),
    Text(String),
}

impl From<Option<&Value>> for KeyCell {
    fn from(value: Option<&Value>) -> Self {
        match value {
            None => KeyCell::Absent,
            Some(Value::Null) => KeyCell::Null,
            Some(Value::Int(i)) => KeyCell::Int(*i),
            // -0.0 == 0.0
            Some(Value::Float(f)) => KeyCell::Float(if *f == 0.0 { 0 } else { f.to_bits() }),
            Some(Value::Text(s)) => KeyCell::Text(s.clone()),
        }
    }
}

/// Partition `rows` by the values of `keys`.
///
/// Key columns move out of the rows and into [`Group::key`]; a column the row
/// lacks is left out of the key. Groups come back in first-seen order.
pub fn group_by(keys: &[&str], rows: RowSequence) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut position: HashMap<Vec<KeyCell>, usize> = HashMap::new();

    for mut row in rows {
        let lookup: Vec<KeyCell> = keys.iter().map(|k| KeyCell::from(row.get(*k))).collect();
        let key: GroupKey = keys
            .iter()
            .filter_map(|k| row.remove(*k).map(|v| (k.to_string(), v)))
            .collect();

        match position.get(&lookup) {
            Some(&i) => groups[i].rows.push(row),
            None => {
                position.insert(lookup, groups.len());
                groups.push(Group {
                    key,
                    rows: vec![row],
                });
            }
        }
    }
    groups
}

/// Run `stages` over each group's rows, in order, independently per group.
pub fn for_each_group<F>(groups: Vec<Group>, stages: &[F]) -> Vec<Group>
where
    F: Fn(RowSequence) -> RowSequence,
{
    groups
        .into_iter()
        .map(|group| Group {
            rows: stages.iter().fold(group.rows, |rows, stage| stage(rows)),
            key: group.key,
        })
        .collect()
}

/// Keep a group iff some allow-list entry matches it. An entry matches when
/// every field it names equals the group's key value for that field.
pub fn filter_groups(groups: Vec<Group>, allow: &[GroupKey]) -> Vec<Group> {
    groups
        .into_iter()
        .filter(|group| {
            allow.iter().any(|entry| {
                entry
                    .iter()
                    .all(|(field, want)| group.key.get(field) == Some(want))
            })
        })
        .collect()
}

/// Inverse of [`group_by`]: key fields are written back into every row.
pub fn flatten_groups(groups: Vec<Group>) -> RowSequence {
    groups
        .into_iter()
        .flat_map(|group| {
            let key = group.key;
            group.rows.into_iter().map(move |mut row| {
                row.extend(key.iter().map(|(k, v)| (k.clone(), v.clone())));
                row
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Row;

    fn row(state: &str, county: &str, cases: i64) -> Row {
        Row::from([
            ("state".to_string(), Value::from(state)),
            ("county".to_string(), Value::from(county)),
            ("cases".to_string(), Value::Int(cases)),
        ])
    }

    fn key(pairs: &[(&str, &str)]) -> GroupKey {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    fn sample() -> RowSequence {
        vec![
            row("Missouri", "St. Louis", 1),
            row("Illinois", "Madison", 2),
            row("Missouri", "St. Charles", 3),
            row("Missouri", "St. Louis", 4),
        ]
    }

    #[test]
    fn groups_in_first_seen_order_without_key_fields() {
        let groups = group_by(&["state"], sample());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, key(&[("state", "Missouri")]));
        assert_eq!(groups[0].rows.len(), 3);
        assert!(groups[0].rows.iter().all(|r| !r.contains_key("state")));
        assert_eq!(groups[1].key, key(&[("state", "Illinois")]));
    }

    #[test]
    fn group_round_trip_restores_multiset() {
        let original = sample();
        let mut restored = flatten_groups(group_by(&["state"], original.clone()));
        let mut expected = original;
        let sort_key = |r: &Row| format!("{:?}", r);
        restored.sort_by_key(sort_key);
        expected.sort_by_key(sort_key);
        assert_eq!(restored, expected);
    }

    #[test]
    fn mixed_key_types_and_absent_columns_round_trip() {
        let mut no_state = row("", "Unknown", 5);
        no_state.remove("state");
        let mut null_state = row("", "Unknown", 6);
        null_state.insert("state".into(), Value::Null);
        let mut int_state = row("", "Numbered", 7);
        int_state.insert("state".into(), Value::Int(1));
        let original = vec![
            no_state,
            null_state,
            row("", "Blank", 8),
            int_state,
            row("1", "Numbered", 9),
        ];

        let groups = group_by(&["state"], original.clone());
        assert_eq!(groups.len(), 5);
        assert!(groups[0].key.is_empty());
        assert_eq!(groups[1].key["state"], Value::Null);

        assert_eq!(flatten_groups(groups), original);
    }

    #[test]
    fn filter_groups_uses_partial_matches() {
        let groups = group_by(&["state", "county"], sample());
        assert_eq!(groups.len(), 3);

        let allow = vec![
            key(&[("state", "Missouri"), ("county", "St. Louis")]),
            key(&[("state", "Illinois")]),
        ];
        let kept = filter_groups(groups, &allow);
        let counties: Vec<_> = kept.iter().map(|g| g.key["county"].render()).collect();
        assert_eq!(counties, vec!["St. Louis", "Madison"]);
    }

    #[test]
    fn for_each_group_applies_stages_in_order() {
        let groups = group_by(&["state"], sample());
        let keep_first = |rows: RowSequence| rows.into_iter().take(1).collect::<RowSequence>();
        let double = |rows: RowSequence| {
            rows.into_iter()
                .map(|mut r| {
                    let c = r["cases"].as_i64().unwrap_or(0);
                    r.insert("cases".into(), Value::Int(c * 2));
                    r
                })
                .collect::<RowSequence>()
        };
        let stages: Vec<Box<dyn Fn(RowSequence) -> RowSequence>> =
            vec![Box::new(double), Box::new(keep_first)];
        let out = for_each_group(groups, &stages);
        assert_eq!(out[0].rows.len(), 1);
        assert_eq!(out[0].rows[0]["cases"], Value::Int(2));
        assert_eq!(out[1].rows[0]["cases"], Value::Int(4));
    }
}
