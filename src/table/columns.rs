// src/table/columns.rs
//
// Column-level transforms. Each takes the rows by value and hands back a new
// sequence; callers compose them explicitly.

use std::collections::BTreeMap;

use super::{ColumnContract, RowSequence, Value};

/// Rename columns per `old → new`. Columns not in the map are untouched.
pub fn rename(rows: RowSequence, changes: &BTreeMap<String, String>) -> RowSequence {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(key, val)| match changes.get(&key) {
                    Some(new) => (new.clone(), val),
                    None => (key, val),
                })
                .collect()
        })
        .collect()
}

/// Add `name = value` to every row, replacing any existing value.
pub fn add_column(rows: RowSequence, name: &str, value: Value) -> RowSequence {
    rows.into_iter()
        .map(|mut row| {
            row.insert(name.to_string(), value.clone());
            row
        })
        .collect()
}

pub fn remove_columns(rows: RowSequence, columns: &[&str]) -> RowSequence {
    rows.into_iter()
        .map(|mut row| {
            for col in columns {
                row.remove(*col);
            }
            row
        })
        .collect()
}

/// Keep only the listed columns.
pub fn filter_columns(rows: RowSequence, columns: &[&str]) -> RowSequence {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .filter(|(key, _)| columns.contains(&key.as_str()))
                .collect()
        })
        .collect()
}

/// Convert the columns named in `casts`; other columns pass through unchanged.
pub fn cast_columns(rows: RowSequence, casts: &ColumnContract) -> RowSequence {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(key, val)| match casts.get(&key) {
                    Some(cast) => {
                        let converted = cast.apply(&val);
                        (key, converted)
                    }
                    None => (key, val),
                })
                .collect()
        })
        .collect()
}

/// Like [`cast_columns`], but columns absent from `casts` are dropped.
pub fn filter_and_cast_columns(rows: RowSequence, casts: &ColumnContract) -> RowSequence {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .filter_map(|(key, val)| casts.get(&key).map(|cast| (key, cast.apply(&val))))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{contract, renames, Cast, Row};

    fn rows() -> RowSequence {
        vec![
            Row::from([
                ("date".to_string(), Value::from("2021-01-01")),
                ("cases".to_string(), Value::from("4")),
                ("geoid".to_string(), Value::from("USA-29")),
            ]),
            Row::from([
                ("date".to_string(), Value::from("2021-01-02")),
                ("cases".to_string(), Value::from("6")),
                ("geoid".to_string(), Value::from("USA-29")),
            ]),
        ]
    }

    #[test]
    fn rename_moves_values() {
        let out = rename(rows(), &renames(&[("cases", "new_cases")]));
        assert!(!out[0].contains_key("cases"));
        assert_eq!(out[1]["new_cases"], Value::from("6"));
        assert_eq!(out[1]["geoid"], Value::from("USA-29"));
    }

    #[test]
    fn add_column_broadcasts() {
        let out = add_column(rows(), "state", Value::from("Missouri"));
        assert!(out.iter().all(|r| r["state"] == Value::from("Missouri")));
    }

    #[test]
    fn cast_passes_unmapped_through() {
        let out = cast_columns(rows(), &contract(&[("cases", Cast::Int)]));
        assert_eq!(out[0]["cases"], Value::Int(4));
        assert_eq!(out[0]["geoid"], Value::from("USA-29"));
    }

    #[test]
    fn filter_and_cast_drops_unmapped() {
        let out = filter_and_cast_columns(
            rows(),
            &contract(&[("date", Cast::Date), ("cases", Cast::Int)]),
        );
        assert_eq!(out[0].len(), 2);
        assert_eq!(out[1]["cases"], Value::Int(6));
    }

    #[test]
    fn remove_and_filter_columns() {
        let removed = remove_columns(rows(), &["geoid"]);
        assert_eq!(removed[0].len(), 2);
        let kept = filter_columns(rows(), &["date"]);
        assert_eq!(kept[0].keys().collect::<Vec<_>>(), vec!["date"]);
    }
}
