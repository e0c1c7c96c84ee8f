// src/table/join.rs
use std::collections::HashMap;

use super::{Row, RowSequence, Value};

type JoinKey = Vec<String>;

fn row_key(row: &Row, keys: &[&str]) -> JoinKey {
    keys.iter()
        .map(|k| row.get(*k).map(Value::render).unwrap_or_default())
        .collect()
}

/// Index rows by key. Duplicate keys keep the last row; order is first-seen.
fn index(rows: RowSequence, keys: &[&str]) -> (Vec<JoinKey>, HashMap<JoinKey, Row>) {
    let mut order = Vec::new();
    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        let key = row_key(&row, keys);
        if map.insert(key.clone(), row).is_none() {
            order.push(key);
        }
    }
    (order, map)
}

/// For every primary row, merge in the secondary row with equal `keys`.
/// Primary fields win on conflict; unmatched primary rows pass through.
pub fn left_join(primary: RowSequence, secondary: RowSequence, keys: &[&str]) -> RowSequence {
    let (_, lookup) = index(secondary, keys);
    primary
        .into_iter()
        .map(|mut row| {
            if let Some(other) = lookup.get(&row_key(&row, keys)) {
                for (col, val) in other {
                    row.entry(col.clone()).or_insert_with(|| val.clone());
                }
            }
            row
        })
        .collect()
}

/// Union of all `sources` on `keys`: one output row per key seen anywhere,
/// fields merged in source order so later sources override earlier ones.
pub fn multi_join(keys: &[&str], sources: Vec<RowSequence>) -> RowSequence {
    let mut order: Vec<JoinKey> = Vec::new();
    let mut joined: HashMap<JoinKey, Row> = HashMap::new();

    for source in sources {
        let (source_order, mut source_rows) = index(source, keys);
        for key in source_order {
            let Some(row) = source_rows.remove(&key) else {
                continue;
            };
            match joined.get_mut(&key) {
                Some(existing) => existing.extend(row),
                None => {
                    order.push(key.clone());
                    joined.insert(key, row);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| joined.remove(&key))
        .collect()
}
