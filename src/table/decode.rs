// src/table/decode.rs
use csv::ReaderBuilder;
use std::collections::BTreeMap;
use tracing::{debug, trace};

use super::{ColumnContract, Row, RowSequence, Value};

/// Decode delimited text into rows.
///
/// - The first record is the header; each header name is passed through
///   `renames` before it is looked up in `contract`.
/// - Only contract columns are kept, each converted by its declared `Cast`.
/// - `row_filter` runs on the converted row.
/// - Rows without a non-null `date`, rows whose field count differs from the
///   header, and records the reader cannot parse are skipped.
///
/// Empty input yields an empty sequence.
pub fn decode(
    raw: &str,
    contract: &ColumnContract,
    renames: Option<&BTreeMap<String, String>>,
    row_filter: Option<&dyn Fn(&Row) -> bool>,
) -> RowSequence {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(raw.as_bytes());
    let mut records = rdr.records();

    let header = match records.next() {
        Some(Ok(h)) => h,
        Some(Err(e)) => {
            debug!(error = %e, "unreadable header, treating input as empty");
            return Vec::new();
        }
        None => return Vec::new(),
    };

    // (field index, output column name, cast) for every retained column
    let plan: Vec<_> = header
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| {
            let name = name.trim();
            let name = renames
                .and_then(|r| r.get(name))
                .map(String::as_str)
                .unwrap_or(name);
            contract
                .get_key_value(name)
                .map(|(col, cast)| (idx, col.clone(), *cast))
        })
        .collect();

    let width = header.len();
    let mut rows = Vec::new();
    let mut dropped = 0usize;

    for (idx, result) in records.enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                trace!(record = idx + 1, error = %e, "skipping unreadable record");
                dropped += 1;
                continue;
            }
        };
        if record.len() != width {
            // blank trailing lines land here too
            dropped += 1;
            continue;
        }

        let row: Row = plan
            .iter()
            .map(|(i, col, cast)| {
                let raw = Value::Text(record.get(*i).unwrap_or_default().to_string());
                (col.clone(), cast.apply(&raw))
            })
            .collect();

        if row.get("date").map_or(true, Value::is_null) {
            dropped += 1;
            continue;
        }
        if let Some(keep) = row_filter {
            if !keep(&row) {
                continue;
            }
        }
        rows.push(row);
    }

    debug!(rows = rows.len(), dropped, "decoded csv");
    rows
}
