// src/analytics/mod.rs
//
// Per-group analytics. Every stage here expects the rows of a single entity
// and, apart from `sort_by_date`, rows already in ascending date order.

pub mod datasets;

use std::collections::VecDeque;

use crate::table::{parse_date, Row, RowSequence, Value};

/// Width of the trailing window behind `active_est`.
pub const ACTIVE_WINDOW: usize = 15;

fn date_key(row: &Row) -> String {
    row.get("date")
        .and_then(Value::as_str)
        .and_then(parse_date)
        .map(|d| d.format("%Y%m%d").to_string())
        .unwrap_or_default()
}

/// Ascending by the zero-padded `YYYYMMDD` form of `date`. Stable.
pub fn sort_by_date(mut rows: RowSequence) -> RowSequence {
    rows.sort_by_cached_key(date_key);
    rows
}

/// Replace missing or zero values of `fields` with the previous row's value
/// (zero for the first row).
pub fn forward_fill(mut rows: RowSequence, fields: &[&str]) -> RowSequence {
    for field in fields {
        let mut last = Value::Int(0);
        for row in rows.iter_mut() {
            let observed = row
                .get(*field)
                .filter(|v| v.as_f64().is_some_and(|n| n != 0.0))
                .cloned();
            match observed {
                Some(v) => last = v,
                None => {
                    row.insert(field.to_string(), last.clone());
                }
            }
        }
    }
    rows
}

/// Infer `pop = floor(last[numerator] / last[denominator])` from the final row
/// and broadcast it. The final row is consumed: `n` rows in, `n - 1` out.
pub fn calc_population(mut rows: RowSequence, numerator: &str, denominator: &str) -> RowSequence {
    let Some(last) = rows.pop() else {
        return rows;
    };
    let ratio = match (
        last.get(numerator).and_then(Value::as_f64),
        last.get(denominator).and_then(Value::as_f64),
    ) {
        (Some(n), Some(d)) => Some((n / d).floor()),
        _ => None,
    };
    let pop = match ratio {
        Some(p) if p.is_finite() => Value::Int(p as i64),
        _ => Value::Null,
    };
    for row in rows.iter_mut() {
        row.insert("pop".to_string(), pop.clone());
    }
    rows
}

/// Broadcast the largest `pop` observed anywhere in the group.
pub fn patch_population(mut rows: RowSequence) -> RowSequence {
    let max = rows
        .iter()
        .filter_map(|r| r.get("pop").and_then(Value::as_i64))
        .max();
    let pop = Value::from(max);
    for row in rows.iter_mut() {
        row.insert("pop".to_string(), pop.clone());
    }
    rows
}

fn percent(count: Option<f64>, pop: Option<f64>) -> Value {
    match (count, pop) {
        (Some(c), Some(p)) if p != 0.0 => {
            let pct = (c / p * 100.0 * 100.0).round() / 100.0;
            if pct.is_finite() {
                Value::Float(pct)
            } else {
                Value::Null
            }
        }
        _ => Value::Null,
    }
}

/// `pvacc_pct` / `fvacc_pct` as percentages of `pop`, two decimals. Null when
/// `pop` is zero or unknown.
pub fn add_percentages(mut rows: RowSequence) -> RowSequence {
    for row in rows.iter_mut() {
        let pop = row.get("pop").and_then(Value::as_f64);
        let p = percent(row.get("pvacc").and_then(Value::as_f64), pop);
        let f = percent(row.get("fvacc").and_then(Value::as_f64), pop);
        row.insert("pvacc_pct".to_string(), p);
        row.insert("fvacc_pct".to_string(), f);
    }
    rows
}

/// Trailing sums of `cases_avg` and `deaths_avg` over the last [`ACTIVE_WINDOW`] rows.
#[derive(Debug, Default)]
struct ActiveWindow {
    entries: VecDeque<(f64, f64)>,
    cases: f64,
    deaths: f64,
}

impl ActiveWindow {
    fn push(&mut self, cases: f64, deaths: f64) -> i64 {
        self.entries.push_back((cases, deaths));
        self.cases += cases;
        self.deaths += deaths;
        if self.entries.len() > ACTIVE_WINDOW {
            if let Some((c, d)) = self.entries.pop_front() {
                self.cases -= c;
                self.deaths -= d;
            }
        }
        (self.cases - self.deaths).floor() as i64
    }
}

/// `active_est = floor(Σ cases_avg - Σ deaths_avg)` over the trailing window.
pub fn rolling_active_estimate(mut rows: RowSequence) -> RowSequence {
    let mut window = ActiveWindow::default();
    for row in rows.iter_mut() {
        let cases = row.get("cases_avg").and_then(Value::as_f64).unwrap_or(0.0);
        let deaths = row.get("deaths_avg").and_then(Value::as_f64).unwrap_or(0.0);
        let est = window.push(cases, deaths);
        row.insert("active_est".to_string(), Value::Int(est));
    }
    rows
}

/// Day-over-day change of the cumulative counts; zero on the first row.
pub fn add_deltas(mut rows: RowSequence) -> RowSequence {
    let mut prev: Option<(Option<i64>, Option<i64>)> = None;
    for row in rows.iter_mut() {
        let cases = row.get("cases").and_then(Value::as_i64);
        let deaths = row.get("deaths").and_then(Value::as_i64);
        let (d_cases, d_deaths) = match prev {
            None => (Value::Int(0), Value::Int(0)),
            Some((pc, pd)) => (
                Value::from(cases.zip(pc).map(|(c, p)| c - p)),
                Value::from(deaths.zip(pd).map(|(d, p)| d - p)),
            ),
        };
        row.insert("dCases".to_string(), d_cases);
        row.insert("dDeaths".to_string(), d_deaths);
        prev = Some((cases, deaths));
    }
    rows
}
