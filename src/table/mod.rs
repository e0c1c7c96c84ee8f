// src/table/mod.rs

pub mod columns;
pub mod decode;
pub mod group;
pub mod join;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use columns::{
    add_column, cast_columns, filter_and_cast_columns, filter_columns, remove_columns, rename,
};
pub use decode::decode;
pub use group::{filter_groups, flatten_groups, for_each_group, group_by, Group, GroupKey};
pub use join::{left_join, multi_join};

/// A single scalar cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value. Text is parsed; null and unparsable text are `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Text(s) => parse_int(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Stable textual form used for join and group keys.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One decoded record: column name → value.
pub type Row = BTreeMap<String, Value>;

/// Rows in significant order.
pub type RowSequence = Vec<Row>;

/// Conversion applied to a single column.
#[derive(Clone, Copy)]
pub enum Cast {
    Text,
    Int,
    Float,
    /// Normalises to `YYYY-MM-DD`.
    Date,
    Custom(fn(&Value) -> Value),
}

impl Cast {
    pub fn apply(&self, value: &Value) -> Value {
        match self {
            Cast::Text => match value {
                Value::Null => Value::Null,
                Value::Text(s) => Value::Text(s.clone()),
                other => Value::Text(other.render()),
            },
            Cast::Int => value.as_i64().into(),
            Cast::Float => match value {
                Value::Text(s) if s.trim().is_empty() => Value::Null,
                other => other.as_f64().into(),
            },
            Cast::Date => value
                .as_str()
                .and_then(parse_date)
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null),
            Cast::Custom(f) => f(value),
        }
    }
}

impl std::fmt::Debug for Cast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cast::Text => f.write_str("Text"),
            Cast::Int => f.write_str("Int"),
            Cast::Float => f.write_str("Float"),
            Cast::Date => f.write_str("Date"),
            Cast::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Declared columns of a source and how each is converted.
pub type ColumnContract = BTreeMap<String, Cast>;

/// Build a contract from `(column, cast)` pairs.
pub fn contract(columns: &[(&str, Cast)]) -> ColumnContract {
    columns
        .iter()
        .map(|(name, cast)| (name.to_string(), *cast))
        .collect()
}

/// Build a rename map from `(old, new)` pairs.
pub fn renames(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(old, new)| (old.to_string(), new.to_string()))
        .collect()
}

fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<i64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    })
}

/// Accepts `YYYY-MM-DD` (optionally followed by a time part) and `MM/DD/YYYY`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.as_bytes().get(4) == Some(&b'-') {
        // non-ascii within the first ten bytes is not a date
        return s
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    }
    NaiveDate::parse_from_str(s, "%m/%d/%Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_cast_truncates_float_text() {
        assert_eq!(Cast::Int.apply(&"12.0".into()), Value::Int(12));
        assert_eq!(Cast::Int.apply(&"7".into()), Value::Int(7));
        assert_eq!(Cast::Int.apply(&"".into()), Value::Null);
        assert_eq!(Cast::Int.apply(&"n/a".into()), Value::Null);
    }

    #[test]
    fn float_cast_handles_empty() {
        assert_eq!(Cast::Float.apply(&"1.5".into()), Value::Float(1.5));
        assert_eq!(Cast::Float.apply(&" ".into()), Value::Null);
    }

    #[test]
    fn date_cast_normalises_formats() {
        let iso = Value::Text("2021-03-04".into());
        assert_eq!(Cast::Date.apply(&iso), iso);
        assert_eq!(
            Cast::Date.apply(&"2021-03-04T00:00:00.000".into()),
            Value::Text("2021-03-04".into())
        );
        assert_eq!(
            Cast::Date.apply(&"3/4/2021".into()),
            Value::Text("2021-03-04".into())
        );
        assert_eq!(Cast::Date.apply(&"yesterday".into()), Value::Null);
    }

    #[test]
    fn parse_date_rejects_multibyte_cells() {
        assert_eq!(parse_date("2021-01-0éx"), None);
        assert_eq!(parse_date("2021-01-é"), None);
        assert_eq!(parse_date("2021-01-0"), None);
        assert_eq!(
            parse_date("2021-01-02 é"),
            NaiveDate::from_ymd_opt(2021, 1, 2)
        );
    }

    #[test]
    fn untagged_serde_round_trips_scalars() {
        let row: Row = [
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Float(1.5)),
            ("c".to_string(), Value::Text("x".into())),
            ("d".to_string(), Value::Null),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"a":1,"b":1.5,"c":"x","d":null}"#);
        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }
}
