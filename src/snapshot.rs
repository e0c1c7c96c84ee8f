// src/snapshot.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::table::{Group, GroupKey, Row, Value};

/// One day of one entity, after the full analytics pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: String,
    pub cases: Option<i64>,
    pub deaths: Option<i64>,
    pub new_cases: Option<i64>,
    pub new_deaths: Option<i64>,
    pub cases_avg: Option<f64>,
    pub deaths_avg: Option<f64>,
    pub pvacc: Option<i64>,
    pub fvacc: Option<i64>,
    pub pop: Option<i64>,
    pub pvacc_pct: Option<f64>,
    pub fvacc_pct: Option<f64>,
    pub active_est: Option<i64>,
    #[serde(rename = "dCases")]
    pub d_cases: Option<i64>,
    #[serde(rename = "dDeaths")]
    pub d_deaths: Option<i64>,
}

impl DailyRecord {
    /// `None` when the row has no date.
    pub fn from_row(row: &Row) -> Option<Self> {
        let int = |k: &str| row.get(k).and_then(Value::as_i64);
        let float = |k: &str| row.get(k).and_then(Value::as_f64);
        Some(Self {
            date: row.get("date").and_then(Value::as_str)?.to_string(),
            cases: int("cases"),
            deaths: int("deaths"),
            new_cases: int("new_cases"),
            new_deaths: int("new_deaths"),
            cases_avg: float("cases_avg"),
            deaths_avg: float("deaths_avg"),
            pvacc: int("pvacc"),
            fvacc: int("fvacc"),
            pop: int("pop"),
            pvacc_pct: float("pvacc_pct"),
            fvacc_pct: float("fvacc_pct"),
            active_est: int("active_est"),
            d_cases: int("dCases"),
            d_deaths: int("dDeaths"),
        })
    }
}

/// Time series for one country, state or county.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySeries {
    pub key: GroupKey,
    pub rows: Vec<DailyRecord>,
}

impl From<Group> for EntitySeries {
    fn from(group: Group) -> Self {
        Self {
            rows: group.rows.iter().filter_map(DailyRecord::from_row).collect(),
            key: group.key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    pub country_data: Vec<EntitySeries>,
    pub state_data: Vec<EntitySeries>,
    pub county_data: Vec<EntitySeries>,
}

impl SnapshotData {
    pub fn is_empty(&self) -> bool {
        self.country_data.is_empty() && self.state_data.is_empty() && self.county_data.is_empty()
    }
}

/// A complete dataset and the moment the refresh that built it finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub data: SnapshotData,
}

impl Snapshot {
    pub fn new(data: SnapshotData) -> Self {
        Self {
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }
}
