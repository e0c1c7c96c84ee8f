// src/analytics/datasets.rs
//
// Country, state and county pipelines. Each level joins three upstream files
// (cumulative counts, rolling averages, vaccinations), groups by entity and
// runs the per-group analytics.

use tracing::{info, trace};

use super::{
    add_deltas, add_percentages, calc_population, forward_fill, patch_population,
    rolling_active_estimate, sort_by_date,
};
use crate::config::EntitiesConfig;
use crate::pipeline::Pipeline;
use crate::snapshot::EntitySeries;
use crate::table::{
    contract, decode, filter_groups, for_each_group, group_by, multi_join, remove_columns,
    renames, Cast, ColumnContract, GroupKey, Row, RowSequence, Value,
};

/// Raw text of the three files behind one level.
#[derive(Debug, Clone, Default)]
pub struct RawLevel {
    pub cases: String,
    pub rolling: String,
    pub vaccinations: String,
}

/// How a group's `pop` is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Population {
    /// `floor(pvacc / pvacc_pct)` on the final row; that row is consumed.
    Infer,
    /// Largest `pop` reported by any row.
    Patch,
}

/// `*_per_hundred` → fraction, so `count / fraction` is a head count.
fn per_hundred(v: &Value) -> Value {
    match Cast::Float.apply(v) {
        Value::Float(f) => Value::Float(f / 100.0),
        other => other,
    }
}

/// Rolling-average `geoid` (`USA-29189`) → plain FIPS (`29189`).
fn geoid_to_fips(v: &Value) -> Value {
    match v.as_str() {
        Some(s) => Value::Text(s.rsplit('-').next().unwrap_or(s).to_string()),
        None => Value::Null,
    }
}

/// NYT leaves `fips` blank for city aggregates and "Unknown" rows; those are
/// keyed by `state|county` instead so they don't collapse into one row per day.
fn fips_or_place(rows: RowSequence) -> RowSequence {
    rows.into_iter()
        .map(|mut row| {
            if row.get("fips").map_or(true, |f| f.render().trim().is_empty()) {
                let place = |k: &str| row.get(k).map(Value::render).unwrap_or_default();
                let key = format!("{}|{}", place("state"), place("county"));
                trace!(place = %key, "blank fips, joining on place name");
                row.insert("fips".to_string(), Value::Text(key));
            }
            row
        })
        .collect()
}

fn counts_contract(extra: &[(&str, Cast)]) -> ColumnContract {
    let mut c = contract(&[
        ("date", Cast::Date),
        ("cases", Cast::Int),
        ("deaths", Cast::Int),
    ]);
    c.extend(contract(extra));
    c
}

fn rolling_contract(extra: &[(&str, Cast)]) -> ColumnContract {
    let mut c = contract(&[
        ("date", Cast::Date),
        ("new_cases", Cast::Int),
        ("new_deaths", Cast::Int),
        ("cases_avg", Cast::Float),
        ("deaths_avg", Cast::Float),
    ]);
    c.extend(contract(extra));
    c
}

fn decode_rolling(raw: &str, extra: &[(&str, Cast)], extra_renames: &[(&str, &str)]) -> RowSequence {
    let mut r = renames(&[("cases", "new_cases"), ("deaths", "new_deaths")]);
    r.extend(renames(extra_renames));
    decode(raw, &rolling_contract(extra), Some(&r), None)
}

fn owid_renames() -> Vec<(&'static str, &'static str)> {
    vec![
        ("people_vaccinated", "pvacc"),
        ("people_fully_vaccinated", "fvacc"),
        ("people_vaccinated_per_hundred", "pvacc_pct"),
    ]
}

fn owid_contract(extra: &[(&str, Cast)]) -> ColumnContract {
    let mut c = contract(&[
        ("date", Cast::Date),
        ("pvacc", Cast::Int),
        ("fvacc", Cast::Int),
        ("pvacc_pct", Cast::Custom(per_hundred)),
    ]);
    c.extend(contract(extra));
    c
}

/// Per-group analytics, in the order they must run.
pub fn group_analytics(population: Population) -> Pipeline<RowSequence> {
    let p = Pipeline::new("group-analytics").stage("sort_by_date", sort_by_date);
    let p = match population {
        Population::Infer => p
            .stage("forward_fill", |rows: RowSequence| {
                forward_fill(rows, &["pvacc", "fvacc", "pvacc_pct"])
            })
            .stage("calc_population", |rows: RowSequence| {
                calc_population(rows, "pvacc", "pvacc_pct")
            }),
        Population::Patch => p
            .stage("forward_fill", |rows: RowSequence| {
                forward_fill(rows, &["pvacc", "fvacc"])
            })
            .stage("patch_population", patch_population),
    };
    p.stage("add_percentages", add_percentages)
        .stage("rolling_active_estimate", rolling_active_estimate)
        .stage("add_deltas", add_deltas)
}

fn run_groups(
    rows: RowSequence,
    keys: &[&str],
    allow: Option<&[GroupKey]>,
    population: Population,
) -> Vec<EntitySeries> {
    let mut groups = group_by(keys, rows);
    if let Some(allow) = allow {
        groups = filter_groups(groups, allow);
    }
    let analytics = group_analytics(population);
    for_each_group(groups, &[|rows: RowSequence| analytics.run(rows)])
        .into_iter()
        .map(EntitySeries::from)
        .collect()
}

#[tracing::instrument(level = "info", skip_all)]
pub fn country_data(raw: &RawLevel) -> Vec<EntitySeries> {
    let cases = decode(&raw.cases, &counts_contract(&[]), None, None);
    let rolling = decode_rolling(&raw.rolling, &[], &[]);
    let only_usa: &dyn Fn(&Row) -> bool =
        &|row: &Row| row.get("iso_code").and_then(Value::as_str) == Some("USA");
    let vaccinations = decode(
        &raw.vaccinations,
        &owid_contract(&[("iso_code", Cast::Text)]),
        Some(&renames(&owid_renames())),
        Some(only_usa),
    );
    let vaccinations = remove_columns(vaccinations, &["iso_code"]);

    let joined = multi_join(&["date"], vec![cases, rolling, vaccinations]);
    let out = run_groups(joined, &[], None, Population::Infer);
    info!(groups = out.len(), "country data built");
    out
}

#[tracing::instrument(level = "info", skip_all)]
pub fn state_data(raw: &RawLevel, entities: &EntitiesConfig) -> Vec<EntitySeries> {
    let cases = decode(
        &raw.cases,
        &counts_contract(&[("state", Cast::Text)]),
        None,
        None,
    );
    let rolling = decode_rolling(&raw.rolling, &[("state", Cast::Text)], &[]);
    let mut vacc_renames = owid_renames();
    vacc_renames.push(("location", "state"));
    let vaccinations = decode(
        &raw.vaccinations,
        &owid_contract(&[("state", Cast::Text)]),
        Some(&renames(&vacc_renames)),
        None,
    );

    let joined = multi_join(&["date", "state"], vec![cases, rolling, vaccinations]);
    let allow = state_allow_list(entities);
    let out = run_groups(joined, &["state"], Some(&allow), Population::Infer);
    info!(groups = out.len(), "state data built");
    out
}

#[tracing::instrument(level = "info", skip_all)]
pub fn county_data(raw: &RawLevel, entities: &EntitiesConfig) -> Vec<EntitySeries> {
    let cases = decode(
        &raw.cases,
        &counts_contract(&[
            ("state", Cast::Text),
            ("county", Cast::Text),
            ("fips", Cast::Text),
        ]),
        None,
        None,
    );
    let rolling = decode_rolling(
        &raw.rolling,
        &[
            ("state", Cast::Text),
            ("county", Cast::Text),
            ("fips", Cast::Custom(geoid_to_fips)),
        ],
        &[("geoid", "fips")],
    );
    let vaccinations = decode(
        &raw.vaccinations,
        &contract(&[
            ("date", Cast::Date),
            ("fips", Cast::Text),
            ("pvacc", Cast::Int),
            ("fvacc", Cast::Int),
            ("pop", Cast::Int),
        ]),
        Some(&renames(&[
            ("administered_dose1_recip", "pvacc"),
            ("series_complete_yes", "fvacc"),
            ("census2019", "pop"),
        ])),
        None,
    );

    let joined = multi_join(
        &["date", "fips"],
        vec![fips_or_place(cases), fips_or_place(rolling), vaccinations],
    );
    let joined = remove_columns(joined, &["fips"]);
    let allow = county_allow_list(entities);
    let out = run_groups(joined, &["state", "county"], Some(&allow), Population::Patch);
    info!(groups = out.len(), "county data built");
    out
}

pub fn state_allow_list(entities: &EntitiesConfig) -> Vec<GroupKey> {
    entities
        .states
        .iter()
        .map(|s| GroupKey::from([("state".to_string(), Value::from(s.as_str()))]))
        .collect()
}

pub fn county_allow_list(entities: &EntitiesConfig) -> Vec<GroupKey> {
    entities
        .counties
        .iter()
        .map(|c| {
            GroupKey::from([
                ("state".to_string(), Value::from(c.state.as_str())),
                ("county".to_string(), Value::from(c.county.as_str())),
            ])
        })
        .collect()
}
