// src/fetch/sources.rs
use anyhow::{Context, Result};
use url::Url;

use crate::config::SourcesConfig;

// NYT cumulative counts
static NYT_COUNTRY: &str = "us.csv";
static NYT_STATES: &str = "us-states.csv";
static NYT_COUNTIES: &str = "us-counties-recent.csv";

// NYT rolling averages
static NYT_ROLLING_COUNTRY: &str = "rolling-averages/us.csv";
static NYT_ROLLING_STATES: &str = "rolling-averages/us-states.csv";
static NYT_ROLLING_COUNTIES: &str = "rolling-averages/us-counties-recent.csv";

// vaccinations
static OWID_COUNTRY: &str = "vaccinations.csv";
static OWID_STATES: &str = "us_state_vaccinations.csv";
static CDC_COUNTIES: &str = "8xkx-amqh.csv";

/// Row cap for the county vaccination query.
const CDC_ROW_LIMIT: usize = 100_000;

/// The three upstream files behind one entity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelUrls {
    pub cases: Url,
    pub rolling: Url,
    pub vaccinations: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrls {
    pub country: LevelUrls,
    pub state: LevelUrls,
    pub county: LevelUrls,
}

fn parse_base(base: &str) -> Result<Url> {
    let url = Url::parse(base).with_context(|| format!("parsing endpoint {}", base))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("endpoint {} cannot be used as a base URL", base);
    }
    Ok(url)
}

fn join(base: &Url, file: &str) -> Result<Url> {
    base.join(file)
        .with_context(|| format!("joining {} onto {}", file, base))
}

impl SourceUrls {
    pub fn from_config(config: &SourcesConfig) -> Result<Self> {
        let nyt = parse_base(&config.nyt_base)?;
        let owid = parse_base(&config.owid_base)?;
        let cdc = parse_base(&config.cdc_base)?;

        let mut county_vaccinations = join(&cdc, CDC_COUNTIES)?;
        {
            let mut query = county_vaccinations.query_pairs_mut();
            if !config.county_vaccination_fips.is_empty() {
                let fips = config
                    .county_vaccination_fips
                    .iter()
                    .map(|f| format!("'{}'", f))
                    .collect::<Vec<_>>()
                    .join(",");
                query.append_pair("$where", &format!("fips in({})", fips));
            }
            // socrata otherwise stops at 1000 rows
            query.append_pair("$limit", &CDC_ROW_LIMIT.to_string());
        }

        Ok(Self {
            country: LevelUrls {
                cases: join(&nyt, NYT_COUNTRY)?,
                rolling: join(&nyt, NYT_ROLLING_COUNTRY)?,
                vaccinations: join(&owid, OWID_COUNTRY)?,
            },
            state: LevelUrls {
                cases: join(&nyt, NYT_STATES)?,
                rolling: join(&nyt, NYT_ROLLING_STATES)?,
                vaccinations: join(&owid, OWID_STATES)?,
            },
            county: LevelUrls {
                cases: join(&nyt, NYT_COUNTIES)?,
                rolling: join(&nyt, NYT_ROLLING_COUNTIES)?,
                vaccinations: county_vaccinations,
            },
        })
    }
}
