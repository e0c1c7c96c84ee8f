// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::fetch::sources::SourceUrls;

/// Service configuration. Every field has a default; a YAML file and then
/// environment variables may override them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_name: String,
    pub port: u16,
    pub log_level: String,
    pub cache_path: PathBuf,
    pub max_age_hours: u64,
    /// Local hour at which the daily refresh fires.
    pub refresh_hour: u32,
    pub fetch: FetchConfig,
    pub sources: SourcesConfig,
    pub entities: EntitiesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "covid-snapshot".into(),
            port: 8080,
            log_level: "info".into(),
            cache_path: PathBuf::from("data/covid-19-data.json"),
            max_age_hours: 24,
            refresh_hour: 1,
            fetch: FetchConfig::default(),
            sources: SourcesConfig::default(),
            entities: EntitiesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: usize,
    /// First backoff delay; doubled after every failed attempt.
    pub retry_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 1_000,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Upstream endpoints. File names under each endpoint are fixed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub nyt_base: String,
    pub owid_base: String,
    pub cdc_base: String,
    /// FIPS codes requested from the county vaccination dataset. Codes of
    /// `entities.counties` are merged in on load.
    pub county_vaccination_fips: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            nyt_base: "https://raw.githubusercontent.com/nytimes/covid-19-data/master/".into(),
            owid_base:
                "https://raw.githubusercontent.com/owid/covid-19-data/master/public/data/vaccinations/"
                    .into(),
            cdc_base: "https://data.cdc.gov/resource/".into(),
            county_vaccination_fips: ["29189", "29510", "29183", "17119", "17163"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CountyRef {
    pub state: String,
    pub county: String,
    /// Five-digit county code. NYT city aggregates such as Kansas City have none.
    #[serde(default)]
    pub fips: Option<String>,
}

/// Entities that survive group filtering.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntitiesConfig {
    pub states: Vec<String>,
    pub counties: Vec<CountyRef>,
}

impl Default for EntitiesConfig {
    fn default() -> Self {
        let county = |state: &str, county: &str, fips: &str| CountyRef {
            state: state.into(),
            county: county.into(),
            fips: Some(fips.into()),
        };
        Self {
            states: vec!["Missouri".into()],
            counties: vec![
                county("Missouri", "St. Louis", "29189"),
                county("Missouri", "St. Louis city", "29510"),
                county("Missouri", "St. Charles", "29183"),
                county("Illinois", "Madison", "17119"),
                county("Illinois", "St. Clair", "17163"),
            ],
        }
    }
}

impl Config {
    /// Defaults, then the YAML file at `path` (if given), then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|name| env::var(name).ok())?;
        config.merge_county_fips();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Apply `APP_NAME`, `APP_PORT`, `LOG_LEVEL`, `CACHE_PATH`, `MAX_AGE_HOURS`, `REFRESH_HOUR`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("APP_NAME") {
            self.app_name = v;
        }
        if let Some(v) = lookup("APP_PORT") {
            self.port = v
                .parse()
                .with_context(|| format!("APP_PORT `{}` is not a port", v))?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("CACHE_PATH") {
            self.cache_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAX_AGE_HOURS") {
            self.max_age_hours = v
                .parse()
                .with_context(|| format!("MAX_AGE_HOURS `{}` is not a number", v))?;
        }
        if let Some(v) = lookup("REFRESH_HOUR") {
            self.refresh_hour = v
                .parse()
                .with_context(|| format!("REFRESH_HOUR `{}` is not a number", v))?;
        }
        Ok(())
    }

    /// Add the FIPS code of every configured county to the vaccination query.
    pub fn merge_county_fips(&mut self) {
        for fips in self.entities.counties.iter().filter_map(|c| c.fips.as_ref()) {
            if !self.sources.county_vaccination_fips.contains(fips) {
                self.sources.county_vaccination_fips.push(fips.clone());
            }
        }
    }

    /// Counties that will get no vaccination data.
    pub fn counties_without_fips(&self) -> impl Iterator<Item = &CountyRef> {
        self.entities.counties.iter().filter(|c| c.fips.is_none())
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_hour > 23 {
            anyhow::bail!("refresh_hour must be 0..=23, got {}", self.refresh_hour);
        }
        let codes = self
            .sources
            .county_vaccination_fips
            .iter()
            .chain(self.entities.counties.iter().filter_map(|c| c.fips.as_ref()));
        for fips in codes {
            if fips.len() != 5 || !fips.bytes().all(|b| b.is_ascii_digit()) {
                anyhow::bail!("fips code must be five digits, got {:?}", fips);
            }
        }
        for county in &self.entities.counties {
            if let Some(fips) = &county.fips {
                if !self.sources.county_vaccination_fips.contains(fips) {
                    anyhow::bail!(
                        "county {}, {} has fips {} but it is not in sources.county_vaccination_fips",
                        county.county,
                        county.state,
                        fips
                    );
                }
            }
        }
        SourceUrls::from_config(&self.sources).context("invalid source endpoints")?;
        Ok(())
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 60 * 60)
    }
}
