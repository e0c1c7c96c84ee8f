// src/loader.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use crate::analytics::datasets::{country_data, county_data, state_data, RawLevel};
use crate::config::EntitiesConfig;
use crate::fetch::sources::{LevelUrls, SourceUrls};
use crate::fetch::Fetcher;
use crate::snapshot::SnapshotData;

/// Runs one full network pipeline: fetch every source, then build all three levels.
pub struct DatasetLoader {
    fetcher: Arc<dyn Fetcher>,
    urls: SourceUrls,
    entities: EntitiesConfig,
}

impl DatasetLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>, urls: SourceUrls, entities: EntitiesConfig) -> Self {
        Self {
            fetcher,
            urls,
            entities,
        }
    }

    async fn fetch_level(&self, urls: &LevelUrls) -> RawLevel {
        let (cases, rolling, vaccinations) = futures::join!(
            self.fetcher.fetch(urls.cases.as_str()),
            self.fetcher.fetch(urls.rolling.as_str()),
            self.fetcher.fetch(urls.vaccinations.as_str()),
        );
        RawLevel {
            cases,
            rolling,
            vaccinations,
        }
    }

    /// Failed sources arrive as empty text, so the result is always a
    /// well-formed (possibly empty) dataset. Errors only if the transform
    /// task itself dies.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn load(&self) -> Result<SnapshotData> {
        let start = Instant::now();
        let (country, state, county) = futures::join!(
            self.fetch_level(&self.urls.country),
            self.fetch_level(&self.urls.state),
            self.fetch_level(&self.urls.county),
        );
        info!(elapsed = ?start.elapsed(), "sources fetched");

        // row transforms are CPU-bound; keep them off the async workers
        let entities = self.entities.clone();
        let data = tokio::task::spawn_blocking(move || SnapshotData {
            country_data: country_data(&country),
            state_data: state_data(&state, &entities),
            county_data: county_data(&county, &entities),
        })
        .await
        .context("dataset transform task failed")?;

        info!(
            elapsed = ?start.elapsed(),
            countries = data.country_data.len(),
            states = data.state_data.len(),
            counties = data.county_data.len(),
            "datasets built"
        );
        Ok(data)
    }
}
