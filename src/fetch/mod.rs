// src/fetch/mod.rs

pub mod sources;

use anyhow::Result;
use futures::future::BoxFuture;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::FetchConfig;

/// Outbound fetch capability. Never fails: a source that cannot be read
/// yields empty content.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, String>;
}

/// reqwest-backed fetcher with a per-request timeout and retry with doubling backoff.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: usize,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
        })
    }

    async fn try_fetch(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    async fn fetch_with_retry(&self, url: &str) -> String {
        let mut delay = self.retry_delay;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_fetch(url).await {
                Ok(body) => {
                    debug!(url, attempt, bytes = body.len(), "fetched");
                    return body;
                }
                Err(e) if attempt < self.max_retries => {
                    debug!(url, attempt, error = %e, "fetch failed, retrying");
                    sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "fetch failed, using empty content");
                    return String::new();
                }
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, String> {
        Box::pin(self.fetch_with_retry(url))
    }
}
