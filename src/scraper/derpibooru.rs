//! Scrapers for Derpibooru image pages and CDN links.
//!
//! Both scrapers resolve a URL to a numeric image id and ask a [`TagSource`] for
//! the comma-separated tag string of that image.

use super::{RuleChain, ScrapeError, Scraper, split_tags};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tracing::debug;
use url::Url;

pub const DIRECT_HOST: &str = "derpibooru.org";
pub const CDN_HOST: &str = "derpicdn.net";
pub const DEFAULT_BASE_URL: &str = "https://derpibooru.org";

/// Upstream image metadata lookup by numeric id.
#[async_trait]
pub trait TagSource: Send + Sync {
    /// Returns the raw comma-separated tag string of image `id`.
    async fn tags_for(&self, id: u64) -> Result<String, ScrapeError>;
}

/// [`TagSource`] backed by the Derpibooru JSON API.
#[derive(Debug, Clone)]
pub struct DerpibooruApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    tags: String,
}

impl DerpibooruApi {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(crate::fetch::USER_AGENT)
            .build()?;

        Ok(Self::with_client(client, base_url, api_key))
    }

    pub fn with_client(client: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl TagSource for DerpibooruApi {
    async fn tags_for(&self, id: u64) -> Result<String, ScrapeError> {
        let mut request = self.client.get(format!("{}/{}.json", self.base_url, id));
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Upstream {
                status: status.as_u16(),
            });
        }

        let body: ImageResponse = response
            .json()
            .await
            .map_err(|e| ScrapeError::Malformed(e.to_string()))?;

        debug!(id, "fetched upstream tags");

        Ok(body.tags)
    }
}

fn host_is(url: &str, host: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == host))
        .unwrap_or(false)
}

/// Handles `https://derpibooru.org/<id>` image pages.
#[derive(Clone)]
pub struct DirectScraper {
    source: Arc<dyn TagSource>,
}

impl DirectScraper {
    pub fn new(source: Arc<dyn TagSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Scraper for DirectScraper {
    fn valid(&self, url: &str) -> bool {
        host_is(url, DIRECT_HOST)
    }

    async fn scrape(&self, url: &str) -> Result<Vec<String>, ScrapeError> {
        let parsed = Url::parse(url)?;

        let id: u64 = parsed
            .path()
            .trim_start_matches('/')
            .parse()
            .map_err(|_| ScrapeError::NotApplicable)?;

        let raw = self.source.tags_for(id).await?;

        Ok(split_tags(&raw))
    }
}

/// Handles CDN links whose filename looks like `<id>__<slug>.<ext>`.
#[derive(Clone)]
pub struct CdnScraper {
    source: Arc<dyn TagSource>,
}

impl CdnScraper {
    pub fn new(source: Arc<dyn TagSource>) -> Self {
        Self { source }
    }
}

/// Extracts the image id from a CDN filename, if it has the expected shape.
fn cdn_image_id(filename: &str) -> Option<u64> {
    let parts: Vec<&str> = filename.split("__").collect();
    if parts.len() != 2 {
        return None;
    }

    parts[0].parse().ok()
}

#[async_trait]
impl Scraper for CdnScraper {
    fn valid(&self, url: &str) -> bool {
        host_is(url, CDN_HOST)
    }

    async fn scrape(&self, url: &str) -> Result<Vec<String>, ScrapeError> {
        let parsed = Url::parse(url)?;
        let filename = parsed.path().rsplit('/').next().unwrap_or_default();

        let id = cdn_image_id(filename).ok_or(ScrapeError::NotApplicable)?;

        let raw = self.source.tags_for(id).await?;

        Ok(split_tags(&raw))
    }
}

/// The Derpibooru scrapers in evaluation order: image pages, then CDN links.
pub fn rule_chain(source: Arc<dyn TagSource>) -> RuleChain {
    RuleChain::default()
        .with(DirectScraper::new(source.clone()))
        .with(CdnScraper::new(source))
}
