//! # Image Archive Module
//!
//! This module ties the fetcher, the scraper rule chain and the database together
//! behind the [`Images`] trait, the contract the web and CLI front ends call into.
//!
//! ## Inserting
//!
//! [`Archive::insert`] fetches the URL, fingerprints the body, asks the rule chain for
//! tags and stores a new record. When the URL is already archived the existing record
//! keeps its id and `added` time but its content (hash, size, blob, tags) is replaced
//! with the fresh fetch. Concurrent inserts of one URL are serialised only by the
//! unique index on `url`; whichever overwrite lands last wins.
//!
//! Tagging is best effort. A failing scraper is logged and the image is archived with
//! no tags.
//!
//! ## Querying
//!
//! [`Archive::recent`] and [`Archive::search`] never touch the network. Both exclude
//! soft-deleted images and return the newest images first.
//!
//! ## Error Handling
//!
//! [`AppError`] wraps fetch and database failures and adds the store-level
//! `NotFound` and `NotImplemented` conditions.

use crate::{
    database::{Database, DatabaseError},
    fetch::{FetchError, Fetcher},
    image::{ContentHash, Image, ImageId},
    query::{ImageFilter, ImageQuery, Page},
    scraper::{RuleChain, ScrapeError},
};
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use futures::future::join_all;
use std::{collections::BTreeSet, path::Path, sync::Arc};
use tracing::{error, info, warn};

/// The archive operations exposed to front ends.
#[async_trait]
pub trait Images: Send + Sync {
    /// Fetches `url` and archives it, reusing the existing identity if the URL is
    /// already stored.
    async fn insert(&self, url: &str) -> Result<Image, AppError>;

    /// Looks up an image by id, including soft-deleted images.
    async fn one(&self, id: &ImageId) -> Result<Image, AppError>;

    /// Adds `tags` to the image's tag set.
    async fn add_tags(&self, id: &ImageId, tags: &[String]) -> Result<(), AppError>;

    /// Not supported; always fails with [`AppError::NotImplemented`].
    async fn remove_tags(&self, id: &ImageId, tags: &[String]) -> Result<(), AppError>;

    /// Returns live images carrying any of `tags`, `page_size` per page.
    async fn search(
        &self,
        page_size: u32,
        page_number: i64,
        tags: &[String],
    ) -> Result<Vec<Image>, AppError>;

    /// Returns live images newest first, thirty per page.
    ///
    /// Negative page numbers yield an empty page.
    async fn recent(&self, page_number: i64) -> Result<Vec<Image>, AppError>;

    /// Marks the image as deleted. The record stays readable through [`Images::one`].
    async fn delete(&self, id: &ImageId) -> Result<(), AppError>;
}

/// The image store: fetcher, rule chain and database behind [`Images`].
#[derive(Clone)]
pub struct Archive {
    db: Database,
    fetcher: Arc<dyn Fetcher>,
    rules: Arc<RuleChain>,
    store_blobs: bool,
}

impl Archive {
    pub fn new(db: Database, fetcher: Arc<dyn Fetcher>, rules: RuleChain) -> Self {
        Self {
            db,
            fetcher,
            rules: Arc::new(rules),
            store_blobs: true,
        }
    }

    /// Sets whether fetched bytes are kept in the database.
    pub fn with_blobs(mut self, store_blobs: bool) -> Self {
        self.store_blobs = store_blobs;
        self
    }

    /// Returns the image with its bytes, refetching the URL if no copy is cached.
    pub async fn image_blob(&self, id: &ImageId) -> Result<Image, AppError> {
        let image = self.one(id).await?;
        if image.has_blob() {
            return Ok(image);
        }

        info!(image_id = %image.id, image_url = %image.url, "resyncing image without cached blob");
        self.insert(&image.url).await
    }

    /// Archives every link found in `text`.
    ///
    /// Each whitespace-separated word starting with `http` is inserted on its own; a
    /// failure is logged and does not affect the other links.
    pub async fn scan(&self, text: &str) -> Vec<(String, Result<Image, AppError>)> {
        let links = links_in(text);

        let results = join_all(links.iter().map(|url| self.insert(url))).await;

        links
            .into_iter()
            .zip(results)
            .inspect(|(url, result)| match result {
                Ok(image) => info!(image_id = %image.id, image_url = %url, "saved image"),
                Err(e) => error!(image_url = %url, error = %e, "failed to save image"),
            })
            .collect()
    }

    /// Counts live images, optionally restricted to those carrying any of `tags`.
    pub async fn count(&self, tags: Option<&[String]>) -> Result<u64, AppError> {
        let filter = match tags {
            Some(tags) => ImageFilter::AnyTag(tags.to_vec()),
            None => ImageFilter::All,
        };

        Ok(self.db.count_image(ImageQuery::new(filter)).await?)
    }

    /// Writes a snapshot of the whole archive to `path`.
    pub async fn backup_to(&self, path: &Path) -> Result<(), AppError> {
        Ok(self.db.backup_to(path).await?)
    }

    async fn scrape_tags(&self, url: &str) -> BTreeSet<String> {
        match self.rules.test(url).await {
            Ok(tags) => tags.into_iter().collect(),
            Err(ScrapeError::NotFound) => BTreeSet::new(),
            Err(e) => {
                error!(image_url = %url, error = %e, "scrape for tags");
                BTreeSet::new()
            }
        }
    }

    async fn page(&self, filter: ImageFilter, page: Page) -> Result<Vec<Image>, AppError> {
        let Some(query) = ImageQuery::new(filter).paged(page) else {
            return Ok(vec![]);
        };

        Ok(self.db.query_image(query).await?)
    }
}

#[async_trait]
impl Images for Archive {
    async fn insert(&self, url: &str) -> Result<Image, AppError> {
        let fetched = self.fetcher.fetch(url).await?;
        info!(image_url = %url, size = fetched.bytes.len(), "fetched image");

        let content_hash = ContentHash::of(&fetched.bytes);
        let tags = self.scrape_tags(url).await;

        let mut image = Image {
            id: ImageId::generate(),
            url: url.to_string(),
            added: Utc::now().trunc_subsecs(6),
            tags,
            content_hash,
            size: fetched.bytes.len() as u64,
            deleted: false,
            data: self.store_blobs.then(|| fetched.bytes.to_vec()),
            ext: fetched.ext,
            mime: fetched.mime,
        };

        match self.db.insert_image(&image).await {
            Ok(()) => {
                info!(
                    image_id = %image.id,
                    image_hash = %image.content_hash,
                    tag_count = image.tags.len(),
                    "archived image"
                );
                Ok(image)
            }
            Err(DatabaseError::UrlConflict { .. }) => {
                warn!(image_url = %url, image_hash = %image.content_hash, "repeat");

                let existing = self
                    .db
                    .get_image_by_url(url)
                    .await?
                    .ok_or_else(|| AppError::NotFound {
                        id: image.id.clone(),
                    })?;
                image.id = existing.id;
                self.db.overwrite_image(&image).await?;

                self.one(&image.id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn one(&self, id: &ImageId) -> Result<Image, AppError> {
        self.db
            .get_image(id)
            .await?
            .ok_or_else(|| AppError::NotFound { id: id.clone() })
    }

    async fn add_tags(&self, id: &ImageId, tags: &[String]) -> Result<(), AppError> {
        let tags: BTreeSet<String> = tags.iter().cloned().collect();

        if !self.db.ensure_image_has_tags(id, &tags).await? {
            return Err(AppError::NotFound { id: id.clone() });
        }

        Ok(())
    }

    async fn remove_tags(&self, _id: &ImageId, _tags: &[String]) -> Result<(), AppError> {
        Err(AppError::NotImplemented {
            operation: "remove_tags",
        })
    }

    async fn search(
        &self,
        page_size: u32,
        page_number: i64,
        tags: &[String],
    ) -> Result<Vec<Image>, AppError> {
        self.page(
            ImageFilter::AnyTag(tags.to_vec()),
            Page::new(page_size, page_number),
        )
        .await
    }

    async fn recent(&self, page_number: i64) -> Result<Vec<Image>, AppError> {
        self.page(ImageFilter::All, Page::recent(page_number)).await
    }

    async fn delete(&self, id: &ImageId) -> Result<(), AppError> {
        if !self.db.mark_deleted(id).await? {
            return Err(AppError::NotFound { id: id.clone() });
        }

        info!(image_id = %id, "deleted image");
        Ok(())
    }
}

/// Returns the words of `text` that look like links, in order of appearance.
pub fn links_in(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|word| word.starts_with("http"))
        .map(String::from)
        .collect()
}

/// Error types within the application, encapsulating fetch, database, and store errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("image not found: {id}")]
    NotFound { id: ImageId },

    #[error("{operation} is not implemented")]
    NotImplemented { operation: &'static str },
}
