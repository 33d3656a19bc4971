//! # Image Archival Engine
//!
//! This crate archives remote images by URL. Every archived image is fetched over
//! HTTP, fingerprinted, tagged by a chain of metadata scrapers and stored in SQLite.
//! The primary functionality is exposed through the [`app::Images`] trait, implemented
//! by [`app::Archive`].
//!
//! ## Features
//!
//! - **Dedup by URL**: archiving a URL twice keeps one record and one id; the second
//!   fetch refreshes the stored content.
//! - **Scraper rule chain**: tags come from the first scraper that both claims and
//!   handles the URL (see [`scraper`]).
//! - **Indexed queries**: newest-first listings and tag search with limit/offset
//!   pagination (see [`query`]).
//! - **Soft delete**: deleted images stay readable by id and drop out of listings.
//!
//! ## Usage
//!
//! ```no_run
//! use kinq::prelude::*;
//!
//! async fn archive_one(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
//!     let archive = config.open_archive().await?;
//!
//!     let image = archive.insert("https://derpicdn.net/img/1234__safe_pony.png").await?;
//!     archive.add_tags(&image.id, &["favourite".to_string()]).await?;
//!
//!     for image in archive.recent(0).await? {
//!         println!("{} {}", image.id, image.url);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod database;
mod dialect;
pub mod fetch;
pub mod image;
pub mod query;
pub mod scraper;

pub mod prelude {
    pub use crate::app::{AppError, Archive, Images};
    pub use crate::config::Config;
    pub use crate::database::Database;
    pub use crate::fetch::{Fetcher, HttpFetcher};
    pub use crate::image::{ContentHash, Image, ImageId};
    pub use crate::query::{Page, RECENT_PAGE_SIZE};
    pub use crate::scraper::{RuleChain, ScrapeError, Scraper};
}
