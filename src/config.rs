//! Process configuration read from the environment.
//!
//! Call [`Config::from_env`] after `dotenvy::dotenv()` so a local `.env` file is
//! honoured.

use crate::{
    app::Archive,
    database::{Database, Db, Pool},
    fetch::{FetchError, HttpFetcher},
    scraper::{
        RuleChain, ScrapeError,
        derpibooru::{self, DEFAULT_BASE_URL, DerpibooruApi, TagSource},
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:./db/kinq.db";
pub const DEFAULT_PORT: u16 = 9001;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub derpibooru_api_key: Option<String>,
    pub derpibooru_base_url: String,
    pub fetch_timeout: Duration,
    /// Whether fetched bytes are stored in the database.
    pub store_blobs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            port: DEFAULT_PORT,
            derpibooru_api_key: None,
            derpibooru_base_url: DEFAULT_BASE_URL.to_string(),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            store_blobs: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: v,
            })?,
            None => defaults.port,
        };

        let fetch_timeout = match get("FETCH_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse().map_err(|_| ConfigError::Invalid {
                key: "FETCH_TIMEOUT_SECS",
                value: v,
            })?),
            None => defaults.fetch_timeout,
        };

        let store_blobs = match get("STORE_BLOBS") {
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "STORE_BLOBS",
                        value: v,
                    });
                }
            },
            None => defaults.store_blobs,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            port,
            derpibooru_api_key: get("DERPIBOORU_API_KEY"),
            derpibooru_base_url: get("DERPIBOORU_BASE_URL").unwrap_or(defaults.derpibooru_base_url),
            fetch_timeout,
            store_blobs,
        })
    }

    /// The scrapers in evaluation order: Derpibooru pages, then Derpibooru CDN links.
    pub fn rule_chain(&self) -> Result<RuleChain, ConfigError> {
        let api: Arc<dyn TagSource> = Arc::new(DerpibooruApi::new(
            &self.derpibooru_base_url,
            self.derpibooru_api_key.clone(),
            self.fetch_timeout,
        )?);

        Ok(derpibooru::rule_chain(api))
    }

    /// Opens and migrates the database, then assembles the archive.
    ///
    /// A file database is created if missing, along with its parent directory.
    pub async fn open_archive(&self) -> Result<Archive, ConfigError> {
        let options = SqliteConnectOptions::from_str(&self.database_url)?.create_if_missing(true);
        if let Some(dir) = options
            .get_filename()
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(dir).await?;
        }

        let pool: Pool<Db> = SqlitePoolOptions::new().connect_with(options).await?;
        let db = Database::with_migration(pool).await?;
        let fetcher = Arc::new(HttpFetcher::new(self.fetch_timeout)?);

        Ok(Archive::new(db, fetcher, self.rule_chain()?).with_blobs(self.store_blobs))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("failed to open database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build http client: {0}")]
    Fetcher(#[from] FetchError),

    #[error("failed to build scraper client: {0}")]
    Scraper(#[from] ScrapeError),
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError, DEFAULT_DATABASE_URL};
    use crate::app::Images;
    use std::{collections::HashMap, time::Duration};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(Config::default(), config);
        assert_eq!(DEFAULT_DATABASE_URL, config.database_url);
        assert!(config.store_blobs);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("PORT", "8080"),
            ("DERPIBOORU_API_KEY", "secret"),
            ("FETCH_TIMEOUT_SECS", "5"),
            ("STORE_BLOBS", "off"),
            ("DERPIBOORU_BASE_URL", ""),
        ]))
        .unwrap();

        assert_eq!("sqlite::memory:", config.database_url);
        assert_eq!(8080, config.port);
        assert_eq!(Some("secret".to_string()), config.derpibooru_api_key);
        assert_eq!(Duration::from_secs(5), config.fetch_timeout);
        assert!(!config.store_blobs);
        assert_eq!(Config::default().derpibooru_base_url, config.derpibooru_base_url);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("PORT", "ninety")])),
            Err(ConfigError::Invalid { key: "PORT", .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("STORE_BLOBS", "maybe")])),
            Err(ConfigError::Invalid { key: "STORE_BLOBS", .. })
        ));
    }

    #[test]
    fn test_rule_chain_builds_derpibooru_scrapers() {
        let chain = Config::default().rule_chain().unwrap();

        assert_eq!(2, chain.len());
    }

    #[tokio::test]
    async fn test_open_archive_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db").join("kinq.db");
        let config = Config {
            database_url: format!("sqlite:{}", path.display()),
            ..Config::default()
        };

        let archive = config.open_archive().await.unwrap();

        assert!(path.exists());
        assert!(archive.recent(0).await.unwrap().is_empty());
    }
}
