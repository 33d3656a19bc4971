//! # Tag Scraping Module
//!
//! Tags for an archived URL are derived by a [`RuleChain`]: an ordered list of
//! [`Scraper`]s given at construction time.
//!
//! Each scraper has two levels of applicability. [`Scraper::valid`] is a cheap
//! pre-filter on the URL (usually the host). [`Scraper::scrape`] may still decline a
//! specific URL by returning [`ScrapeError::NotApplicable`], in which case the chain
//! moves on to the next scraper. The first successful scrape wins; any other error
//! aborts the chain.
//!
//! ```
//! # use kinq::scraper::{RuleChain, ScrapeError, Scraper};
//! # use async_trait::async_trait;
//! struct Fixed;
//!
//! #[async_trait]
//! impl Scraper for Fixed {
//!     fn valid(&self, url: &str) -> bool {
//!         url.starts_with("https://example.com/")
//!     }
//!
//!     async fn scrape(&self, _url: &str) -> Result<Vec<String>, ScrapeError> {
//!         Ok(vec!["example".to_string()])
//!     }
//! }
//!
//! # tokio_test(async {
//! let chain = RuleChain::new(vec![Box::new(Fixed)]);
//! assert_eq!(vec!["example"], chain.test("https://example.com/1.png").await.unwrap());
//! assert!(matches!(chain.test("https://other.org/").await, Err(ScrapeError::NotFound)));
//! # });
//! # fn tokio_test<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

pub mod derpibooru;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// A source of tags for URLs it recognises.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Coarse applicability check. Must be cheap and must not perform I/O.
    fn valid(&self, url: &str) -> bool;

    /// Extracts tags for `url`.
    ///
    /// Returns [`ScrapeError::NotApplicable`] when the URL turns out not to be
    /// something this scraper can handle after all.
    async fn scrape(&self, url: &str) -> Result<Vec<String>, ScrapeError>;
}

/// An ordered sequence of scrapers evaluated first-match-wins.
#[derive(Default)]
pub struct RuleChain {
    scrapers: Vec<Box<dyn Scraper>>,
}

impl RuleChain {
    pub fn new(scrapers: Vec<Box<dyn Scraper>>) -> Self {
        Self { scrapers }
    }

    /// Appends a scraper after the ones already registered.
    pub fn with<S: Scraper + 'static>(mut self, scraper: S) -> Self {
        self.scrapers.push(Box::new(scraper));
        self
    }

    pub fn len(&self) -> usize {
        self.scrapers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scrapers.is_empty()
    }

    /// Runs the chain against `url`.
    ///
    /// # Returns
    /// - `Ok(tags)` from the first scraper that claims the URL and scrapes it.
    /// - `Err(ScrapeError::NotFound)` when no scraper produced tags.
    /// - Any other error from the first scraper that failed hard. Later scrapers
    ///   are not consulted.
    pub async fn test(&self, url: &str) -> Result<Vec<String>, ScrapeError> {
        for (idx, scraper) in self.scrapers.iter().enumerate() {
            if !scraper.valid(url) {
                continue;
            }

            match scraper.scrape(url).await {
                Ok(tags) => return Ok(tags),
                Err(ScrapeError::NotApplicable) => {
                    debug!(url, rule = idx, "scraper declined url");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ScrapeError::NotFound)
    }
}

/// Splits an upstream comma-separated tag string into individual tags.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Chain-internal signal: the scraper claimed the URL but cannot handle it.
    #[error("this url is not applicable for this scraper")]
    NotApplicable,

    /// No scraper produced tags for the URL.
    #[error("no tags found for url")]
    NotFound,

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned http {status}")]
    Upstream { status: u16 },

    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::{RuleChain, ScrapeError, Scraper, split_tags};
    use async_trait::async_trait;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    enum Outcome {
        Tags(Vec<&'static str>),
        NotApplicable,
        Fail(u16),
    }

    struct Stub {
        valid: bool,
        outcome: Outcome,
        calls: Arc<AtomicUsize>,
    }

    impl Stub {
        fn new(valid: bool, outcome: Outcome) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    valid,
                    outcome,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Scraper for Stub {
        fn valid(&self, _url: &str) -> bool {
            self.valid
        }

        async fn scrape(&self, _url: &str) -> Result<Vec<String>, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Outcome::Tags(tags) => Ok(tags.iter().map(|t| t.to_string()).collect()),
                Outcome::NotApplicable => Err(ScrapeError::NotApplicable),
                Outcome::Fail(status) => Err(ScrapeError::Upstream { status: *status }),
            }
        }
    }

    const URL: &str = "https://example.com/1.png";

    #[tokio::test]
    async fn test_not_applicable_falls_through() {
        let (a, a_calls) = Stub::new(false, Outcome::Tags(vec!["a"]));
        let (b, b_calls) = Stub::new(true, Outcome::NotApplicable);
        let (c, _) = Stub::new(true, Outcome::Tags(vec!["x"]));

        let chain = RuleChain::default().with(a).with(b).with(c);

        assert_eq!(vec!["x".to_string()], chain.test(URL).await.unwrap());
        assert_eq!(0, a_calls.load(Ordering::SeqCst));
        assert_eq!(1, b_calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let (a, _) = Stub::new(true, Outcome::Tags(vec!["first"]));
        let (b, b_calls) = Stub::new(true, Outcome::Tags(vec!["second"]));

        let chain = RuleChain::default().with(a).with(b);

        assert_eq!(vec!["first".to_string()], chain.test(URL).await.unwrap());
        assert_eq!(0, b_calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_hard_error_aborts_chain() {
        let (a, _) = Stub::new(true, Outcome::Fail(503));
        let (b, b_calls) = Stub::new(true, Outcome::Tags(vec!["never"]));

        let chain = RuleChain::default().with(a).with(b);

        let result = chain.test(URL).await;
        let Err(ScrapeError::Upstream { status }) = result else {
            panic!("Expected upstream error, but got {:?}", result);
        };
        assert_eq!(503, status);
        assert_eq!(0, b_calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let (a, _) = Stub::new(false, Outcome::Tags(vec!["a"]));
        let chain = RuleChain::default().with(a);

        assert!(matches!(chain.test(URL).await, Err(ScrapeError::NotFound)));
        assert!(matches!(
            RuleChain::default().test(URL).await,
            Err(ScrapeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_not_found() {
        let (a, _) = Stub::new(true, Outcome::NotApplicable);
        let (b, _) = Stub::new(true, Outcome::NotApplicable);
        let chain = RuleChain::default().with(a).with(b);

        assert!(matches!(chain.test(URL).await, Err(ScrapeError::NotFound)));
    }

    #[test]
    fn test_split_tags() {
        assert_eq!(
            vec!["safe", "artist:foo", "solo"],
            split_tags("safe, artist:foo, solo")
        );
        assert!(split_tags("").is_empty());
        assert_eq!(vec!["a", "b"], split_tags("a,, b ,"));
    }
}
