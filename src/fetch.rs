//! Retrieval of remote media over HTTP.
//!
//! A [`Fetcher`] turns a URL into the raw body plus the declared MIME type and an
//! extension hint. Only `200 OK` responses carrying a whitelisted image content type
//! are accepted. Nothing is retried at this layer.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Content types accepted for archival.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif"];

/// User agent sent with every outbound request.
pub const USER_AGENT: &str = concat!(
    "kinq/",
    env!("CARGO_PKG_VERSION"),
    " (image archiver bot)"
);

/// Returns whether `content_type` is on the whitelist.
///
/// Media type parameters (`; charset=...`) are ignored and the comparison is
/// case-insensitive on the essence.
pub fn valid_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    ALLOWED_CONTENT_TYPES.contains(&essence.as_str())
}

/// Derives the extension hint (e.g. `.png`) from the final path segment of `url`.
///
/// Returns an empty string when the segment has no extension.
pub fn extension_hint(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    let base = path.rsplit('/').next().unwrap_or_default();

    match base.rfind('.') {
        Some(idx) if idx > 0 => base[idx..].to_string(),
        _ => String::new(),
    }
}

/// The body of a successful fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    /// Declared `Content-Type`, verbatim.
    pub mime: String,
    pub ext: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Fetched, FetchError>;
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Transport)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let response = self.client.get(parsed).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::FetchFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !valid_content_type(&content_type) {
            return Err(FetchError::UnsupportedContentType {
                url: url.to_string(),
                content_type,
            });
        }

        let bytes = response.bytes().await?;
        debug!(url, size = bytes.len(), "fetched body");

        Ok(Fetched {
            bytes,
            mime: content_type,
            ext: extension_hint(url),
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("expected http 200 from {url}, got: {status}")]
    FetchFailed { url: String, status: u16 },

    #[error("bad content type from {url}: {content_type:?}")]
    UnsupportedContentType { url: String, content_type: String },

    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::{FetchError, Fetcher, HttpFetcher, extension_hint, valid_content_type};
    use axum::{Router, http::header, routing::get};
    use std::time::Duration;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_valid_content_type() {
        assert!(valid_content_type("image/png"));
        assert!(valid_content_type("image/jpeg"));
        assert!(valid_content_type("image/gif"));
        assert!(valid_content_type("IMAGE/PNG; charset=binary"));
        assert!(!valid_content_type("image/webp"));
        assert!(!valid_content_type("text/html"));
        assert!(!valid_content_type(""));
    }

    #[test]
    fn test_extension_hint() {
        assert_eq!(".png", extension_hint("https://example.com/a/b.png"));
        assert_eq!(".jpeg", extension_hint("https://example.com/x.jpeg?size=large"));
        assert_eq!("", extension_hint("https://derpibooru.org/1234"));
        assert_eq!("", extension_hint("https://example.com/"));
        assert_eq!("", extension_hint("https://example.com/.hidden"));
    }

    #[tokio::test]
    async fn test_fetch_png() {
        let app = Router::new().route(
            "/cat.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![1u8, 2, 3, 4]) }),
        );
        let base = serve(app).await;

        let fetched = fetcher().fetch(&format!("{}/cat.png", base)).await.unwrap();

        assert_eq!(&[1u8, 2, 3, 4][..], &fetched.bytes[..]);
        assert_eq!("image/png", fetched.mime);
        assert_eq!(".png", fetched.ext);
    }

    #[tokio::test]
    async fn test_fetch_rejects_html() {
        let app = Router::new().route(
            "/page",
            get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<html></html>") }),
        );
        let base = serve(app).await;

        let result = fetcher().fetch(&format!("{}/page", base)).await;

        let Err(FetchError::UnsupportedContentType { content_type, .. }) = result else {
            panic!("Expected UnsupportedContentType, but got {:?}", result);
        };
        assert_eq!("text/html", content_type);
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_200() {
        let app = Router::new().route(
            "/gone.png",
            get(|| async {
                (
                    axum::http::StatusCode::NOT_FOUND,
                    [(header::CONTENT_TYPE, "image/png")],
                    "",
                )
            }),
        );
        let base = serve(app).await;

        let result = fetcher().fetch(&format!("{}/gone.png", base)).await;

        let Err(FetchError::FetchFailed { status, .. }) = result else {
            panic!("Expected FetchFailed, but got {:?}", result);
        };
        assert_eq!(404, status);
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let result = fetcher().fetch("not a url").await;

        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }
}
