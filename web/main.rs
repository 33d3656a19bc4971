mod image;

use axum::{
    Router,
    extract::Request,
    http::HeaderName,
    routing::{delete, get, post},
};
use kinq::prelude::*;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const INFO: &str = "\
This is a private image archive.

If this address shows up in your access logs, an image hosted on your site
was saved here. Contact the operator of this instance if you want an image
removed.
";

#[derive(Clone)]
pub struct AppState {
    pub archive: Arc<Archive>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kinq=info,web=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let archive = config.open_archive().await?;
    tracing::info!(database_url = %config.database_url, "archive opened");

    let app = router(AppState {
        archive: Arc::new(archive),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the routes with request id and access log middleware.
///
/// Layers apply bottom-up: the request id is set first, so the access log span and
/// the response both carry it.
fn router(state: AppState) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/images", post(image::post_image))
        .route("/images/recent", get(image::get_recent))
        .route("/images/search", get(image::search_images))
        .route("/images/backup", get(image::get_backup))
        .route("/images/id/{id}", delete(image::delete_image))
        .route("/images/id/{id}/json", get(image::get_image_json))
        .route("/images/id/{id}/img", get(image::get_image_blob))
        .route(
            "/images/id/{id}/tags",
            post(image::post_tags).delete(image::delete_tags),
        )
        .layer(PropagateRequestIdLayer::new(REQUEST_ID))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();

                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(REQUEST_ID, MakeRequestUuid))
        .with_state(state)
}

async fn info() -> &'static str {
    INFO
}

#[cfg(test)]
mod tests {
    use super::{AppState, REQUEST_ID, router};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use kinq::prelude::*;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn state() -> AppState {
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            ..Config::default()
        };

        AppState {
            archive: Arc::new(config.open_archive().await.unwrap()),
        }
    }

    #[tokio::test]
    async fn test_request_id_is_set() {
        let app = router(state().await);

        let response = app
            .oneshot(Request::get("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(StatusCode::OK, response.status());
        assert!(!response.headers()[REQUEST_ID].is_empty());
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let app = router(state().await);

        let response = app
            .oneshot(
                Request::get("/info")
                    .header(REQUEST_ID, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!("req-42", response.headers()[REQUEST_ID]);
    }
}
