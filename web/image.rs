use crate::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use kinq::{
    app::{AppError, Images},
    fetch::FetchError,
    image::{Image, ImageId},
    query::{Page, RECENT_PAGE_SIZE},
};
use serde::{Deserialize, Serialize};
use tracing::error;

const IMAGE_HASH: HeaderName = HeaderName::from_static("image-hash");
const CREATED_AT: HeaderName = HeaderName::from_static("created-at");

#[derive(Deserialize)]
pub struct RecentQuery {
    page: Option<i64>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    tags: Option<String>, // e.g. "cute cat"
    page: Option<i64>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct InsertRequest {
    url: String,
}

#[derive(Deserialize)]
pub struct TagsRequest {
    tags: Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct ImageListResponse {
    pub images: Vec<Image>,
    pub next_page: i64,
    pub prev_page: i64,
    /// Number of live images matching the listing, across all pages.
    pub total: u64,
}

impl ImageListResponse {
    fn new(images: Vec<Image>, page: Page, total: u64) -> Self {
        Self {
            images,
            total,
            next_page: page.next().number,
            prev_page: page.prev().number,
        }
    }
}

pub async fn get_recent(
    State(app): State<AppState>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<ImageListResponse>, ImageError> {
    let page = Page::recent(params.page.unwrap_or(0));
    let images = app.archive.recent(page.number).await?;
    let total = app.archive.count(None).await?;

    Ok(Json(ImageListResponse::new(images, page, total)))
}

pub async fn search_images(
    State(app): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<ImageListResponse>, ImageError> {
    let tags = params
        .tags
        .unwrap_or_default()
        .split_whitespace()
        .map(String::from)
        .collect::<Vec<_>>();
    let page = Page::new(
        params.limit.unwrap_or(RECENT_PAGE_SIZE),
        params.page.unwrap_or(0),
    );

    let images = app.archive.search(page.size, page.number, &tags).await?;
    let total = app.archive.count(Some(tags.as_slice())).await?;

    Ok(Json(ImageListResponse::new(images, page, total)))
}

pub async fn post_image(
    State(app): State<AppState>,
    Json(body): Json<InsertRequest>,
) -> Result<Json<Image>, ImageError> {
    let image = app.archive.insert(&body.url).await?;

    Ok(Json(image))
}

pub async fn get_image_json(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Image>, ImageError> {
    let image = app.archive.one(&ImageId::from(id)).await?;

    Ok(Json(image))
}

pub async fn get_image_blob(
    State(app): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ImageError> {
    let id = ImageId::from(id);
    let image = app.archive.image_blob(&id).await?;
    let Some(data) = image.data else {
        return Err(AppError::NotFound { id }.into());
    };

    let etag = format!("W/\"{}\"", image.content_hash);

    let matched = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "*" || v.contains(&etag));
    if matched {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    Ok((
        [
            (header::CONTENT_TYPE, image.mime),
            (CREATED_AT, image.added.to_rfc3339()),
            (IMAGE_HASH, image.content_hash.to_string()),
            (header::ETAG, etag),
        ],
        Body::from(data),
    )
        .into_response())
}

pub async fn post_tags(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TagsRequest>,
) -> Result<Json<Image>, ImageError> {
    let id = ImageId::from(id);
    app.archive.add_tags(&id, &body.tags).await?;

    Ok(Json(app.archive.one(&id).await?))
}

// Tag removal is unsupported, so the request body is never read.
pub async fn delete_tags(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ImageError> {
    app.archive.remove_tags(&ImageId::from(id), &[]).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_image(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ImageError> {
    app.archive.delete(&ImageId::from(id)).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_backup(State(app): State<AppState>) -> Result<Response, ImageError> {
    let dir = tempfile::tempdir().map_err(ImageError::Backup)?;
    let path = dir.path().join("kinq.db");

    app.archive.backup_to(&path).await?;
    let bytes = tokio::fs::read(&path).await.map_err(ImageError::Backup)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CONTENT_DISPOSITION, r#"attachment; filename="kinq.db""#),
        ],
        Body::from(bytes),
    )
        .into_response())
}

pub enum ImageError {
    App(AppError),

    Backup(std::io::Error),
}

impl From<AppError> for ImageError {
    fn from(value: AppError) -> Self {
        ImageError::App(value)
    }
}

impl IntoResponse for ImageError {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message) = match self {
            ImageError::App(app_error) => {
                let status = match &app_error {
                    AppError::NotFound { .. } => StatusCode::NOT_FOUND,
                    AppError::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
                    AppError::Fetch(FetchError::UnsupportedContentType { .. }) => {
                        StatusCode::UNSUPPORTED_MEDIA_TYPE
                    }
                    AppError::Fetch(FetchError::FetchFailed { .. }) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, app_error.to_string())
            }
            ImageError::Backup(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        if status.is_server_error() {
            error!(status = %status, error = %message, "request failed");
        }

        (status, Json(ErrorResponse { message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::ImageError;
    use axum::{http::StatusCode, response::IntoResponse};
    use kinq::{app::AppError, database::DatabaseError, fetch::FetchError, image::ImageId};

    fn status(error: impl Into<ImageError>) -> StatusCode {
        error.into().into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            StatusCode::NOT_FOUND,
            status(AppError::NotFound {
                id: ImageId::from("missing"),
            })
        );
        assert_eq!(
            StatusCode::NOT_IMPLEMENTED,
            status(AppError::NotImplemented {
                operation: "remove_tags",
            })
        );
        assert_eq!(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            status(AppError::Fetch(FetchError::UnsupportedContentType {
                url: "https://example.com/".to_string(),
                content_type: "text/html".to_string(),
            }))
        );
        assert_eq!(
            StatusCode::BAD_GATEWAY,
            status(AppError::Fetch(FetchError::FetchFailed {
                url: "https://example.com/a.png".to_string(),
                status: 404,
            }))
        );
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            status(AppError::Database(DatabaseError::UrlConflict {
                url: "https://example.com/a.png".to_string(),
            }))
        );
        assert_eq!(
            StatusCode::INTERNAL_SERVER_ERROR,
            status(ImageError::Backup(std::io::Error::other("disk full")))
        );
    }
}
