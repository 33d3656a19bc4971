use crate::{
    dialect::{CurrentDialect, CurrentRow, Dialect},
    image::{ContentHash, Image, ImageId},
    query::{ImageQuery, SqlParam},
};
use chrono::{DateTime, Utc};
pub use sqlx::Pool;
use sqlx::{Execute, FromRow, Row};
use std::{collections::BTreeSet, path::Path};
use thiserror::Error;

pub use crate::dialect::Db;

pub async fn run_migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
    CurrentDialect::migration(pool).await
}

/// An `images` row without its tags.
struct ImageRow(Image);

impl FromRow<'_, CurrentRow> for ImageRow {
    fn from_row(row: &CurrentRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let url: String = row.try_get("url")?;
        let added: i64 = row.try_get("added")?;
        let content_hash: String = row.try_get("content_hash")?;
        let size: i64 = row.try_get("size")?;
        let deleted: bool = row.try_get("deleted")?;
        let data: Option<Vec<u8>> = row.try_get("data")?;
        let ext: String = row.try_get("ext")?;
        let mime: String = row.try_get("mime")?;

        let added = DateTime::<Utc>::from_timestamp_micros(added).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: "added".to_string(),
                source: format!("timestamp out of range: {}", added).into(),
            }
        })?;
        let content_hash: ContentHash =
            content_hash
                .parse()
                .map_err(|e| sqlx::Error::ColumnDecode {
                    index: "content_hash".to_string(),
                    source: Box::new(e),
                })?;

        Ok(ImageRow(Image {
            id: ImageId::from(id),
            url,
            added,
            tags: BTreeSet::new(),
            content_hash,
            size: size as u64,
            deleted,
            data,
            ext,
            mime,
        }))
    }
}

/// A database abstraction over the `images` and `image_tags` tables.
///
/// This struct wraps an SQLx connection pool. Each image is one row keyed by id with
/// a unique URL; tags live in a separate relation so that a tag set can never hold
/// duplicates. SQL text is delegated to `Dialect`.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Db>,
}

impl Database {
    pub async fn with_migration(pool: sqlx::Pool<Db>) -> Result<Self, sqlx::Error> {
        run_migration(&pool).await?;

        Ok(Self { pool })
    }

    async fn retry<F, Fut, T>(&self, mut op: F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DatabaseError>>,
    {
        let max_retries = 3;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Err(ref e) if e.is_retryable() && attempt < max_retries => {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
                result => return result,
            }
        }
    }

    /// Inserts a new image together with its tags in one transaction.
    ///
    /// Returns `DatabaseError::UrlConflict` if an image with the same URL is already
    /// stored; nothing is written in that case.
    pub async fn insert_image(&self, image: &Image) -> Result<(), DatabaseError> {
        let stmt = CurrentDialect::insert_image_statement();

        self.retry(|| async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DatabaseError::TransactionFailed { source: e })?;

            let query = sqlx::query(&stmt)
                .bind(image.id.as_str())
                .bind(&image.url)
                .bind(image.added.timestamp_micros())
                .bind(image.content_hash.to_string())
                .bind(image.size as i64)
                .bind(image.deleted)
                .bind(image.data.as_deref())
                .bind(&image.ext)
                .bind(&image.mime);
            let sql = query.sql();

            query.execute(&mut *tx).await.map_err(|e| {
                if CurrentDialect::is_url_conflict(&e) {
                    DatabaseError::UrlConflict {
                        url: image.url.clone(),
                    }
                } else {
                    DatabaseError::QueryFailed {
                        operation: DbOperation::InsertImage {
                            id: image.id.clone(),
                        },
                        sql: sql.to_string(),
                        source: e,
                    }
                }
            })?;

            insert_tags(&mut tx, &image.id, &image.tags).await?;

            tx.commit()
                .await
                .map_err(|e| DatabaseError::TransactionFailed { source: e })
        })
        .await
    }

    /// Replaces the fetched content of image `image.id` with the given values.
    ///
    /// `added` and `deleted` keep their stored values. A missing blob keeps the stored
    /// blob, and an empty tag set keeps the stored tags; otherwise the tag set is
    /// replaced wholesale.
    pub async fn overwrite_image(&self, image: &Image) -> Result<(), DatabaseError> {
        let stmt = CurrentDialect::overwrite_image_statement();
        let stmt_clear = CurrentDialect::delete_tags_by_image_statement();

        self.retry(|| async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DatabaseError::TransactionFailed { source: e })?;

            sqlx::query(&stmt)
                .bind(image.content_hash.to_string())
                .bind(image.size as i64)
                .bind(image.data.as_deref())
                .bind(&image.ext)
                .bind(&image.mime)
                .bind(image.id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::OverwriteImage {
                        id: image.id.clone(),
                    },
                    sql: stmt.clone(),
                    source: e,
                })?;

            if !image.tags.is_empty() {
                sqlx::query(&stmt_clear)
                    .bind(image.id.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::DeleteImageTags {
                            id: image.id.clone(),
                        },
                        sql: stmt_clear.clone(),
                        source: e,
                    })?;

                insert_tags(&mut tx, &image.id, &image.tags).await?;
            }

            tx.commit()
                .await
                .map_err(|e| DatabaseError::TransactionFailed { source: e })
        })
        .await
    }

    /// Adds `tags` to image `id` in one transaction.
    ///
    /// Every tag is written with an `INSERT OR IGNORE` guarded by the image's existence,
    /// so concurrent callers cannot lose each other's tags. Existence is checked after
    /// the writes, inside the same transaction. Returns `false` if the image does not
    /// exist.
    pub async fn ensure_image_has_tags(
        &self,
        id: &ImageId,
        tags: &BTreeSet<String>,
    ) -> Result<bool, DatabaseError> {
        let stmt_tag = CurrentDialect::tag_existing_image_statement();
        let stmt_exists = CurrentDialect::image_exists_statement();

        self.retry(|| async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| DatabaseError::TransactionFailed { source: e })?;

            for tag in tags {
                sqlx::query(&stmt_tag)
                    .bind(tag)
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::InsertImageTag {
                            id: id.clone(),
                            tag: tag.clone(),
                        },
                        sql: stmt_tag.clone(),
                        source: e,
                    })?;
            }

            let exists = sqlx::query(&stmt_exists)
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::QueryImage { id: id.clone() },
                    sql: stmt_exists.clone(),
                    source: e,
                })?
                .is_some();

            tx.commit()
                .await
                .map_err(|e| DatabaseError::TransactionFailed { source: e })?;

            Ok(exists)
        })
        .await
    }

    /// Sets the soft-delete flag. Returns `false` if the image does not exist.
    pub async fn mark_deleted(&self, id: &ImageId) -> Result<bool, DatabaseError> {
        let stmt = CurrentDialect::update_deleted_statement();

        let result = self
            .retry(|| async {
                sqlx::query(&stmt)
                    .bind(true)
                    .bind(id.as_str())
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::UpdateDeleted { id: id.clone() },
                        sql: stmt.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Looks up an image by id, deleted or not.
    pub async fn get_image(&self, id: &ImageId) -> Result<Option<Image>, DatabaseError> {
        let stmt = CurrentDialect::query_image_by_id_statement();

        let row: Option<ImageRow> = self
            .retry(|| async {
                sqlx::query_as(&stmt)
                    .bind(id.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::QueryImage { id: id.clone() },
                        sql: stmt.clone(),
                        source: e,
                    })
            })
            .await?;

        match row {
            Some(ImageRow(image)) => Ok(Some(self.with_tags(image).await?)),
            None => Ok(None),
        }
    }

    /// Looks up an image by its origin URL, deleted or not.
    pub async fn get_image_by_url(&self, url: &str) -> Result<Option<Image>, DatabaseError> {
        let stmt = CurrentDialect::query_image_by_url_statement();

        let row: Option<ImageRow> = self
            .retry(|| async {
                sqlx::query_as(&stmt)
                    .bind(url)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::QueryImageByUrl {
                            url: url.to_string(),
                        },
                        sql: stmt.clone(),
                        source: e,
                    })
            })
            .await?;

        match row {
            Some(ImageRow(image)) => Ok(Some(self.with_tags(image).await?)),
            None => Ok(None),
        }
    }

    /// Returns the tags of image `id`, sorted. Empty if the image has none.
    pub async fn get_tags(&self, id: &ImageId) -> Result<BTreeSet<String>, DatabaseError> {
        let stmt = CurrentDialect::query_tags_by_image_statement();

        let rows: Vec<String> = self
            .retry(|| async {
                sqlx::query_scalar(&stmt)
                    .bind(id.as_str())
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::QueryImageTags { id: id.clone() },
                        sql: stmt.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(rows.into_iter().collect())
    }

    /// Runs an [`ImageQuery`] and returns the matching images in query order.
    pub async fn query_image(&self, query: ImageQuery) -> Result<Vec<Image>, DatabaseError> {
        let (sql, params) = query.to_sql();
        let stmt = CurrentDialect::query_image_statement(sql);

        let rows: Vec<ImageRow> = self
            .retry(|| async {
                let mut q = sqlx::query_as::<_, ImageRow>(&stmt);

                for param in &params {
                    q = match param {
                        SqlParam::Text(s) => q.bind(s.clone()),
                        SqlParam::Int(i) => q.bind(*i),
                    };
                }

                q.fetch_all(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::QueryImages,
                        sql: stmt.clone(),
                        source: e,
                    })
            })
            .await?;

        let mut images = Vec::with_capacity(rows.len());
        for ImageRow(image) in rows {
            images.push(self.with_tags(image).await?);
        }

        Ok(images)
    }

    /// Counts the images matching `query`, ignoring its pagination.
    pub async fn count_image(&self, query: ImageQuery) -> Result<u64, DatabaseError> {
        let (sql, params) = query.to_where_sql();
        let stmt = CurrentDialect::count_image_statement(sql);

        let count: i64 = self
            .retry(|| async {
                let mut q = sqlx::query_scalar::<_, i64>(&stmt);

                for param in &params {
                    q = match param {
                        SqlParam::Text(s) => q.bind(s.clone()),
                        SqlParam::Int(i) => q.bind(*i),
                    };
                }

                q.fetch_one(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::CountImages,
                        sql: stmt.clone(),
                        source: e,
                    })
            })
            .await?;

        Ok(count as u64)
    }

    /// Writes a consistent snapshot of the database to `path`.
    ///
    /// The target file must not exist yet.
    pub async fn backup_to(&self, path: &Path) -> Result<(), DatabaseError> {
        let stmt = CurrentDialect::backup_statement();
        let target = path.to_string_lossy().to_string();

        self.retry(|| async {
            sqlx::query(&stmt)
                .bind(&target)
                .execute(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::Backup {
                        path: target.clone(),
                    },
                    sql: stmt.clone(),
                    source: e,
                })
        })
        .await?;

        Ok(())
    }

    async fn with_tags(&self, mut image: Image) -> Result<Image, DatabaseError> {
        image.tags = self.get_tags(&image.id).await?;
        Ok(image)
    }
}

async fn insert_tags(
    tx: &mut sqlx::Transaction<'_, Db>,
    id: &ImageId,
    tags: &BTreeSet<String>,
) -> Result<(), DatabaseError> {
    let stmt = CurrentDialect::ensure_image_tag_statement();

    for tag in tags {
        sqlx::query(&stmt)
            .bind(id.as_str())
            .bind(tag)
            .execute(&mut **tx)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                operation: DbOperation::InsertImageTag {
                    id: id.clone(),
                    tag: tag.clone(),
                },
                sql: stmt.clone(),
                source: e,
            })?;
    }

    Ok(())
}

/// Represents errors that can occur during database operations.
///
/// Each variant includes contextual information to assist with debugging and error handling.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A general SQL query failure, with full context including operation and SQL.
    #[error("Query failed during {operation:?}: sql={sql}")]
    QueryFailed {
        operation: DbOperation,
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    /// A failure to begin or commit a transaction.
    #[error("Failed to operate transaction")]
    TransactionFailed {
        #[source]
        source: sqlx::Error,
    },

    /// The unique constraint on the image URL rejected an insert.
    #[error("an image with url {url} already exists")]
    UrlConflict { url: String },
}

/// Enum representing the kind of database operation being performed,
/// used for attaching context to [`DatabaseError::QueryFailed`].
#[derive(Debug)]
pub enum DbOperation {
    /// INSERT INTO images
    InsertImage { id: ImageId },
    /// UPDATE images SET content_hash = ...
    OverwriteImage { id: ImageId },
    /// UPDATE images SET deleted = ...
    UpdateDeleted { id: ImageId },
    /// INSERT INTO image_tags
    InsertImageTag { id: ImageId, tag: String },
    /// DELETE FROM image_tags WHERE image_id = ...
    DeleteImageTags { id: ImageId },
    /// SELECT ... FROM images WHERE id = ...
    QueryImage { id: ImageId },
    /// SELECT ... FROM images WHERE url = ...
    QueryImageByUrl { url: String },
    /// SELECT tag FROM image_tags WHERE image_id = ...
    QueryImageTags { id: ImageId },
    /// General image query using dynamic conditions
    QueryImages,
    CountImages,
    Backup { path: String },
}

impl DatabaseError {
    fn is_retryable(&self) -> bool {
        let is_retryable_kind = |e: &sqlx::Error| {
            matches!(e, sqlx::Error::Io(_))
                || matches!(e, sqlx::Error::Protocol(_))
                || matches!(e, sqlx::Error::PoolTimedOut)
                || CurrentDialect::is_busy(e)
        };

        match self {
            DatabaseError::QueryFailed { source, .. } => is_retryable_kind(source),
            DatabaseError::TransactionFailed { source } => is_retryable_kind(source),
            DatabaseError::UrlConflict { .. } => false,
        }
    }
}
