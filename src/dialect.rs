//! # SQL Dialect Module
//!
//! The `Dialect` trait keeps SQL text out of the database layer. Every statement the
//! archive executes is produced here, with placeholders rendered by the dialect
//! selected at compile time through feature flags.
//!
//! ## Key Components
//! - **`Dialect` Trait**: statement builders for the `images` and `image_tags` tables.
//! - **`CurrentDialect` Alias**: the dialect chosen by the enabled backend feature.

#[cfg(feature = "sqlite")]
mod sqlite;

/// The current SQL dialect used at compile time, determined by feature flags.
#[cfg(feature = "sqlite")]
pub type CurrentDialect = sqlite::SqliteDialect;

#[cfg(feature = "sqlite")]
pub type Db = sqlx::Sqlite;

#[cfg(feature = "sqlite")]
pub type CurrentRow = sqlx::sqlite::SqliteRow;

/// Columns of the `images` table, in the order every SELECT returns them.
pub const IMAGE_COLUMNS: &str = "id, url, added, content_hash, size, deleted, data, ext, mime";

/// A trait for SQL dialects to support database-specific query generation.
pub trait Dialect {
    /// Returns the SQL placeholder for the given 1-based parameter index.
    fn placeholder(idx: usize) -> String;

    /// Creates tables and indexes. Must be safe to run repeatedly.
    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error>;

    /// Returns whether `err` is the unique violation on `images.url`.
    fn is_url_conflict(err: &sqlx::Error) -> bool;

    /// Returns whether `err` means the database was locked by another connection.
    fn is_busy(err: &sqlx::Error) -> bool;

    /// Returns a SQL `EXISTS` subquery matching images tagged with any of `count` tags,
    /// starting at parameter index `first`.
    fn any_tag_query(first: usize, count: usize) -> String {
        let placeholders = (first..first + count)
            .map(Self::placeholder)
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "EXISTS (SELECT 1 FROM image_tags WHERE image_tags.image_id = images.id AND image_tags.tag IN ({}))",
            placeholders
        )
    }

    fn insert_image_statement() -> String {
        format!(
            "INSERT INTO images ({}) VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {})",
            IMAGE_COLUMNS,
            Self::placeholder(1),
            Self::placeholder(2),
            Self::placeholder(3),
            Self::placeholder(4),
            Self::placeholder(5),
            Self::placeholder(6),
            Self::placeholder(7),
            Self::placeholder(8),
            Self::placeholder(9),
        )
    }

    /// Refreshes the fetched content of an existing row.
    ///
    /// `id`, `url`, `added` and `deleted` are left untouched. A NULL blob keeps the
    /// stored one.
    fn overwrite_image_statement() -> String {
        format!(
            "UPDATE images SET content_hash = {}, size = {}, data = COALESCE({}, data), ext = {}, mime = {} WHERE id = {}",
            Self::placeholder(1),
            Self::placeholder(2),
            Self::placeholder(3),
            Self::placeholder(4),
            Self::placeholder(5),
            Self::placeholder(6),
        )
    }

    fn update_deleted_statement() -> String {
        format!(
            "UPDATE images SET deleted = {} WHERE id = {}",
            Self::placeholder(1),
            Self::placeholder(2)
        )
    }

    fn query_image_by_id_statement() -> String {
        format!(
            "SELECT {} FROM images WHERE id = {}",
            IMAGE_COLUMNS,
            Self::placeholder(1)
        )
    }

    fn query_image_by_url_statement() -> String {
        format!(
            "SELECT {} FROM images WHERE url = {}",
            IMAGE_COLUMNS,
            Self::placeholder(1)
        )
    }

    /// Returns a full SELECT for images matching the given condition clause.
    ///
    /// # Parameters
    /// - `condition`: WHERE / ORDER BY / LIMIT fragment produced by the query module.
    fn query_image_statement(condition: String) -> String {
        format!("SELECT {} FROM images {}", IMAGE_COLUMNS, condition)
    }

    fn count_image_statement(condition: String) -> String {
        format!("SELECT COUNT(id) FROM images {}", condition)
    }

    /// Should relate a tag to an image without duplicating existing pairs.
    fn ensure_image_tag_statement() -> String {
        format!(
            "INSERT OR IGNORE INTO image_tags (image_id, tag) VALUES ({}, {})",
            Self::placeholder(1),
            Self::placeholder(2),
        )
    }

    /// Relates the tag at index 1 to the image at index 2 only if that image exists.
    ///
    /// The statement writes before it reads, so it never upgrades a stale read snapshot.
    fn tag_existing_image_statement() -> String {
        format!(
            "INSERT OR IGNORE INTO image_tags (image_id, tag) SELECT id, {} FROM images WHERE id = {}",
            Self::placeholder(1),
            Self::placeholder(2),
        )
    }

    fn image_exists_statement() -> String {
        format!("SELECT 1 FROM images WHERE id = {}", Self::placeholder(1))
    }

    fn delete_tags_by_image_statement() -> String {
        format!(
            "DELETE FROM image_tags WHERE image_id = {}",
            Self::placeholder(1)
        )
    }

    fn query_tags_by_image_statement() -> String {
        format!(
            "SELECT tag FROM image_tags WHERE image_id = {} ORDER BY tag",
            Self::placeholder(1)
        )
    }

    /// Writes a consistent copy of the whole database to the path bound at index 1.
    fn backup_statement() -> String {
        format!("VACUUM INTO {}", Self::placeholder(1))
    }
}
