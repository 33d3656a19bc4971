use super::{Db, Dialect};

/// SQLite dialect implementation of the `Dialect` trait.
#[cfg(feature = "sqlite")]
pub struct SqliteDialect;

#[cfg(feature = "sqlite")]
impl Dialect for SqliteDialect {
    fn placeholder(_idx: usize) -> String {
        "?".to_string()
    }

    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
        let stmts = vec![
            r#"CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                added INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                size INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                data BLOB,
                ext TEXT NOT NULL DEFAULT '',
                mime TEXT NOT NULL DEFAULT ''
            );"#,
            r#"CREATE INDEX IF NOT EXISTS images_added ON images (added DESC, id DESC);"#,
            r#"CREATE INDEX IF NOT EXISTS images_content_hash ON images (content_hash);"#,
            r#"CREATE TABLE IF NOT EXISTS image_tags (
                image_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (image_id, tag),
                FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE
            );"#,
            r#"CREATE INDEX IF NOT EXISTS image_tags_tag ON image_tags (tag);"#,
        ];

        for stmt in stmts {
            sqlx::query(stmt).execute(pool).await?;
        }

        Ok(())
    }

    fn is_url_conflict(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(e) => {
                e.is_unique_violation() && e.message().contains("images.url")
            }
            _ => false,
        }
    }

    // Primary code SQLITE_BUSY (5), which also covers BUSY_SNAPSHOT (517).
    fn is_busy(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(e) => e
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| code & 0xff == 5),
            _ => false,
        }
    }
}
