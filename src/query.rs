//! # Query and Pagination Module
//!
//! Builds the filtered, ordered and paginated image queries that run against the
//! store's indexes. Results are always ordered newest first (`added` descending,
//! `id` descending as tie-breaker), which is what makes consecutive pages disjoint.
//!
//! Page numbers are signed because callers derive "previous page" links by
//! subtracting one. A negative page has no offset and yields no rows.

use crate::dialect::{CurrentDialect, Dialect};

/// Page size used by the recency listing.
pub const RECENT_PAGE_SIZE: u32 = 30;

/// A limit/offset page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub size: u32,
    pub number: i64,
}

impl Page {
    pub fn new(size: u32, number: i64) -> Self {
        Self { size, number }
    }

    /// A page of the recency listing.
    pub fn recent(number: i64) -> Self {
        Self::new(RECENT_PAGE_SIZE, number)
    }

    /// Number of rows to skip, or `None` when the page lies before the first row.
    pub fn offset(&self) -> Option<u64> {
        u64::try_from(self.number)
            .ok()
            .and_then(|n| n.checked_mul(self.size as u64))
    }

    pub fn next(&self) -> Self {
        Self::new(self.size, self.number.saturating_add(1))
    }

    pub fn prev(&self) -> Self {
        Self::new(self.size, self.number.saturating_sub(1))
    }
}

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

/// Which images a query selects, before the deleted filter is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageFilter {
    All,
    /// Images carrying at least one of the tags. An empty list matches nothing.
    AnyTag(Vec<String>),
}

/// Represents a full query including filter and pagination.
#[derive(Debug, Clone)]
pub struct ImageQuery {
    pub filter: ImageFilter,

    /// Deleted images are excluded unless this is set.
    pub include_deleted: bool,

    /// The maximum number of results to return.
    pub limit: Option<u32>,

    /// The offset into the result set.
    pub offset: Option<u64>,
}

impl ImageQuery {
    pub fn new(filter: ImageFilter) -> Self {
        Self {
            filter,
            include_deleted: false,
            limit: None,
            offset: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Restricts the query to `page`.
    ///
    /// Returns `None` when the page cannot contain any rows.
    pub fn paged(self, page: Page) -> Option<Self> {
        let offset = page.offset()?;

        Some(self.with_limit(page.size).with_offset(offset))
    }

    /// Builds the WHERE clause without ordering or pagination, for counting.
    pub fn to_where_sql(&self) -> (String, Vec<SqlParam>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if !self.include_deleted {
            params.push(SqlParam::Int(0));
            conditions.push(format!(
                "deleted = {}",
                CurrentDialect::placeholder(params.len())
            ));
        }

        match &self.filter {
            ImageFilter::All => {}
            ImageFilter::AnyTag(tags) if tags.is_empty() => conditions.push("1 = 0".to_string()),
            ImageFilter::AnyTag(tags) => {
                let first = params.len() + 1;
                params.extend(tags.iter().cloned().map(SqlParam::Text));
                conditions.push(CurrentDialect::any_tag_query(first, tags.len()));
            }
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), params)
        }
    }

    /// Converts the full query into SQL and its bound parameters.
    ///
    /// The generated SQL includes ordering and any LIMIT or OFFSET.
    pub fn to_sql(&self) -> (String, Vec<SqlParam>) {
        let (mut sql, mut params) = self.to_where_sql();

        if !sql.is_empty() {
            sql.push(' ');
        }
        sql.push_str("ORDER BY added DESC, id DESC");

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        if self.limit.is_some() || self.offset.is_some() {
            let limit = self.limit.map(i64::from).unwrap_or(-1);
            params.push(SqlParam::Int(limit));
            sql.push_str(&format!(
                " LIMIT {}",
                CurrentDialect::placeholder(params.len())
            ));
        }

        if let Some(offset) = self.offset {
            params.push(SqlParam::Int(i64::try_from(offset).unwrap_or(i64::MAX)));
            sql.push_str(&format!(
                " OFFSET {}",
                CurrentDialect::placeholder(params.len())
            ));
        }

        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::{CurrentDialect, Dialect, ImageFilter, ImageQuery, Page, SqlParam};

    #[test]
    fn test_page_offset() {
        assert_eq!(Some(0), Page::recent(0).offset());
        assert_eq!(Some(30), Page::recent(1).offset());
        assert_eq!(Some(50), Page::new(10, 5).offset());
        assert_eq!(None, Page::recent(-1).offset());
        assert_eq!(Page::recent(-1), Page::recent(0).prev());
        assert_eq!(Page::recent(1), Page::recent(0).next());
    }

    #[test]
    fn test_build_recent_query() {
        let query = ImageQuery::new(ImageFilter::All)
            .paged(Page::recent(2))
            .unwrap();

        let (sql, params) = query.to_sql();

        assert_eq!(
            format!(
                "WHERE deleted = {} ORDER BY added DESC, id DESC LIMIT {} OFFSET {}",
                CurrentDialect::placeholder(1),
                CurrentDialect::placeholder(2),
                CurrentDialect::placeholder(3),
            ),
            sql
        );
        assert_eq!(
            vec![SqlParam::Int(0), SqlParam::Int(30), SqlParam::Int(60)],
            params
        );
    }

    #[test]
    fn test_build_tag_query() {
        let query = ImageQuery::new(ImageFilter::AnyTag(vec!["cat".into(), "cute".into()]))
            .with_limit(10)
            .with_offset(20);

        let (sql, params) = query.to_sql();

        assert_eq!(
            format!(
                "WHERE deleted = {} AND {} ORDER BY added DESC, id DESC LIMIT {} OFFSET {}",
                CurrentDialect::placeholder(1),
                CurrentDialect::any_tag_query(2, 2),
                CurrentDialect::placeholder(4),
                CurrentDialect::placeholder(5),
            ),
            sql
        );
        assert_eq!(
            vec![
                SqlParam::Int(0),
                SqlParam::Text("cat".into()),
                SqlParam::Text("cute".into()),
                SqlParam::Int(10),
                SqlParam::Int(20),
            ],
            params
        );
    }

    #[test]
    fn test_empty_tag_list_matches_nothing() {
        let (sql, _) = ImageQuery::new(ImageFilter::AnyTag(vec![]))
            .including_deleted()
            .to_where_sql();

        assert_eq!("WHERE 1 = 0", sql);
    }

    #[test]
    fn test_offset_without_limit() {
        let (sql, params) = ImageQuery::new(ImageFilter::All)
            .including_deleted()
            .with_offset(5)
            .to_sql();

        assert_eq!(
            format!(
                "ORDER BY added DESC, id DESC LIMIT {} OFFSET {}",
                CurrentDialect::placeholder(1),
                CurrentDialect::placeholder(2),
            ),
            sql
        );
        assert_eq!(vec![SqlParam::Int(-1), SqlParam::Int(5)], params);
    }

    #[test]
    fn test_negative_page_is_empty() {
        assert!(
            ImageQuery::new(ImageFilter::All)
                .paged(Page::recent(-3))
                .is_none()
        );
    }
}
