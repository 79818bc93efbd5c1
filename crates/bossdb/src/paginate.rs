//! Page-window arithmetic and navigation URLs.
//!
//! [`Pagination`] turns (total rows, page size, requested page) into a clamped
//! current page, a row offset and the links a page footer needs. URLs look
//! like `<base_url>/page_<n><suffix>?<query>`.

use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Pages on either side of the current page in [`Pagination::list_page`].
const WINDOW_BEFORE: i64 = 2;
const WINDOW_AFTER: i64 = 3;
const WINDOW_SPAN: i64 = WINDOW_BEFORE + WINDOW_AFTER;

/// The page a caller asked for and how to link to other pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    page: i64,
    base_url: String,
    suffix: String,
    query: Vec<(String, String)>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            base_url: String::new(),
            suffix: "/".to_string(),
            query: Vec::new(),
        }
    }
}

impl PageRequest {
    /// Request a page. Out-of-range numbers are clamped later, once the total is known.
    pub fn new(page: i64) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    /// Build a request from a query string such as `page=3&tag=rust`.
    ///
    /// A missing or unparsable `page` means page 1. Every other pair is carried
    /// into the generated URLs.
    pub fn from_query(query: &str) -> Self {
        let mut request = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            if key == "page" {
                request.page = value.trim().parse().unwrap_or(1);
            } else {
                request.query.push((key.into_owned(), value.into_owned()));
            }
        }
        request
    }

    pub fn page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    /// Path the page links hang off, e.g. `post/index` or `post/index/tag_3`.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Text after the page number. Empty means `/`.
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Query parameter repeated on every generated URL.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn requested_page(&self) -> i64 {
        self.page
    }

    fn query_string(&self) -> String {
        if self.query.is_empty() {
            return String::new();
        }
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        format!("?{encoded}")
    }

    fn url_builder(&self) -> impl Fn(i64) -> String {
        let base = self.base_url.trim_end_matches('/').to_string();
        let suffix = if self.suffix.is_empty() {
            "/".to_string()
        } else {
            self.suffix.clone()
        };
        let query = self.query_string();
        move |page| {
            if base.is_empty() {
                format!("page_{page}{suffix}{query}")
            } else {
                format!("{base}/page_{page}{suffix}{query}")
            }
        }
    }
}

/// Computed page window plus navigation links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total_rows: i64,
    pub each_page: i64,
    pub max_page: i64,
    pub current_page: i64,
    /// Row offset of the current page.
    pub offset: i64,
    pub first_page_url: String,
    pub prev_page_url: String,
    pub next_page_url: String,
    pub last_page_url: String,
    /// Nearby pages, keyed by page number.
    pub list_page: BTreeMap<i64, String>,
}

impl Pagination {
    pub fn new(total_rows: i64, each_page: i64, request: &PageRequest) -> DbResult<Self> {
        if total_rows < 0 {
            return Err(DbError::validation(format!(
                "total rows cannot be negative: {total_rows}"
            )));
        }
        if each_page < 1 {
            return Err(DbError::validation(format!(
                "page size must be at least 1: {each_page}"
            )));
        }

        let max_page = max_page(total_rows, each_page);
        let current_page = request.page.clamp(1, max_page);
        let url = request.url_builder();

        let mut start = (current_page - WINDOW_BEFORE).max(1);
        let end = current_page.saturating_add(WINDOW_AFTER).min(max_page);
        if end - start < WINDOW_SPAN {
            start = (end - WINDOW_SPAN).max(1);
        }
        let list_page = (start..=end).map(|page| (page, url(page))).collect();

        Ok(Self {
            total_rows,
            each_page,
            max_page,
            current_page,
            offset: (current_page - 1) * each_page,
            first_page_url: url(1),
            prev_page_url: url((current_page - 1).max(1)),
            next_page_url: url(current_page.saturating_add(1).min(max_page)),
            last_page_url: url(max_page),
            list_page,
        })
    }

    pub fn has_prev(&self) -> bool {
        self.current_page > 1
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.max_page
    }

    /// `LIMIT` clause selecting the current page.
    pub fn limit_clause(&self, dialect: Dialect) -> String {
        dialect.limit_clause(self.offset, self.each_page)
    }
}

/// `max(1, ceil(total / each_page))`.
fn max_page(total_rows: i64, each_page: i64) -> i64 {
    (total_rows / each_page + i64::from(total_rows % each_page != 0)).max(1)
}
