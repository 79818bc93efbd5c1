use super::table::Table;
use crate::client::{GenericClient, scalar_i64};
use crate::error::{DbError, DbResult};
use crate::paginate::{PageRequest, Pagination};
use crate::row::{FromRow, Row};
use serde::Serialize;

/// One page of rows plus the navigation descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T = Row> {
    pub rows: Vec<T>,
    pub pagination: Pagination,
}

/// A read that fetches one page: a count query (unless the total is known)
/// followed by the page query.
pub struct Paginated<'a, C> {
    table: Table<'a, C>,
    page_size: i64,
    request: PageRequest,
    known_total: i64,
}

impl<'a, C: GenericClient> Paginated<'a, C> {
    pub(crate) fn new(table: Table<'a, C>, page_size: i64, request: PageRequest) -> Self {
        Self {
            table,
            page_size,
            request,
            known_total: 0,
        }
    }

    /// Use `total` instead of counting. Zero means "count it".
    pub fn known_total(mut self, total: i64) -> Self {
        self.known_total = total;
        self
    }

    pub async fn get(self, fields: &str) -> DbResult<Page> {
        if self.page_size < 1 {
            return Err(DbError::validation(format!(
                "page size must be at least 1: {}",
                self.page_size
            )));
        }
        let db = self.table.db();
        let name = self.table.name().to_string();

        let total = if self.known_total > 0 {
            self.known_total
        } else {
            let count = self.table.count_statement()?;
            let rows = db.fetch(&count, Some(&name)).await?;
            scalar_i64(&rows)
                .map_err(|e| e.at_statement(count.sql()))?
                .unwrap_or_default()
        };

        let pagination = Pagination::new(total, self.page_size, &self.request)?;
        let mut stmt = self.table.select(fields)?;
        stmt.push(&pagination.limit_clause(db.dialect()));
        let rows = db.fetch(&stmt, Some(&name)).await?;
        Ok(Page { rows, pagination })
    }

    pub async fn get_as<T: FromRow>(self, fields: &str) -> DbResult<Page<T>> {
        let page = self.get(fields).await?;
        Ok(Page {
            rows: page.rows.iter().map(T::from_row).collect::<DbResult<_>>()?,
            pagination: page.pagination,
        })
    }
}
