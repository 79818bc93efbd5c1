use super::paginated::Paginated;
use crate::client::{GenericClient, scalar_i64};
use crate::db::Db;
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::ident;
use crate::paginate::PageRequest;
use crate::row::{FromRow, Record, Row};
use crate::sql::Statement;
use crate::value::Value;
use serde::Serialize;

/// A stored `?` predicate and its values.
#[derive(Debug, Clone)]
struct Filter {
    template: String,
    values: Vec<Value>,
}

/// Query builder bound to one table.
///
/// Every clause method takes `self` and returns a new builder; every terminal
/// method consumes it. A builder therefore runs exactly one statement (two for
/// a paginated read) and clause state cannot carry over into the next one.
///
/// `join`, `group_by`, `order_by` and the field list of `first`/`get` are raw
/// SQL written by the caller. Values only ever enter through [`Table::filter`]
/// and write payloads, and are always bound.
pub struct Table<'a, C> {
    db: &'a Db<C>,
    name: String,
    filters: Vec<Filter>,
    joins: Vec<String>,
    group_by: Option<String>,
    order_by: Option<String>,
    limit: Option<(i64, i64)>,
}

impl<C> Clone for Table<'_, C> {
    fn clone(&self) -> Self {
        Self {
            db: self.db,
            name: self.name.clone(),
            filters: self.filters.clone(),
            joins: self.joins.clone(),
            group_by: self.group_by.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
        }
    }
}

impl<C> std::fmt::Debug for Table<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("filters", &self.filters)
            .field("joins", &self.joins)
            .field("group_by", &self.group_by)
            .field("order_by", &self.order_by)
            .field("limit", &self.limit)
            .finish()
    }
}

/// One row of [`Table::structure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub position: i64,
    pub name: String,
    pub data_type: String,
    pub comment: String,
}

impl FromRow for ColumnInfo {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            position: row.try_get("position")?,
            name: row.try_get("name")?,
            data_type: row.try_get("data_type")?,
            comment: row.try_get::<Option<String>>("comment")?.unwrap_or_default(),
        })
    }
}

impl<'a, C: GenericClient> Table<'a, C> {
    pub(crate) fn new(db: &'a Db<C>, name: String) -> Self {
        Self {
            db,
            name,
            filters: Vec::new(),
            joins: Vec::new(),
            group_by: None,
            order_by: None,
            limit: None,
        }
    }

    /// Full (prefixed) table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a `WHERE` predicate with `?` placeholders.
    ///
    /// Calling `filter` again adds another predicate joined with `AND`. A blank
    /// template adds nothing. The placeholder count is checked when the
    /// statement is rendered.
    pub fn filter(
        mut self,
        template: &str,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        if !template.trim().is_empty() {
            self.filters.push(Filter {
                template: template.trim().to_string(),
                values: values.into_iter().map(Into::into).collect(),
            });
        }
        self
    }

    /// Append a raw join fragment, e.g. `LEFT JOIN user ON user.id = post.user_id`.
    pub fn join(mut self, fragment: &str) -> Self {
        if !fragment.trim().is_empty() {
            self.joins.push(fragment.trim().to_string());
        }
        self
    }

    pub fn group_by(mut self, fragment: &str) -> Self {
        self.group_by = non_blank(fragment);
        self
    }

    pub fn order_by(mut self, fragment: &str) -> Self {
        self.order_by = non_blank(fragment);
        self
    }

    /// Row window. Negative values fail with [`DbError::Validation`] when the
    /// statement is rendered.
    pub fn limit(mut self, offset: i64, count: i64) -> Self {
        self.limit = Some((offset, count));
        self
    }

    /// Turn this read into a paginated one. Any explicit `limit` is replaced by
    /// the page window.
    pub fn paginate(self, page_size: i64, request: PageRequest) -> Paginated<'a, C> {
        Paginated::new(self, page_size, request)
    }

    /// The SELECT that [`Table::get`] would run.
    pub fn to_sql(&self, fields: &str) -> DbResult<Statement> {
        let mut stmt = self.select(fields)?;
        self.push_limit(&mut stmt, None)?;
        Ok(stmt)
    }

    /// First matching row, or `None`.
    pub async fn first(self, fields: &str) -> DbResult<Option<Row>> {
        let mut stmt = self.select(fields)?;
        let offset = match self.limit {
            Some((offset, _)) => offset,
            None => 0,
        };
        self.push_limit(&mut stmt, Some((offset, 1)))?;
        let rows = self.db.fetch(&stmt, Some(&self.name)).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn first_as<T: FromRow>(self, fields: &str) -> DbResult<Option<T>> {
        self.first(fields).await?.as_ref().map(T::from_row).transpose()
    }

    /// All matching rows.
    pub async fn get(self, fields: &str) -> DbResult<Vec<Row>> {
        let stmt = self.to_sql(fields)?;
        self.db.fetch(&stmt, Some(&self.name)).await
    }

    pub async fn get_as<T: FromRow>(self, fields: &str) -> DbResult<Vec<T>> {
        self.get(fields).await?.iter().map(T::from_row).collect()
    }

    /// Insert one row and return its generated key.
    pub async fn insert(self, record: Record) -> DbResult<i64> {
        if record.is_empty() {
            return Err(DbError::validation(format!(
                "insert into {} needs at least one field",
                self.name
            )));
        }
        let fields: Vec<String> = record.fields().map(str::to_string).collect();
        let mut stmt = self.insert_head(&fields)?;
        stmt.push_bind_group(record.into_values());
        self.push_returning(&mut stmt);
        self.db.insert_returning_id(&stmt, Some(&self.name)).await
    }

    /// Insert many rows in one statement and return the last generated key.
    ///
    /// Every record must carry the same set of fields.
    pub async fn batch_insert(self, records: Vec<Record>) -> DbResult<i64> {
        let Some(first) = records.first() else {
            return Err(DbError::validation(format!(
                "batch insert into {} needs at least one row",
                self.name
            )));
        };
        if first.is_empty() {
            return Err(DbError::validation(format!(
                "batch insert into {} needs at least one field",
                self.name
            )));
        }
        let fields: Vec<String> = first.fields().map(str::to_string).collect();

        let mut groups = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            if record.len() != fields.len() {
                return Err(mismatched_row(idx, &fields));
            }
            let values = fields
                .iter()
                .map(|f| record.get(f).cloned().ok_or_else(|| mismatched_row(idx, &fields)))
                .collect::<DbResult<Vec<Value>>>()?;
            groups.push(values);
        }

        let mut stmt = self.insert_head(&fields)?;
        for (idx, values) in groups.into_iter().enumerate() {
            if idx > 0 {
                stmt.push(", ");
            }
            stmt.push_bind_group(values);
        }
        self.push_returning(&mut stmt);
        self.db.insert_returning_id(&stmt, Some(&self.name)).await
    }

    /// Update the filtered rows. Requires a filter.
    pub async fn update(self, record: Record) -> DbResult<u64> {
        if record.is_empty() {
            return Err(DbError::validation(format!(
                "update of {} needs at least one field",
                self.name
            )));
        }
        self.require_filter("update")?;
        for field in record.fields() {
            ident::validate("field", field)?;
        }

        let mut stmt = Statement::new(self.db.dialect());
        stmt.push("UPDATE ").push_ident(&self.name).push(" SET ");
        for (idx, (field, value)) in record.iter().enumerate() {
            if idx > 0 {
                stmt.push(", ");
            }
            stmt.push_ident(field).push(" = ").push_bind(value.clone());
        }
        self.push_where(&mut stmt)?;
        self.db.affect(&stmt, Some(&self.name)).await
    }

    /// Delete the filtered rows. Requires a filter.
    pub async fn delete(self) -> DbResult<u64> {
        self.require_filter("delete")?;
        let mut stmt = Statement::new(self.db.dialect());
        stmt.push("DELETE FROM ").push_ident(&self.name);
        self.push_where(&mut stmt)?;
        self.db.affect(&stmt, Some(&self.name)).await
    }

    /// `field = field + delta` on the filtered rows. Requires a filter.
    ///
    /// The arithmetic happens in the database, so concurrent increments of the
    /// same row all land.
    pub async fn increment(self, field: &str, delta: i64) -> DbResult<u64> {
        ident::validate("field", field)?;
        self.require_filter("increment")?;

        let mut stmt = Statement::new(self.db.dialect());
        stmt.push("UPDATE ")
            .push_ident(&self.name)
            .push(" SET ")
            .push_ident(field)
            .push(" = ")
            .push_ident(field)
            .push(" + ")
            .push_bind(delta);
        self.push_where(&mut stmt)?;
        self.db.affect(&stmt, Some(&self.name)).await
    }

    /// Number of matching rows (groups, when grouped).
    pub async fn count(self) -> DbResult<i64> {
        let stmt = self.count_statement()?;
        let rows = self.db.fetch(&stmt, Some(&self.name)).await?;
        scalar_i64(&rows)
            .map(Option::unwrap_or_default)
            .map_err(|e| e.at_statement(stmt.sql()))
    }

    /// Largest value of `field`; `Value::Int(0)` when there is none.
    pub async fn max(self, field: &str) -> DbResult<Value> {
        self.aggregate("MAX", field).await
    }

    /// Smallest value of `field`; `Value::Int(0)` when there is none.
    pub async fn min(self, field: &str) -> DbResult<Value> {
        self.aggregate("MIN", field).await
    }

    /// Mean of `field`; `0.0` when there is none.
    pub async fn avg(self, field: &str) -> DbResult<f64> {
        let value = self.aggregate("AVG", field).await?;
        as_float(&value, field)
    }

    /// Sum of `field`; `0.0` when there is none.
    pub async fn sum(self, field: &str) -> DbResult<f64> {
        let value = self.aggregate("SUM", field).await?;
        as_float(&value, field)
    }

    /// Column metadata from `information_schema.columns`, in ordinal order.
    pub async fn structure(self) -> DbResult<Vec<ColumnInfo>> {
        let dialect = self.db.dialect();
        let stmt = match dialect {
            Dialect::MySql => Statement::from_template(
                dialect,
                "SELECT ORDINAL_POSITION AS position, COLUMN_NAME AS name, \
                 DATA_TYPE AS data_type, COLUMN_COMMENT AS comment \
                 FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? \
                 ORDER BY ORDINAL_POSITION ASC",
                vec![self.db.config().database.clone().into(), self.name.clone().into()],
            )?,
            Dialect::Postgres => Statement::from_template(
                dialect,
                "SELECT CAST(ordinal_position AS INTEGER) AS position, \
                 CAST(column_name AS TEXT) AS name, \
                 CAST(data_type AS TEXT) AS data_type, \
                 COALESCE(col_description(CAST(quote_ident(table_schema) || '.' || \
                 quote_ident(table_name) AS regclass), CAST(ordinal_position AS INTEGER)), '') AS comment \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = CAST(? AS TEXT) \
                 ORDER BY ordinal_position ASC",
                vec![self.name.clone().into()],
            )?,
        };
        self.db
            .fetch(&stmt, Some(&self.name))
            .await?
            .iter()
            .map(ColumnInfo::from_row)
            .collect()
    }

    /// One value over every matching row; a grouped builder is rejected
    /// since it would yield one value per group.
    async fn aggregate(self, func: &str, field: &str) -> DbResult<Value> {
        ident::validate("field", field)?;
        if self.group_by.is_some() {
            return Err(DbError::validation(format!(
                "{func}() ignores group_by; drop the grouping or use a raw query"
            )));
        }
        let dialect = self.db.dialect();
        let expr = dialect.aggregate(func, &dialect.quote(field));

        let mut stmt = Statement::new(dialect);
        stmt.push("SELECT ")
            .push(&expr)
            .push(" AS ")
            .push_ident("aggregate")
            .push(" FROM ")
            .push_ident(&self.name);
        self.push_joins(&mut stmt);
        self.push_where(&mut stmt)?;

        let rows = self.db.fetch(&stmt, Some(&self.name)).await?;
        Ok(match rows.first().and_then(|row| row.get_index(0)) {
            None | Some(Value::Null) => Value::Int(0),
            Some(value) => value.clone(),
        })
    }

    /// `SELECT COUNT(*)` over the same rows a `get` would read.
    pub(crate) fn count_statement(&self) -> DbResult<Statement> {
        let mut stmt = Statement::new(self.db.dialect());
        match &self.group_by {
            None => {
                stmt.push("SELECT COUNT(*) AS total FROM ").push_ident(&self.name);
                self.push_joins(&mut stmt);
                self.push_where(&mut stmt)?;
            }
            Some(group_by) => {
                stmt.push("SELECT COUNT(*) AS total FROM (SELECT 1 AS grouped FROM ")
                    .push_ident(&self.name);
                self.push_joins(&mut stmt);
                self.push_where(&mut stmt)?;
                stmt.push(" GROUP BY ")
                    .push(group_by)
                    .push(") AS count_table");
            }
        }
        Ok(stmt)
    }

    /// `SELECT fields FROM table [join] [where] [group] [order]`, no limit.
    pub(crate) fn select(&self, fields: &str) -> DbResult<Statement> {
        let fields = match fields.trim() {
            "" => "*",
            f => f,
        };
        let mut stmt = Statement::new(self.db.dialect());
        stmt.push("SELECT ").push(fields).push(" FROM ").push_ident(&self.name);
        self.push_joins(&mut stmt);
        self.push_where(&mut stmt)?;
        if let Some(group_by) = &self.group_by {
            stmt.push(" GROUP BY ").push(group_by);
        }
        if let Some(order_by) = &self.order_by {
            stmt.push(" ORDER BY ").push(order_by);
        }
        Ok(stmt)
    }

    pub(crate) fn db(&self) -> &'a Db<C> {
        self.db
    }

    /// Append `window`, or the stored limit when `window` is `None`.
    fn push_limit(&self, stmt: &mut Statement, window: Option<(i64, i64)>) -> DbResult<()> {
        let Some((offset, count)) = window.or(self.limit) else {
            return Ok(());
        };
        if let Some((o, c)) = self.limit {
            if o < 0 || c < 0 {
                return Err(DbError::validation(format!(
                    "limit values must be non-negative, got ({o}, {c})"
                )));
            }
        }
        stmt.push_limit(offset, count);
        Ok(())
    }

    fn push_joins(&self, stmt: &mut Statement) {
        for join in &self.joins {
            stmt.push(" ").push(join);
        }
    }

    fn push_where(&self, stmt: &mut Statement) -> DbResult<()> {
        let wrap = self.filters.len() > 1;
        for (idx, filter) in self.filters.iter().enumerate() {
            stmt.push(if idx == 0 { " WHERE " } else { " AND " });
            if wrap {
                stmt.push("(");
            }
            stmt.push_template(&filter.template, filter.values.clone())?;
            if wrap {
                stmt.push(")");
            }
        }
        Ok(())
    }

    fn require_filter(&self, operation: &str) -> DbResult<()> {
        if self.filters.is_empty() {
            return Err(DbError::precondition(format!(
                "{operation} on {} requires a filter; call filter() first",
                self.name
            )));
        }
        Ok(())
    }

    fn insert_head(&self, fields: &[String]) -> DbResult<Statement> {
        for field in fields {
            ident::validate("field", field)?;
        }
        let mut stmt = Statement::new(self.db.dialect());
        stmt.push("INSERT INTO ").push_ident(&self.name).push(" (");
        for (idx, field) in fields.iter().enumerate() {
            if idx > 0 {
                stmt.push(", ");
            }
            stmt.push_ident(field);
        }
        stmt.push(") VALUES ");
        Ok(stmt)
    }

    fn push_returning(&self, stmt: &mut Statement) {
        if self.db.dialect().returns_insert_id() {
            stmt.push(" RETURNING ").push_ident(&self.db.config().primary_key);
        }
    }
}

fn non_blank(fragment: &str) -> Option<String> {
    let fragment = fragment.trim();
    (!fragment.is_empty()).then(|| fragment.to_string())
}

fn mismatched_row(idx: usize, fields: &[String]) -> DbError {
    DbError::validation(format!(
        "batch insert row {idx} does not have the fields of row 0: {}",
        fields.join(", ")
    ))
}

fn as_float(value: &Value, field: &str) -> DbResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| DbError::decode(field, format!("expected a number, got {value}")))
}
