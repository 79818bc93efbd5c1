//! Generic client trait: the seam between the builder and a database driver.

use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::row::{Row, from_pg_row};
use crate::value::Value;
use tokio_postgres::types::ToSql;

/// A connection that can run parameterized statements.
///
/// Statements arrive fully rendered for [`GenericClient::dialect`]: identifiers
/// quoted and placeholders numbered. Implementations only have to bind
/// `params` positionally and report rows or affected-row counts.
///
/// The bundled implementations speak Postgres. A MySQL connector plugs in by
/// returning [`Dialect::MySql`] and overriding [`GenericClient::last_insert_id`].
pub trait GenericClient: Send + Sync {
    /// SQL flavour this connection expects.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = DbResult<Vec<Row>>> + Send;

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = DbResult<u64>> + Send;

    /// Run one or more unparameterized statements (transaction control).
    fn batch_execute(&self, sql: &str) -> impl std::future::Future<Output = DbResult<()>> + Send;

    /// Key generated by the most recent INSERT on this connection.
    ///
    /// Only consulted for dialects without `RETURNING`. The default returns `None`.
    fn last_insert_id(&self) -> impl std::future::Future<Output = DbResult<Option<i64>>> + Send {
        async { Ok(None) }
    }

    /// Token for cancelling the statement running on this connection.
    ///
    /// Used to stop a statement server-side once its timeout fires.
    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        None
    }

    /// Told whether a transaction is open on this connection.
    ///
    /// [`Db`](crate::Db) calls this around BEGIN, COMMIT and ROLLBACK. Pooled
    /// connections use it to keep a half-finished transaction out of the pool.
    fn set_in_transaction(&self, _open: bool) {}
}

fn bind_refs(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn decode_rows(rows: Vec<tokio_postgres::Row>) -> DbResult<Vec<Row>> {
    rows.iter().map(from_pg_row).collect()
}

impl GenericClient for tokio_postgres::Client {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let refs = bind_refs(params);
        let rows = tokio_postgres::Client::query(self, sql, &refs).await?;
        decode_rows(rows)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let refs = bind_refs(params);
        Ok(tokio_postgres::Client::execute(self, sql, &refs).await?)
    }

    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        Ok(tokio_postgres::Client::batch_execute(self, sql).await?)
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Client::cancel_token(self))
    }
}

impl GenericClient for tokio_postgres::Transaction<'_> {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let refs = bind_refs(params);
        let rows = tokio_postgres::Transaction::query(self, sql, &refs).await?;
        decode_rows(rows)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let refs = bind_refs(params);
        Ok(tokio_postgres::Transaction::execute(self, sql, &refs).await?)
    }

    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        Ok(tokio_postgres::Transaction::batch_execute(self, sql).await?)
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        Some(tokio_postgres::Transaction::cancel_token(self))
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Client {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        // Delegate to the deref target (ClientWrapper -> tokio_postgres::Client).
        let client: &tokio_postgres::Client = self;
        GenericClient::query(client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let client: &tokio_postgres::Client = self;
        GenericClient::execute(client, sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        let client: &tokio_postgres::Client = self;
        GenericClient::batch_execute(client, sql).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        let client: &tokio_postgres::Client = self;
        GenericClient::cancel_token(client)
    }
}

impl<C: GenericClient> GenericClient for &C {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        (**self).query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        (**self).execute(sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        (**self).batch_execute(sql).await
    }

    async fn last_insert_id(&self) -> DbResult<Option<i64>> {
        (**self).last_insert_id().await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        (**self).cancel_token()
    }

    fn set_in_transaction(&self, open: bool) {
        (**self).set_in_transaction(open)
    }
}

/// Read a single integer cell from the first row, treating "no row" and NULL as `None`.
pub(crate) fn scalar_i64(rows: &[Row]) -> DbResult<Option<i64>> {
    match rows.first().and_then(|row| row.get_index(0)) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| DbError::decode("0", format!("expected an integer, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_reads_first_cell() {
        let rows = vec![Row::new().with("total", 25)];
        assert_eq!(scalar_i64(&rows).unwrap(), Some(25));
        assert_eq!(scalar_i64(&[]).unwrap(), None);
        let null = vec![Row::new().with("total", Value::Null)];
        assert_eq!(scalar_i64(&null).unwrap(), None);
        let text = vec![Row::new().with("total", "7")];
        assert_eq!(scalar_i64(&text).unwrap(), Some(7));
    }

    #[test]
    fn scalar_rejects_non_numeric() {
        let rows = vec![Row::new().with("total", "abc")];
        assert!(scalar_i64(&rows).is_err());
    }
}
