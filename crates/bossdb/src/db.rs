//! The per-request database handle.

use crate::builder::Table;
use crate::client::{GenericClient, scalar_i64};
use crate::config::ConnectionConfig;
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::ident;
use crate::monitor::{MonitorConfig, QueryContext, QueryMonitor, QueryResult, TraceLog};
use crate::row::{FromRow, Row};
use crate::sql::Statement;
use crate::value::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// What the most recently executed statement left behind.
#[derive(Debug, Clone, Default)]
struct LastStatement {
    sql: Option<String>,
    error: Option<String>,
    row_count: Option<u64>,
    insert_id: Option<i64>,
}

/// One connection plus everything needed to build and run statements on it.
///
/// A `Db` is meant to live for one request or one unit of work. Get a
/// builder for a table with [`Db::table`]; every builder borrows the same
/// connection, so statements issued between [`Db::begin_transaction`] and
/// [`Db::commit`] share the transaction.
///
/// ```ignore
/// let db = registry.connect(&config).await?;
/// let id = db.table("post")?
///     .insert(Record::new().set("content", "hello").set("user_id", 1))
///     .await?;
/// let post = db.table("post")?.filter("id = ?", [id]).first("*").await?;
/// ```
pub struct Db<C> {
    client: C,
    config: ConnectionConfig,
    dialect: Dialect,
    monitor_config: MonitorConfig,
    monitors: Vec<Arc<dyn QueryMonitor>>,
    trace: TraceLog,
    last: Mutex<LastStatement>,
}

impl<C: GenericClient> Db<C> {
    /// Wrap a connection.
    ///
    /// Fails with [`DbError::Configuration`] when the config is invalid or names
    /// a driver whose dialect differs from the connection's.
    pub fn new(client: C, config: ConnectionConfig) -> DbResult<Self> {
        config.validate()?;
        let dialect = client.dialect();
        if config.dialect() != dialect {
            return Err(DbError::configuration(format!(
                "driver {} does not match a {dialect} connection",
                config.driver
            )));
        }
        Ok(Self {
            client,
            config,
            dialect,
            monitor_config: MonitorConfig::default(),
            monitors: Vec::new(),
            trace: TraceLog::new(),
            last: Mutex::new(LastStatement::default()),
        })
    }

    pub fn with_monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    /// Attach a monitor. Monitors only receive events while monitoring is enabled.
    pub fn with_monitor(mut self, monitor: impl QueryMonitor + 'static) -> Self {
        self.monitors.push(Arc::new(monitor));
        self
    }

    pub fn with_monitor_arc(mut self, monitor: Arc<dyn QueryMonitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Share a trace log with other handles (e.g. one per request).
    pub fn with_trace_log(mut self, trace: TraceLog) -> Self {
        self.trace = trace;
        self
    }

    /// A fresh builder bound to `prefix + name`.
    pub fn table(&self, name: &str) -> DbResult<Table<'_, C>> {
        ident::validate("table", name)?;
        Ok(Table::new(self, format!("{}{}", self.config.prefix, name)))
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn into_client(self) -> C {
        self.client
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn monitor_config(&self) -> &MonitorConfig {
        &self.monitor_config
    }

    /// Diagnostic record of every statement executed through this handle.
    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    /// Driver message of the most recent statement, if it failed.
    pub fn last_error(&self) -> Option<String> {
        self.last_statement().error
    }

    /// Rows returned or affected by the most recent statement.
    pub fn row_count(&self) -> Option<u64> {
        self.last_statement().row_count
    }

    /// Key generated by the most recent INSERT through this handle.
    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_statement().insert_id
    }

    /// SQL text of the most recent statement.
    pub fn last_sql(&self) -> Option<String> {
        self.last_statement().sql
    }

    fn last_statement(&self) -> LastStatement {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run a raw query. `sql` uses `?` placeholders for `params`.
    pub async fn query(
        &self,
        sql: &str,
        params: impl IntoIterator<Item = impl Into<Value>>,
    ) -> DbResult<Vec<Row>> {
        let params = params.into_iter().map(Into::into).collect();
        let stmt = Statement::from_template(self.dialect, sql, params)?;
        self.fetch(&stmt, None).await
    }

    /// Run a raw query and map each row.
    pub async fn query_as<T: FromRow>(
        &self,
        sql: &str,
        params: impl IntoIterator<Item = impl Into<Value>>,
    ) -> DbResult<Vec<T>> {
        self.query(sql, params)
            .await?
            .iter()
            .map(T::from_row)
            .collect()
    }

    /// Run a raw statement and return the affected-row count.
    pub async fn execute(
        &self,
        sql: &str,
        params: impl IntoIterator<Item = impl Into<Value>>,
    ) -> DbResult<u64> {
        let params = params.into_iter().map(Into::into).collect();
        let stmt = Statement::from_template(self.dialect, sql, params)?;
        self.affect(&stmt, None).await
    }

    /// Version string reported by the server.
    pub async fn server_version(&self) -> DbResult<String> {
        let sql = match self.dialect {
            Dialect::MySql => "SELECT VERSION()",
            Dialect::Postgres => "SHOW server_version",
        };
        let rows = self.fetch(&Statement::from_template(self.dialect, sql, Vec::new())?, None).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_index(0))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Start a transaction on this connection. Not reentrant.
    ///
    /// Until [`Db::commit`] or [`Db::rollback`] succeeds the connection is
    /// marked as inside a transaction; a pooled connection dropped in that
    /// state is closed instead of being returned to its pool.
    pub async fn begin_transaction(&self) -> DbResult<()> {
        self.client.set_in_transaction(true);
        self.control("BEGIN").await
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.control("COMMIT").await?;
        self.client.set_in_transaction(false);
        Ok(())
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.control("ROLLBACK").await?;
        self.client.set_in_transaction(false);
        Ok(())
    }

    /// Transaction control reports driver errors as-is.
    async fn control(&self, sql: &str) -> DbResult<()> {
        let ctx = QueryContext::new(sql, 0);
        self.observe(ctx, self.client.batch_execute(sql), |_| QueryResult::Affected(0), false)
            .await
    }

    pub(crate) async fn fetch(&self, stmt: &Statement, table: Option<&str>) -> DbResult<Vec<Row>> {
        let ctx = context(stmt, table);
        self.observe(
            ctx,
            self.client.query(stmt.sql(), stmt.params()),
            |rows: &Vec<Row>| QueryResult::Rows(rows.len()),
            true,
        )
        .await
    }

    pub(crate) async fn affect(&self, stmt: &Statement, table: Option<&str>) -> DbResult<u64> {
        let ctx = context(stmt, table);
        self.observe(
            ctx,
            self.client.execute(stmt.sql(), stmt.params()),
            |n: &u64| QueryResult::Affected(*n),
            true,
        )
        .await
    }

    /// Run an INSERT and return the generated key of its last row.
    ///
    /// Postgres statements must already end in `RETURNING <primary key>`.
    pub(crate) async fn insert_returning_id(
        &self,
        stmt: &Statement,
        table: Option<&str>,
    ) -> DbResult<i64> {
        let id = if self.dialect.returns_insert_id() {
            let rows = self.fetch(stmt, table).await?;
            scalar_i64(rows.last().map(std::slice::from_ref).unwrap_or_default())
                .map_err(|e| e.at_statement(stmt.sql()))?
        } else {
            self.affect(stmt, table).await?;
            self.client
                .last_insert_id()
                .await
                .map_err(|e| e.at_statement(stmt.sql()))?
        };
        let id = id.unwrap_or(0);
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert_id = Some(id);
        Ok(id)
    }

    /// Time `fut`, apply the timeout, report to monitors and remember the outcome.
    async fn observe<T>(
        &self,
        ctx: QueryContext,
        fut: impl Future<Output = DbResult<T>>,
        summarize: impl Fn(&T) -> QueryResult,
        wrap_errors: bool,
    ) -> DbResult<T> {
        let notify = self.monitor_config.monitoring_enabled;
        if notify {
            for monitor in &self.monitors {
                monitor.on_query_start(&ctx);
            }
        }

        let start = Instant::now();
        let result = match self.monitor_config.query_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => {
                    if let Some(token) = self.client.cancel_token() {
                        tokio::spawn(async move {
                            if let Err(e) = token.cancel_query(tokio_postgres::NoTls).await {
                                tracing::warn!(target: "bossdb.sql", error = %e, "failed to cancel timed-out query");
                            }
                        });
                    }
                    Err(DbError::Timeout(timeout))
                }
            },
            None => fut.await,
        };
        let elapsed = start.elapsed();

        let result = if wrap_errors {
            result.map_err(|e| e.at_statement(&ctx.sql))
        } else {
            result
        };
        let outcome = match &result {
            Ok(value) => summarize(value),
            Err(err) => QueryResult::error(error_message(err)),
        };

        self.trace.on_query_complete(&ctx, elapsed, &outcome);
        if notify {
            for monitor in &self.monitors {
                monitor.on_query_complete(&ctx, elapsed, &outcome);
            }
            if self.monitor_config.is_slow(elapsed) {
                for monitor in &self.monitors {
                    monitor.on_slow_query(&ctx, elapsed);
                }
            }
        }

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.sql = Some(ctx.sql);
        match &outcome {
            QueryResult::Rows(n) => {
                last.error = None;
                last.row_count = Some(*n as u64);
            }
            QueryResult::Affected(n) => {
                last.error = None;
                last.row_count = Some(*n);
            }
            QueryResult::Error(message) => {
                last.error = Some(message.clone());
                last.row_count = None;
            }
        }
        drop(last);

        result
    }
}

fn context(stmt: &Statement, table: Option<&str>) -> QueryContext {
    let ctx = QueryContext::new(stmt.sql(), stmt.params().len());
    match table {
        Some(table) => ctx.with_table(table),
        None => ctx,
    }
}

/// The driver's own words, without the taxonomy prefix.
fn error_message(err: &DbError) -> String {
    match err {
        DbError::Query { message, .. } => message.clone(),
        DbError::Driver(e) => crate::error::driver_message(e),
        other => other.to_string(),
    }
}

impl<C> std::fmt::Debug for Db<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.dialect)
            .field("database", &self.config.database)
            .field("prefix", &self.config.prefix)
            .field("monitors", &self.monitors.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, Driver};
    use crate::monitor::{StatsMonitor, TraceStatus};
    use crate::testing::{Reply, ScriptedClient, db};
    use std::time::Duration;

    #[test]
    fn test_dialect_mismatch_is_configuration_error() {
        let config = ConnectionConfig::new(Driver::Pgsql, "boss", "boss");
        let err = Db::new(ScriptedClient::new(Dialect::MySql), config).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_raw_query_rewrites_placeholders() {
        let db = db(Dialect::Postgres);
        db.client().reply(Reply::Rows(vec![Row::new().with("n", 1)]));
        let rows = db
            .query("SELECT COUNT(*) AS n FROM post WHERE user_id = ? AND content <> '?'", [7])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            db.client().sql(),
            vec!["SELECT COUNT(*) AS n FROM post WHERE user_id = $1 AND content <> '?'"]
        );
        assert_eq!(db.last_sql().as_deref(), Some(db.client().sql()[0].as_str()));
    }

    #[tokio::test]
    async fn test_raw_execute_reports_row_count() {
        let db = db(Dialect::MySql);
        db.client().reply(Reply::Affected(3));
        let n = db
            .execute("UPDATE post SET status = ? WHERE user_id = ?", [0, 9])
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(db.row_count(), Some(3));
        assert_eq!(db.last_error(), None);
    }

    #[tokio::test]
    async fn test_server_version_per_dialect() {
        let db = db(Dialect::MySql);
        db.client().reply(Reply::Rows(vec![Row::new().with("VERSION()", "8.0.36")]));
        assert_eq!(db.server_version().await.unwrap(), "8.0.36");
        assert_eq!(db.client().sql(), vec!["SELECT VERSION()"]);

        let db = crate::testing::db(Dialect::Postgres);
        db.client().reply(Reply::Rows(vec![Row::new().with("server_version", "16.2")]));
        assert_eq!(db.server_version().await.unwrap(), "16.2");
        assert_eq!(db.client().sql(), vec!["SHOW server_version"]);
    }

    #[tokio::test]
    async fn test_transaction_control_passes_through() {
        let db = db(Dialect::MySql);
        db.begin_transaction().await.unwrap();
        db.commit().await.unwrap();
        db.begin_transaction().await.unwrap();
        db.rollback().await.unwrap();
        assert_eq!(
            db.client().sql(),
            vec!["BEGIN", "COMMIT", "BEGIN", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn test_connection_marked_while_transaction_open() {
        let db = db(Dialect::Postgres);
        assert!(!db.client().in_transaction());
        db.begin_transaction().await.unwrap();
        assert!(db.client().in_transaction());
        db.commit().await.unwrap();
        assert!(!db.client().in_transaction());

        db.begin_transaction().await.unwrap();
        db.client().fail_control();
        assert!(db.rollback().await.is_err());
        // A failed ROLLBACK leaves the server state unknown.
        assert!(db.client().in_transaction());
    }

    #[tokio::test]
    async fn test_transaction_errors_are_not_wrapped() {
        let db = db(Dialect::MySql);
        db.client().fail_control();
        let err = db.begin_transaction().await.unwrap_err();
        assert!(matches!(err, DbError::Connection(_)));
        assert!(db.last_error().is_some());
    }

    #[tokio::test]
    async fn test_trace_records_every_statement() {
        let db = db(Dialect::MySql);
        db.client()
            .reply(Reply::Rows(vec![]))
            .reply(Reply::Fail("syntax error"));
        db.query("SELECT 1", Vec::<Value>::new()).await.unwrap();
        db.query("SELEC 1", Vec::<Value>::new()).await.unwrap_err();

        let records = db.trace().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, TraceStatus::Success);
        assert_eq!(records[0].sql, "SELECT 1");
        assert_eq!(records[1].status, TraceStatus::Failure);
        assert!(records[1].error.contains("syntax error"));
    }

    #[tokio::test]
    async fn test_monitors_only_fire_when_enabled() {
        let stats = Arc::new(StatsMonitor::new());

        let quiet = db(Dialect::MySql).with_monitor_arc(stats.clone());
        quiet.query("SELECT 1", Vec::<Value>::new()).await.unwrap();
        assert_eq!(stats.stats().total_queries, 0);

        let loud = db(Dialect::MySql)
            .with_monitor_config(MonitorConfig::new().enable_monitoring())
            .with_monitor_arc(stats.clone());
        loud.query("SELECT 1", Vec::<Value>::new()).await.unwrap();
        loud.execute("DELETE FROM post WHERE id = ?", [1]).await.unwrap();
        let snapshot = stats.stats();
        assert_eq!(snapshot.total_queries, 2);
        assert_eq!(snapshot.select_count, 1);
        assert_eq!(snapshot.delete_count, 1);
    }

    struct SlowClient;

    impl GenericClient for SlowClient {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        async fn query(&self, _: &str, _: &[Value]) -> DbResult<Vec<Row>> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Vec::new())
        }

        async fn execute(&self, _: &str, _: &[Value]) -> DbResult<u64> {
            Ok(0)
        }

        async fn batch_execute(&self, _: &str) -> DbResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let config = ConnectionConfig::new(Driver::MySql, "boss", "boss");
        let db = Db::new(SlowClient, config)
            .unwrap()
            .with_monitor_config(MonitorConfig::new().with_query_timeout(Duration::from_millis(10)));
        assert!(db.client().cancel_token().is_none());
        let err = db.query("SELECT SLEEP(1)", Vec::<Value>::new()).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(db.trace().records()[0].status, TraceStatus::Failure);
    }
}
