use super::truncate_sql_bytes;
use super::types::{QueryContext, QueryMonitor, QueryResult, QueryType};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Outcome column of a [`TraceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Success,
    Failure,
}

/// One executed statement as seen by the diagnostic trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub status: TraceStatus,
    pub sql: String,
    /// Wall time in milliseconds, rounded to two decimals.
    pub elapsed_ms: f64,
    /// Empty on success.
    pub error: String,
}

/// In-process record of every statement a [`crate::Db`] executed.
///
/// Cheap to clone; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded statements, oldest first.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn push(&self, record: TraceRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

impl QueryMonitor for TraceLog {
    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        let (status, error) = match result {
            QueryResult::Error(e) => (TraceStatus::Failure, e.clone()),
            _ => (TraceStatus::Success, String::new()),
        };
        let elapsed_ms = (duration.as_secs_f64() * 100_000.0).round() / 100.0;
        self.push(TraceRecord {
            status,
            sql: ctx.sql.clone(),
            elapsed_ms,
            error,
        });
    }
}

/// Emits one `tracing` event per statement at target `bossdb.sql`.
///
/// Successes log at DEBUG, failures and slow statements at WARN.
#[derive(Debug, Clone)]
pub struct TracingMonitor {
    /// Truncate long SQL strings (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
}

impl Default for TracingMonitor {
    fn default() -> Self {
        Self {
            max_sql_length: Some(200),
        }
    }
}

impl TracingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    pub(crate) fn truncate_sql(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }
}

fn elapsed_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl QueryMonitor for TracingMonitor {
    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        let sql = self.truncate_sql(&ctx.sql);
        let table = ctx.table.as_deref().unwrap_or("-");
        match result {
            QueryResult::Error(error) => tracing::warn!(
                target: "bossdb.sql",
                query_type = ctx.query_type.as_str(),
                table,
                param_count = ctx.param_count,
                elapsed_ms = elapsed_ms(duration),
                error = %error,
                sql = %sql,
                "statement failed"
            ),
            _ => tracing::debug!(
                target: "bossdb.sql",
                query_type = ctx.query_type.as_str(),
                table,
                param_count = ctx.param_count,
                elapsed_ms = elapsed_ms(duration),
                result = %result,
                sql = %sql,
            ),
        }
    }

    fn on_slow_query(&self, ctx: &QueryContext, duration: Duration) {
        tracing::warn!(
            target: "bossdb.sql",
            query_type = ctx.query_type.as_str(),
            elapsed_ms = elapsed_ms(duration),
            sql = %self.truncate_sql(&ctx.sql),
            "slow query"
        );
    }
}

/// A monitor that counts statements by type.
#[derive(Debug, Default)]
pub struct StatsMonitor {
    stats: Mutex<QueryStats>,
}

/// Collected statement statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    pub total_queries: u64,
    pub failed_queries: u64,
    pub select_count: u64,
    pub insert_count: u64,
    pub update_count: u64,
    pub delete_count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub slowest_query: Option<String>,
}

impl StatsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> QueryStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = QueryStats::default();
    }
}

impl QueryMonitor for StatsMonitor {
    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.total_queries += 1;
        if result.is_error() {
            stats.failed_queries += 1;
        }
        match ctx.query_type {
            QueryType::Select => stats.select_count += 1,
            QueryType::Insert => stats.insert_count += 1,
            QueryType::Update => stats.update_count += 1,
            QueryType::Delete => stats.delete_count += 1,
            QueryType::Transaction | QueryType::Other => {}
        }
        stats.total_duration += duration;
        if duration > stats.max_duration {
            stats.max_duration = duration;
            stats.slowest_query = Some(ctx.sql.clone());
        }
    }
}
