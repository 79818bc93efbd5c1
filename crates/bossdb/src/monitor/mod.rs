//! Statement monitoring.
//!
//! Every statement a [`crate::Db`] executes is timed and reported to its
//! [`TraceLog`]; additional [`QueryMonitor`]s receive the same events when
//! [`MonitorConfig::monitoring_enabled`] is set.
//!
//! # Example
//!
//! ```rust,ignore
//! use bossdb::monitor::{MonitorConfig, TracingMonitor};
//! use std::time::Duration;
//!
//! let db = Db::new(client, config)
//!     .with_monitor_config(
//!         MonitorConfig::new()
//!             .with_slow_query_threshold(Duration::from_millis(200))
//!             .enable_monitoring(),
//!     )
//!     .with_monitor(TracingMonitor::new());
//! ```

mod config;
mod monitors;
mod types;


pub use config::MonitorConfig;
pub use monitors::{
    QueryStats, StatsMonitor, TraceLog, TraceRecord, TraceStatus, TracingMonitor,
};
pub use types::{QueryContext, QueryMonitor, QueryResult, QueryType};

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
