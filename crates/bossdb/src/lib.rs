//! # bossdb
//!
//! A small data-access layer for forum-style web apps on MySQL or Postgres.
//!
//! ## Features
//!
//! - **Safe by default**: values are always bound, identifiers are validated
//!   and quoted, and UPDATE/DELETE refuse to run without a filter
//! - **Immutable builder**: every clause returns a new [`Table`], so state never
//!   leaks from one statement into the next
//! - **Pagination**: one call runs the count and page queries and returns rows
//!   plus a [`Pagination`] descriptor with navigation URLs
//! - **Diagnostics**: every statement lands in a per-handle [`TraceLog`] and can
//!   be observed with [`QueryMonitor`]s
//! - **Caching**: TTL caching of query results with [`cache::remember`]
//!
//! ## Example
//!
//! ```ignore
//! use bossdb::prelude::*;
//!
//! let registry = PoolRegistry::new();
//! let db = registry.connect(&config).await?;
//!
//! let id = db
//!     .table("post")?
//!     .insert(Record::new().set("content", "hello").set("user_id", 1))
//!     .await?;
//!
//! let page = db
//!     .table("post")?
//!     .filter("user_id = ?", [1])
//!     .order_by("id DESC")
//!     .paginate(10, PageRequest::from_query("page=2").base_url("post/index"))
//!     .get("*")
//!     .await?;
//!
//! db.table("post")?.filter("id = ?", [id]).delete().await?;
//! ```

pub mod builder;
pub mod cache;
pub mod client;
pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod ident;
pub mod logger;
pub mod monitor;
pub mod paginate;
pub mod prelude;
pub mod row;
pub mod sql;
pub mod transaction;
pub mod value;

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(test)]
mod testing;

pub use builder::{ColumnInfo, Page, Paginated, Table};
pub use cache::{Cache, CacheConfig, Cacher, FileCache, MemoryCache, remember};
pub use client::GenericClient;
pub use config::{AppConfig, ConnectionConfig, Driver};
pub use db::Db;
pub use dialect::Dialect;
pub use error::{DbError, DbResult};
pub use logger::{FileLogger, Level, LogConfig};
pub use monitor::{
    MonitorConfig, QueryContext, QueryMonitor, QueryResult, QueryStats, QueryType, StatsMonitor,
    TraceLog, TraceRecord, TraceStatus, TracingMonitor,
};
pub use paginate::{PageRequest, Pagination};
pub use row::{FromRow, Record, Row};
pub use sql::Statement;
pub use value::{FromValue, Value};

#[cfg(feature = "pool")]
pub use pool::{PoolRegistry, PooledClient};

#[doc(hidden)]
pub mod __private {
    pub use tracing;
}
