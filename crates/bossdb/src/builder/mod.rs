//! Table query builder.
//!
//! [`Table`] composes one parameterized statement from fluent clause calls
//! and runs it through its [`crate::Db`]:
//!
//! ```ignore
//! let rows = db.table("post")?
//!     .join("LEFT JOIN user ON user.id = post.user_id")
//!     .filter("post.user_id = ?", [7])
//!     .order_by("post.id DESC")
//!     .limit(0, 20)
//!     .get("post.*, user.nickname")
//!     .await?;
//! ```
//!
//! - UPDATE, DELETE and increment refuse to run without a filter.
//! - Identifiers in write payloads and aggregates must match `^[a-zA-Z0-9_]+$`.
//! - Placeholders are `?` regardless of dialect; they are renumbered for Postgres.

mod paginated;
mod table;

pub use paginated::{Page, Paginated};
pub use table::{ColumnInfo, Table};
