//! Convenient imports for typical `bossdb` usage.
//!
//! ```ignore
//! use bossdb::prelude::*;
//! ```

pub use crate::{
    Db, DbError, DbResult, FromRow, GenericClient, Page, PageRequest, Pagination, Record, Row,
    Table, Value, transaction,
};

#[cfg(feature = "pool")]
pub use crate::PoolRegistry;
