//! Connection pools shared across requests.
//!
//! A [`PoolRegistry`] keeps one `deadpool_postgres` pool per endpoint
//! ([`ConfigKey`]). Each request checks a connection out with
//! [`PoolRegistry::connect`] and gets its own [`Db`] handle; the connection
//! returns to the pool when the handle is dropped, unless a transaction is
//! still open on it. Such a connection is closed instead.

use crate::client::GenericClient;
use crate::config::{ConfigKey, ConnectionConfig, Driver};
use crate::db::Db;
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::row::Row;
use crate::value::Value;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio_postgres::NoTls;

#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<ConfigKey, Pool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool for `config`'s endpoint, created on first use.
    ///
    /// Pools connect lazily, so this never touches the network. Only the
    /// `pgsql` driver has a bundled connector; other drivers fail with
    /// [`DbError::Configuration`] and must be wrapped with [`Db::new`] instead.
    pub fn pool(&self, config: &ConnectionConfig) -> DbResult<Pool> {
        if config.driver != Driver::Pgsql {
            return Err(DbError::configuration(format!(
                "no bundled connector for driver {}; wrap your own client with Db::new",
                config.driver
            )));
        }
        config.validate()?;

        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pools.get(&config.key()) {
            return Ok(pool.clone());
        }

        let manager = Manager::from_config(
            config.pg_config()?,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size.max(1))
            .build()
            .map_err(|e| DbError::Pool(e.to_string()))?;

        tracing::debug!(
            target: "bossdb.pool",
            host = %config.host,
            database = %config.database,
            max_size = config.pool_size,
            "created connection pool"
        );
        pools.insert(config.key(), pool.clone());
        Ok(pool)
    }

    /// Check out a connection and wrap it in a per-request handle.
    pub async fn connect(&self, config: &ConnectionConfig) -> DbResult<Db<PooledClient>> {
        let pool = self.pool(config)?;
        let client = pool.get().await?;
        Db::new(PooledClient::new(client), config.clone())
    }

    /// Number of endpoints with a pool.
    pub fn len(&self) -> usize {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and forget every pool. Checked-out connections are dropped when returned.
    pub fn close_all(&self) {
        let pools = std::mem::take(&mut *self.pools.lock().unwrap_or_else(PoisonError::into_inner));
        for pool in pools.into_values() {
            pool.close();
        }
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.len())
            .finish()
    }
}

/// A connection checked out of a pool.
///
/// Dropping it while a transaction is open detaches the connection from its
/// pool and closes it, so the next checkout never lands inside someone
/// else's transaction.
pub struct PooledClient {
    client: Option<deadpool_postgres::Client>,
    in_transaction: AtomicBool,
}

impl PooledClient {
    pub fn new(client: deadpool_postgres::Client) -> Self {
        Self {
            client: Some(client),
            in_transaction: AtomicBool::new(false),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    fn inner(&self) -> DbResult<&deadpool_postgres::Client> {
        self.client
            .as_ref()
            .ok_or_else(|| DbError::Pool("connection already released".to_string()))
    }
}

impl GenericClient for PooledClient {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        GenericClient::query(self.inner()?, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        GenericClient::execute(self.inner()?, sql, params).await
    }

    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        GenericClient::batch_execute(self.inner()?, sql).await
    }

    fn cancel_token(&self) -> Option<tokio_postgres::CancelToken> {
        self.client.as_ref().and_then(GenericClient::cancel_token)
    }

    fn set_in_transaction(&self, open: bool) {
        self.in_transaction.store(open, Ordering::Release);
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if !*self.in_transaction.get_mut() {
            return;
        }
        if let Some(client) = self.client.take() {
            tracing::warn!(
                target: "bossdb.pool",
                "connection released inside a transaction; closing it instead of returning it to the pool"
            );
            drop(deadpool_postgres::Client::take(client));
        }
    }
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
