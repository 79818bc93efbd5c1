//! Query-result caching with a time-to-live.
//!
//! A [`Cacher`] stores JSON values under string keys. Entries expire after
//! their TTL and are dropped lazily on the next read; there is no eviction
//! policy beyond that.
//!
//! [`remember`] is the cache-aside helper most callers want:
//!
//! ```ignore
//! let cache = app.cache.build()?;
//! let key = app.cache.key("hot_posts", [page]);
//! let posts: Vec<Post> = remember(cache.as_ref(), &key, Duration::from_secs(60), || async {
//!     db.table("post")?.order_by("views DESC").limit(0, 10).get_as("*").await
//! })
//! .await?;
//! ```

mod file;
mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

use crate::error::{DbError, DbResult};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// A key/value store for JSON values with per-entry TTL.
pub trait Cacher: Send + Sync {
    /// The live value under `key`, or `None` when missing or expired.
    fn get(&self, key: &str) -> impl Future<Output = DbResult<Option<serde_json::Value>>> + Send;

    fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> impl Future<Output = DbResult<()>> + Send;

    /// Remove one entry. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> impl Future<Output = DbResult<()>> + Send;

    /// Remove every entry.
    fn clear(&self) -> impl Future<Output = DbResult<()>> + Send;
}

impl<T: Cacher> Cacher for &T {
    async fn get(&self, key: &str) -> DbResult<Option<serde_json::Value>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> DbResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        (**self).remove(key).await
    }

    async fn clear(&self) -> DbResult<()> {
        (**self).clear().await
    }
}

/// Which backend [`CacheConfig::build`] creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheDriver {
    #[default]
    File,
    Memory,
}

/// `[cache]` section of the application config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub driver: CacheDriver,
    /// Directory for the file driver.
    pub path: Option<String>,
    /// Prepended to every key built with [`CacheConfig::key`].
    pub prefix: String,
}

impl CacheConfig {
    pub fn validate(&self) -> DbResult<()> {
        if self.enabled
            && self.driver == CacheDriver::File
            && self.path.as_deref().is_none_or(|p| p.trim().is_empty())
        {
            return Err(DbError::configuration(
                "cache.path is required for the file cache driver",
            ));
        }
        Ok(())
    }

    /// Create the configured backend, or `None` when caching is disabled.
    pub fn build(&self) -> DbResult<Option<Cache>> {
        if !self.enabled {
            return Ok(None);
        }
        self.validate()?;
        let cache = match self.driver {
            CacheDriver::File => {
                Cache::File(FileCache::new(self.path.as_deref().unwrap_or_default()))
            }
            CacheDriver::Memory => Cache::Memory(MemoryCache::new()),
        };
        Ok(Some(cache))
    }

    /// [`cache_key`] with this config's prefix.
    pub fn key(&self, name: &str, parts: impl IntoIterator<Item = impl Display>) -> String {
        cache_key(&self.prefix, name, parts)
    }
}

/// A backend chosen at runtime from [`CacheConfig`].
#[derive(Debug)]
pub enum Cache {
    File(FileCache),
    Memory(MemoryCache),
}

impl Cacher for Cache {
    async fn get(&self, key: &str) -> DbResult<Option<serde_json::Value>> {
        match self {
            Cache::File(c) => c.get(key).await,
            Cache::Memory(c) => c.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> DbResult<()> {
        match self {
            Cache::File(c) => c.set(key, value, ttl).await,
            Cache::Memory(c) => c.set(key, value, ttl).await,
        }
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        match self {
            Cache::File(c) => c.remove(key).await,
            Cache::Memory(c) => c.remove(key).await,
        }
    }

    async fn clear(&self) -> DbResult<()> {
        match self {
            Cache::File(c) => c.clear().await,
            Cache::Memory(c) => c.clear().await,
        }
    }
}

/// `prefix + name`, followed by `_part` for each part.
pub fn cache_key(prefix: &str, name: &str, parts: impl IntoIterator<Item = impl Display>) -> String {
    let mut key = format!("{prefix}{name}");
    for part in parts {
        key.push('_');
        key.push_str(&part.to_string());
    }
    key
}

/// Return the cached value under `key`, or run `fetch` and cache its result.
///
/// Passing `None` for `cache` (caching disabled) always runs `fetch`. A cached
/// entry that no longer deserializes into `T` counts as a miss and is overwritten.
pub async fn remember<K, T, F, Fut>(
    cache: Option<&K>,
    key: &str,
    ttl: Duration,
    fetch: F,
) -> DbResult<T>
where
    K: Cacher,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let Some(cache) = cache else {
        return fetch().await;
    };

    if let Some(hit) = cache.get(key).await? {
        match serde_json::from_value(hit) {
            Ok(value) => {
                tracing::trace!(target: "bossdb.cache", key, "cache hit");
                return Ok(value);
            }
            Err(e) => {
                tracing::debug!(target: "bossdb.cache", key, error = %e, "stale cache entry");
            }
        }
    }

    let value = fetch().await?;
    let json = serde_json::to_value(&value)
        .map_err(|e| DbError::Serialization(format!("failed to cache {key}: {e}")))?;
    cache.set(key, json, ttl).await?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn builds_keys() {
        assert_eq!(cache_key("bbs_", "hot_posts", [3, 10]), "bbs_hot_posts_3_10");
        assert_eq!(cache_key("", "index", Vec::<String>::new()), "index");
        let config = CacheConfig {
            prefix: "x:".into(),
            ..CacheConfig::default()
        };
        assert_eq!(config.key("user", ["alice"]), "x:user_alice");
    }

    #[test]
    fn file_driver_needs_a_path() {
        let config = CacheConfig {
            enabled: true,
            ..CacheConfig::default()
        };
        assert!(config.validate().unwrap_err().is_configuration());
        assert!(config.build().is_err());

        let disabled = CacheConfig::default();
        assert!(disabled.build().unwrap().is_none());
    }

    #[test]
    fn memory_driver_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            cache: CacheConfig,
        }
        let w: Wrapper = toml::from_str(
            r#"
            [cache]
            enabled = true
            driver = "memory"
            "#,
        )
        .unwrap();
        assert!(matches!(w.cache.build().unwrap(), Some(Cache::Memory(_))));

        let bad = toml::from_str::<Wrapper>("[cache]\ndriver = \"redis\"\n");
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn remember_fetches_once() {
        let cache = MemoryCache::new();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1_i64, 2, 3])
        };

        let first: Vec<i64> = remember(Some(&cache), "k", Duration::from_secs(60), fetch)
            .await
            .unwrap();
        let second: Vec<i64> = remember(Some(&cache), "k", Duration::from_secs(60), fetch)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remember_without_cache_always_fetches() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        for _ in 0..2 {
            let n: i64 = remember(None::<&MemoryCache>, "k", Duration::from_secs(60), || async move {
                Ok(counter.fetch_add(1, Ordering::SeqCst) as i64)
            })
            .await
            .unwrap();
            assert!(n < 2);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remember_overwrites_mismatched_entry() {
        let cache = MemoryCache::new();
        cache
            .set("k", serde_json::json!("not a number"), Duration::from_secs(60))
            .await
            .unwrap();

        let n: i64 = remember(Some(&cache), "k", Duration::from_secs(60), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(n, 7);
        assert_eq!(cache.get("k").await.unwrap(), Some(serde_json::json!(7)));
    }

    #[tokio::test]
    async fn fetch_errors_are_not_cached() {
        let cache = MemoryCache::new();
        let result: DbResult<i64> = remember(Some(&cache), "k", Duration::from_secs(60), || async {
            Err(DbError::validation("boom"))
        })
        .await;
        assert!(result.unwrap_err().is_validation());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
