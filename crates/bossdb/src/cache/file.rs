use super::Cacher;
use crate::error::{DbError, DbResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

const EXTENSION: &str = "json";

/// One JSON file per key under a directory.
///
/// Files hold `{"expire": <unix seconds>, "data": <value>}`. An entry is live
/// until the clock passes `expire`.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct Entry {
    expire: i64,
    data: serde_json::Value,
}

impl FileCache {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`.
    ///
    /// Keys are reduced to `[A-Za-z0-9_.-]`; a key that had to be rewritten
    /// gets a BLAKE3 suffix so distinct keys never share a file. The suffix
    /// only depends on the key, so file names survive restarts and upgrades.
    pub(crate) fn path_for(&self, key: &str) -> PathBuf {
        let mut name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if name != key || name.is_empty() || name.starts_with('.') {
            let hash = blake3::hash(key.as_bytes()).to_hex();
            name = format!("{name}-{}", &hash.as_str()[..16]);
        }
        self.dir.join(format!("{name}.{EXTENSION}"))
    }
}

impl Cacher for FileCache {
    async fn get(&self, key: &str) -> DbResult<Option<serde_json::Value>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: Entry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(target: "bossdb.cache", path = %path.display(), error = %e, "unreadable cache file");
                return Ok(None);
            }
        };

        if entry.expire < Utc::now().timestamp() {
            self.remove(key).await?;
            return Ok(None);
        }
        Ok(Some(entry.data))
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> DbResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let entry = Entry {
            expire: Utc::now().timestamp().saturating_add(ttl),
            data: value,
        };
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| DbError::Serialization(format!("failed to encode cache entry: {e}")))?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> DbResult<()> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}
