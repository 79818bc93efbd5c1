use super::Cacher;
use crate::error::DbResult;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Process-local cache. Entries live until their deadline passes.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, serde_json::Value)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Instant, serde_json::Value)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Cacher for MemoryCache {
    async fn get(&self, key: &str) -> DbResult<Option<serde_json::Value>> {
        let mut entries = self.lock();
        let Some((deadline, value)) = entries.get(key) else {
            return Ok(None);
        };
        if Instant::now() > *deadline {
            entries.remove(key);
            return Ok(None);
        }
        Ok(Some(value.clone()))
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> DbResult<()> {
        let now = Instant::now();
        let deadline = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(u32::MAX as u64));
        self.lock().insert(key.to_string(), (deadline, value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> DbResult<()> {
        self.lock().clear();
        Ok(())
    }
}
