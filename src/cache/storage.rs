//! Backing stores for named cache tiers.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use time::OffsetDateTime;

use super::{
    CacheError,
    lock::{rw_read, rw_write},
};

/// A response as kept in a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Bytes charged against the storage quota.
    pub fn size(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(key, value)| key.len() + value.len())
                .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub response: CachedResponse,
    pub inserted_at: OffsetDateTime,
}

impl StoredEntry {
    pub fn now(response: CachedResponse) -> Self {
        Self {
            response,
            inserted_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Named key/response maps. A tier exists while it holds at least one entry.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn tier_names(&self) -> Result<Vec<String>, CacheError>;

    async fn get(&self, tier: &str, key: &str) -> Result<Option<StoredEntry>, CacheError>;

    /// Insert or replace. Replacing moves the key to the newest position.
    /// Fails with [`CacheError::QuotaExceeded`] when the write does not fit.
    async fn put(&self, tier: &str, key: &str, entry: StoredEntry) -> Result<(), CacheError>;

    async fn delete(&self, tier: &str, key: &str) -> Result<bool, CacheError>;

    /// Keys ordered from least to most recently inserted.
    async fn keys(&self, tier: &str) -> Result<Vec<String>, CacheError>;

    async fn delete_tier(&self, tier: &str) -> Result<bool, CacheError>;
}

#[derive(Default)]
struct MemoryState {
    tiers: HashMap<String, LruCache<String, StoredEntry>>,
    used_bytes: usize,
}

/// Process-local storage with an optional byte quota.
pub struct MemoryCacheStorage {
    state: RwLock<MemoryState>,
    quota_bytes: Option<usize>,
}

impl MemoryCacheStorage {
    pub fn new(quota_bytes: Option<usize>) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            quota_bytes,
        }
    }

    pub fn used_bytes(&self) -> usize {
        rw_read(&self.state, "used_bytes").used_bytes
    }
}

impl Default for MemoryCacheStorage {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn tier_names(&self) -> Result<Vec<String>, CacheError> {
        let state = rw_read(&self.state, "tier_names");
        let mut names: Vec<String> = state
            .tiers
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, tier: &str, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let state = rw_read(&self.state, "get");
        Ok(state
            .tiers
            .get(tier)
            .and_then(|entries| entries.peek(key))
            .cloned())
    }

    async fn put(&self, tier: &str, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        let mut state = rw_write(&self.state, "put");
        let replaced = state
            .tiers
            .get(tier)
            .and_then(|entries| entries.peek(key))
            .map_or(0, |old| old.response.size());
        let projected = state.used_bytes - replaced + entry.response.size();

        if self.quota_bytes.is_some_and(|quota| projected > quota) {
            return Err(CacheError::QuotaExceeded {
                tier: tier.to_string(),
            });
        }

        state.used_bytes = projected;
        state
            .tiers
            .entry(tier.to_string())
            .or_insert_with(LruCache::unbounded)
            .put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, tier: &str, key: &str) -> Result<bool, CacheError> {
        let mut state = rw_write(&self.state, "delete");
        let removed = state
            .tiers
            .get_mut(tier)
            .and_then(|entries| entries.pop(key));
        match removed {
            Some(entry) => {
                state.used_bytes -= entry.response.size();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self, tier: &str) -> Result<Vec<String>, CacheError> {
        let state = rw_read(&self.state, "keys");
        Ok(state
            .tiers
            .get(tier)
            .map(|entries| entries.iter().rev().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete_tier(&self, tier: &str) -> Result<bool, CacheError> {
        let mut state = rw_write(&self.state, "delete_tier");
        match state.tiers.remove(tier) {
            Some(entries) => {
                let freed: usize = entries.iter().map(|(_, entry)| entry.response.size()).sum();
                state.used_bytes -= freed;
                Ok(!entries.is_empty())
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(body: &str) -> StoredEntry {
        StoredEntry::now(CachedResponse::new(200, Vec::new(), body.to_string()))
    }

    #[tokio::test]
    async fn keys_are_oldest_first_and_reinsert_moves_to_end() {
        let storage = MemoryCacheStorage::default();
        storage.put("t", "a", entry("1")).await.expect("put a");
        storage.put("t", "b", entry("2")).await.expect("put b");
        storage.put("t", "c", entry("3")).await.expect("put c");
        storage.put("t", "a", entry("4")).await.expect("re-put a");

        assert_eq!(storage.keys("t").await.expect("keys"), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn get_does_not_reorder() {
        let storage = MemoryCacheStorage::default();
        storage.put("t", "a", entry("1")).await.expect("put a");
        storage.put("t", "b", entry("2")).await.expect("put b");
        storage.get("t", "a").await.expect("get a");

        assert_eq!(storage.keys("t").await.expect("keys"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn quota_rejects_oversized_writes_and_tracks_usage() {
        let storage = MemoryCacheStorage::new(Some(8));
        storage.put("t", "a", entry("12345")).await.expect("fits");
        let err = storage
            .put("t", "b", entry("12345"))
            .await
            .expect_err("over quota");
        assert!(matches!(err, CacheError::QuotaExceeded { .. }));

        storage.delete("t", "a").await.expect("delete");
        assert_eq!(storage.used_bytes(), 0);
        storage.put("t", "b", entry("12345")).await.expect("fits after delete");
    }

    #[tokio::test]
    async fn empty_tiers_are_not_listed() {
        let storage = MemoryCacheStorage::default();
        storage.put("x", "k", entry("v")).await.expect("put");
        storage.put("y", "k", entry("v")).await.expect("put");
        storage.delete("y", "k").await.expect("delete");
        assert_eq!(storage.tier_names().await.expect("names"), vec!["x"]);

        assert!(storage.delete_tier("x").await.expect("delete tier"));
        assert!(storage.tier_names().await.expect("names").is_empty());
    }
}
