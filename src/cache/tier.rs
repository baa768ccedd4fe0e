//! Named cache tiers and their eviction rules.

use std::{fmt, str::FromStr, sync::Arc};

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::{
    CacheError,
    policy::EvictionPolicy,
    storage::{CacheStorage, CachedResponse, StoredEntry},
};

pub const STATIC_TIER_PREFIX: &str = "wittr-static-v";
pub const CONTENT_TIER_NAME: &str = "wittr-content-imgs";

const METRIC_CACHE_HIT: &str = "wittr_cache_hit_total";
const METRIC_CACHE_MISS: &str = "wittr_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "wittr_cache_evict_total";

/// Static asset version, threaded through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheVersion(u32);

impl CacheVersion {
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parsed tier name. Upgrade cleanup compares these, never raw strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierName {
    Static(CacheVersion),
    Content,
}

impl TierName {
    pub fn is_static(&self) -> bool {
        matches!(self, TierName::Static(_))
    }

    fn metric_label(&self) -> &'static str {
        match self {
            TierName::Static(_) => "static",
            TierName::Content => "content",
        }
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierName::Static(version) => write!(f, "{STATIC_TIER_PREFIX}{version}"),
            TierName::Content => f.write_str(CONTENT_TIER_NAME),
        }
    }
}

impl FromStr for TierName {
    type Err = CacheError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == CONTENT_TIER_NAME {
            return Ok(TierName::Content);
        }
        value
            .strip_prefix(STATIC_TIER_PREFIX)
            .and_then(|version| version.parse::<u32>().ok())
            .map(|version| TierName::Static(CacheVersion(version)))
            .ok_or_else(|| CacheError::storage(format!("unrecognised tier name `{value}`")))
    }
}

/// Result of writing into a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored { evicted: usize },
    /// Storage stayed full after purging; the response was not kept.
    Dropped,
}

/// One tier bound to its storage and policy.
pub struct CacheTier {
    name: TierName,
    storage_name: String,
    storage: Arc<dyn CacheStorage>,
    policy: EvictionPolicy,
}

impl CacheTier {
    pub fn new(name: TierName, storage: Arc<dyn CacheStorage>, policy: EvictionPolicy) -> Self {
        Self {
            storage_name: name.to_string(),
            name,
            storage,
            policy,
        }
    }

    pub fn name(&self) -> TierName {
        self.name
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Stored response for `key`, treating expired entries as misses and
    /// deleting them.
    pub async fn lookup(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let label = self.name.metric_label();
        let Some(entry) = self.storage.get(&self.storage_name, key).await? else {
            counter!(METRIC_CACHE_MISS, "tier" => label).increment(1);
            return Ok(None);
        };

        if self
            .policy
            .is_expired(entry.inserted_at, OffsetDateTime::now_utc())
        {
            self.storage.delete(&self.storage_name, key).await?;
            counter!(METRIC_CACHE_EVICT, "tier" => label, "reason" => "expired").increment(1);
            counter!(METRIC_CACHE_MISS, "tier" => label).increment(1);
            debug!(target = "wittr::cache", tier = %self.name, key, "expired entry evicted");
            return Ok(None);
        }

        counter!(METRIC_CACHE_HIT, "tier" => label).increment(1);
        Ok(Some(entry.response))
    }

    /// Store `response` under `key` and enforce `max_entries`.
    ///
    /// A quota failure purges this tier (expired entries, then the oldest
    /// half) and retries once. A second failure drops the write.
    pub async fn insert(
        &self,
        key: &str,
        response: CachedResponse,
    ) -> Result<InsertOutcome, CacheError> {
        self.insert_entry(key, StoredEntry::now(response)).await
    }

    pub async fn insert_entry(
        &self,
        key: &str,
        entry: StoredEntry,
    ) -> Result<InsertOutcome, CacheError> {
        match self.storage.put(&self.storage_name, key, entry.clone()).await {
            Ok(()) => {}
            Err(CacheError::QuotaExceeded { .. }) => {
                let purged = self.purge_for_quota().await?;
                match self.storage.put(&self.storage_name, key, entry).await {
                    Ok(()) => {
                        debug!(
                            target = "wittr::cache",
                            tier = %self.name,
                            key,
                            purged,
                            "stored after quota purge"
                        );
                    }
                    Err(CacheError::QuotaExceeded { .. }) => {
                        warn!(
                            target = "wittr::cache",
                            tier = %self.name,
                            key,
                            purged,
                            "storage quota exhausted, response not cached"
                        );
                        return Ok(InsertOutcome::Dropped);
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }

        let evicted = self.enforce_max_entries().await?;
        Ok(InsertOutcome::Stored { evicted })
    }

    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        self.storage.delete(&self.storage_name, key).await
    }

    /// Keys from least to most recently inserted.
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.storage.keys(&self.storage_name).await
    }

    pub async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.keys().await?.len())
    }

    pub(crate) fn record_eviction(&self, reason: &'static str, count: usize) {
        if count > 0 {
            counter!(
                METRIC_CACHE_EVICT,
                "tier" => self.name.metric_label(),
                "reason" => reason
            )
            .increment(count as u64);
        }
    }

    async fn enforce_max_entries(&self) -> Result<usize, CacheError> {
        let Some(max_entries) = self.policy.max_entries else {
            return Ok(0);
        };

        let keys = self.keys().await?;
        let excess = keys.len().saturating_sub(max_entries.get());
        let mut evicted = 0;
        for key in keys.iter().take(excess) {
            if self.storage.delete(&self.storage_name, key).await? {
                evicted += 1;
            }
        }
        self.record_eviction("capacity", evicted);
        Ok(evicted)
    }

    async fn purge_for_quota(&self) -> Result<usize, CacheError> {
        let now = OffsetDateTime::now_utc();
        let mut survivors = Vec::new();
        let mut purged = 0;

        for key in self.keys().await? {
            let expired = self
                .storage
                .get(&self.storage_name, &key)
                .await?
                .is_some_and(|entry| self.policy.is_expired(entry.inserted_at, now));
            if expired {
                self.storage.delete(&self.storage_name, &key).await?;
                purged += 1;
            } else {
                survivors.push(key);
            }
        }

        let oldest_half = survivors.len().div_ceil(2);
        for key in survivors.iter().take(oldest_half) {
            if self.storage.delete(&self.storage_name, key).await? {
                purged += 1;
            }
        }

        self.record_eviction("quota", purged);
        Ok(purged)
    }
}
