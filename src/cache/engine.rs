//! Request path through the tiered cache.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    CacheError,
    keys::Classifier,
    storage::CachedResponse,
    strategy::{Strategy, StrategyPlan, TierRole},
    tier::CacheTier,
};

/// Network side of the cache.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a path (resolved against the origin) or an absolute URL.
    async fn fetch(&self, request: &str) -> Result<CachedResponse, CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

#[derive(Debug, Clone)]
pub struct Served {
    pub response: CachedResponse,
    pub source: ResponseSource,
}

pub struct ResponseCache {
    classifier: Classifier,
    static_tier: Arc<CacheTier>,
    content_tier: Arc<CacheTier>,
    fetcher: Arc<dyn Fetcher>,
}

impl ResponseCache {
    pub fn new(
        classifier: Classifier,
        static_tier: Arc<CacheTier>,
        content_tier: Arc<CacheTier>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            classifier,
            static_tier,
            content_tier,
            fetcher,
        }
    }

    pub fn static_tier(&self) -> &Arc<CacheTier> {
        &self.static_tier
    }

    pub fn content_tier(&self) -> &Arc<CacheTier> {
        &self.content_tier
    }

    pub fn plan(&self, request: &str) -> StrategyPlan {
        StrategyPlan::for_class(self.classifier.classify(request))
    }

    /// Answer `request` (path and query) from cache or network.
    ///
    /// Errors only when the network is needed and fails.
    pub async fn handle(&self, request: &str) -> Result<Served, CacheError> {
        let plan = self.plan(request);
        let key = plan.key(request);
        debug!(
            target = "wittr::cache",
            request,
            key = %key,
            class = plan.class.as_str(),
            "cache request"
        );

        match (plan.strategy, plan.tier) {
            (Strategy::CacheFirst, Some(role)) => {
                let tier = self.tier(role);
                if let Some(hit) = cached(tier, &key).await {
                    return Ok(Served::cache(hit));
                }
                let response = self.fetcher.fetch(request).await?;
                store(tier, &plan, &key, &response).await;
                Ok(Served::network(response))
            }
            (Strategy::StaleWhileRevalidate, Some(role)) => {
                let tier = self.tier(role).clone();
                match cached(&tier, &key).await {
                    Some(hit) => {
                        let fetcher = self.fetcher.clone();
                        let request = request.to_string();
                        tokio::spawn(async move {
                            match fetcher.fetch(&request).await {
                                Ok(fresh) => store(&tier, &plan, &key, &fresh).await,
                                Err(err) => debug!(
                                    target = "wittr::cache",
                                    error = %err,
                                    "background revalidation failed"
                                ),
                            }
                        });
                        Ok(Served::cache(hit))
                    }
                    None => {
                        let response = self.fetcher.fetch(request).await?;
                        store(&tier, &plan, &key, &response).await;
                        Ok(Served::network(response))
                    }
                }
            }
            _ => {
                for tier in [&self.static_tier, &self.content_tier] {
                    if let Some(hit) = cached(tier, &key).await {
                        return Ok(Served::cache(hit));
                    }
                }
                let response = self.fetcher.fetch(request).await?;
                Ok(Served::network(response))
            }
        }
    }

    fn tier(&self, role: TierRole) -> &Arc<CacheTier> {
        match role {
            TierRole::Static => &self.static_tier,
            TierRole::Content => &self.content_tier,
        }
    }
}

impl Served {
    fn cache(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
        }
    }

    fn network(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }
}

/// Storage failures on lookup degrade to a miss.
async fn cached(tier: &CacheTier, key: &str) -> Option<CachedResponse> {
    match tier.lookup(key).await {
        Ok(hit) => hit,
        Err(err) => {
            warn!(target = "wittr::cache", tier = %tier.name(), key, error = %err, "cache lookup failed");
            None
        }
    }
}

/// Write a cacheable response. Failures are logged, never surfaced.
async fn store(tier: &CacheTier, plan: &StrategyPlan, key: &str, response: &CachedResponse) {
    if !plan.is_cacheable(response.status) {
        debug!(
            target = "wittr::cache",
            key,
            status = response.status,
            "response not cacheable"
        );
        return;
    }
    if let Err(err) = tier.insert(key, response.clone()).await {
        warn!(target = "wittr::cache", tier = %tier.name(), key, error = %err, "cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex, time::Duration};

    use super::*;
    use crate::cache::{
        policy::EvictionPolicy,
        storage::{CacheStorage, MemoryCacheStorage},
        tier::{CacheVersion, TierName},
    };

    /// Serves a fixed body per path and counts calls. Unknown paths fail.
    #[derive(Default)]
    struct StubFetcher {
        bodies: Mutex<HashMap<String, (u16, String)>>,
        calls: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        fn set(&self, path: &str, status: u16, body: &str) {
            self.bodies
                .lock()
                .expect("bodies lock")
                .insert(path.to_string(), (status, body.to_string()));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, request: &str) -> Result<CachedResponse, CacheError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(request.to_string());
            let found = self.bodies.lock().expect("bodies lock").get(request).cloned();
            match found {
                Some((status, body)) => Ok(CachedResponse::new(status, Vec::new(), body)),
                None => Err(CacheError::network(request, "offline")),
            }
        }
    }

    fn cache(fetcher: Arc<StubFetcher>) -> (ResponseCache, Arc<dyn CacheStorage>) {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryCacheStorage::default());
        let cache = ResponseCache::new(
            Classifier::default(),
            Arc::new(CacheTier::new(
                TierName::Static(CacheVersion::new(1)),
                storage.clone(),
                EvictionPolicy::UNBOUNDED,
            )),
            Arc::new(CacheTier::new(
                TierName::Content,
                storage.clone(),
                EvictionPolicy::UNBOUNDED,
            )),
            fetcher,
        );
        (cache, storage)
    }

    #[tokio::test]
    async fn photo_sizes_share_one_cached_entry() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.set("/photos/1-2-3-4-800px.jpg", 200, "large");
        let (cache, _) = cache(fetcher.clone());

        let first = cache.handle("/photos/1-2-3-4-800px.jpg").await.expect("fetch");
        assert_eq!(first.source, ResponseSource::Network);

        let second = cache.handle("/photos/1-2-3-4-320px.jpg").await.expect("hit");
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.response.body, bytes::Bytes::from("large"));
        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(
            cache.content_tier().keys().await.expect("keys"),
            vec!["/photos/1-2-3-4"]
        );
    }

    #[tokio::test]
    async fn uncacheable_status_is_served_not_stored() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.set("/photos/1-2-3-4-800px.jpg", 404, "missing");
        let (cache, _) = cache(fetcher.clone());

        let served = cache.handle("/photos/1-2-3-4-800px.jpg").await.expect("served");
        assert_eq!(served.response.status, 404);
        assert!(cache.content_tier().keys().await.expect("keys").is_empty());
    }

    #[tokio::test]
    async fn avatar_serves_stale_then_refreshes() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.set("/avatars/sam-1x.jpg", 200, "v1");
        let (cache, _) = cache(fetcher.clone());

        cache.handle("/avatars/sam-1x.jpg").await.expect("prime");
        fetcher.set("/avatars/sam-2x.jpg", 200, "v2");

        let stale = cache.handle("/avatars/sam-2x.jpg").await.expect("stale");
        assert_eq!(stale.source, ResponseSource::Cache);
        assert_eq!(stale.response.body, bytes::Bytes::from("v1"));

        let mut refreshed = None;
        for _ in 0..50 {
            let entry = cache
                .content_tier()
                .lookup("/avatars/sam")
                .await
                .expect("lookup");
            if entry.as_ref().is_some_and(|r| r.body == "v2") {
                refreshed = entry;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(refreshed.is_some(), "background refresh stored v2");
    }

    #[tokio::test]
    async fn network_failure_on_miss_is_an_error() {
        let fetcher = Arc::new(StubFetcher::default());
        let (cache, _) = cache(fetcher);
        let err = cache.handle("/static/app.js").await.expect_err("offline");
        assert!(matches!(err, CacheError::Network { .. }));
    }

    #[tokio::test]
    async fn other_requests_use_any_tier_without_persisting() {
        let fetcher = Arc::new(StubFetcher::default());
        fetcher.set("/feed.json", 200, "net");
        let (cache, storage) = cache(fetcher.clone());

        let served = cache.handle("/feed.json").await.expect("network");
        assert_eq!(served.source, ResponseSource::Network);
        assert!(storage.tier_names().await.expect("names").is_empty());

        cache
            .content_tier()
            .insert("/feed.json", CachedResponse::new(200, Vec::new(), "cached"))
            .await
            .expect("seed");
        let served = cache.handle("/feed.json").await.expect("hit");
        assert_eq!(served.source, ResponseSource::Cache);
    }
}
