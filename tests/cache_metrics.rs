use std::{collections::HashSet, num::NonZeroUsize, sync::Arc, time::Duration};

use metrics_util::debugging::DebuggingRecorder;
use time::OffsetDateTime;
use wittr::{
    application::{
        broadcast::{FeedConfig, FeedServer, SubscribeRequest},
        generator::{PostGenerator, SyntheticPostGenerator},
        store::FeedStore,
    },
    cache::{
        CacheTier, CachedResponse, EvictionPolicy, MemoryCacheStorage, StoredEntry, TierName,
    },
    domain::post::now_millis,
    infra::{db::SqliteRepositories, telemetry},
};

#[tokio::test]
async fn cache_feed_and_store_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Hit, miss and both eviction paths on a one-entry tier with an age cap.
    let tier = CacheTier::new(
        TierName::Content,
        Arc::new(MemoryCacheStorage::default()),
        EvictionPolicy {
            max_entries: NonZeroUsize::new(1),
            max_age: Some(Duration::from_secs(60)),
        },
    );
    assert!(tier.lookup("/avatars/sam").await.expect("lookup").is_none());
    tier.insert("/avatars/sam", CachedResponse::new(200, Vec::new(), "sam"))
        .await
        .expect("insert");
    assert!(tier.lookup("/avatars/sam").await.expect("lookup").is_some());
    tier.insert("/avatars/jo", CachedResponse::new(200, Vec::new(), "jo"))
        .await
        .expect("insert evicts");
    tier.insert_entry(
        "/avatars/old",
        StoredEntry {
            response: CachedResponse::new(200, Vec::new(), "old"),
            inserted_at: OffsetDateTime::now_utc() - Duration::from_secs(3600),
        },
    )
    .await
    .expect("insert stale");
    assert!(tier.lookup("/avatars/old").await.expect("lookup").is_none());

    // Feed broadcast counter and subscriber gauge.
    let feed = FeedServer::new(
        FeedConfig::default(),
        Arc::new(SyntheticPostGenerator::new()),
    );
    let _subscription = feed.subscribe(SubscribeRequest::default()).await;
    feed.tick().await;

    // Store pruning past its bound.
    let pool = SqliteRepositories::connect("sqlite::memory:", 1)
        .await
        .expect("in-memory pool");
    SqliteRepositories::run_migrations(&pool)
        .await
        .expect("migrations");
    let store = SqliteRepositories::new(pool, NonZeroUsize::new(2).expect("non-zero"));
    let generator = SyntheticPostGenerator::new();
    let now = now_millis();
    let batch: Vec<_> = (0..4i64)
        .map(|offset| generator.generate(now - Duration::from_secs(offset as u64)))
        .collect();
    let outcome = store.merge(&batch).await.expect("merge");
    assert_eq!(outcome.pruned, 2);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "wittr_cache_hit_total",
        "wittr_cache_miss_total",
        "wittr_cache_evict_total",
        "wittr_feed_subscribers",
        "wittr_feed_broadcast_total",
        "wittr_store_pruned_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
