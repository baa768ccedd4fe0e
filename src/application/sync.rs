//! Client side of the feed protocol: reconnect loop, merge and asset sweeps.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheError, gc::collect_garbage, tier::CacheTier},
    domain::post::Post,
};

use super::{
    freshness::{Freshness, SOFT_REFRESH_INTERVAL, relative_label},
    store::{FeedStore, MergeOutcome, RepoError},
};

pub const RECONNECT_MESSAGE: &str = "Unable to connect. Retrying…";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("feed transport failed: {0}")]
    Transport(String),
    #[error("feed message could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Store(#[from] RepoError),
}

impl SyncError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type BatchStream = BoxStream<'static, Result<Vec<Post>, SyncError>>;

/// Opens the live channel to the feed server.
///
/// The returned stream yields one item per inbound message. An item error is
/// a bad message; the stream ending means the channel closed.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn open(&self, since: Option<OffsetDateTime>) -> Result<BatchStream, SyncError>;
}

/// Presentation hook for the "reconnecting" notice.
pub trait StatusSink: Send + Sync {
    fn show(&self, message: &str);
    fn hide(&self);
}

/// Default sink that writes the notice to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn show(&self, message: &str) {
        warn!(target = "wittr::sync", "{message}");
    }

    fn hide(&self) {
        info!(target = "wittr::sync", "connection restored");
    }
}

/// Single persistent notice, shown at most once per outage.
pub struct ConnectionIndicator {
    visible: AtomicBool,
    sink: Arc<dyn StatusSink>,
}

impl ConnectionIndicator {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            visible: AtomicBool::new(false),
            sink,
        }
    }

    pub fn show(&self) {
        if !self.visible.swap(true, Ordering::SeqCst) {
            self.sink.show(RECONNECT_MESSAGE);
        }
    }

    pub fn hide(&self) {
        if self.visible.swap(false, Ordering::SeqCst) {
            self.sink.hide();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

enum SessionEnd {
    Closed,
    Cancelled,
}

pub struct SyncClient {
    connector: Arc<dyn FeedConnector>,
    store: Arc<dyn FeedStore>,
    freshness: Arc<Freshness>,
    indicator: ConnectionIndicator,
    reconnect_delay: Duration,
    last_known: Mutex<Option<OffsetDateTime>>,
}

impl SyncClient {
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        store: Arc<dyn FeedStore>,
        freshness: Arc<Freshness>,
        sink: Arc<dyn StatusSink>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            connector,
            store,
            freshness,
            indicator: ConnectionIndicator::new(sink),
            reconnect_delay,
            last_known: Mutex::new(None),
        }
    }

    pub fn indicator(&self) -> &ConnectionIndicator {
        &self.indicator
    }

    pub async fn last_known(&self) -> Option<OffsetDateTime> {
        *self.last_known.lock().await
    }

    /// Relative age of the newest known post, e.g. `45s` or `3m`.
    pub async fn newest_age(&self, now: OffsetDateTime) -> Option<String> {
        self.last_known()
            .await
            .map(|time| relative_label(time, now))
    }

    /// Keep a channel open until `cancel` fires, reconnecting after a fixed
    /// delay whenever it drops.
    pub async fn run(&self, cancel: CancellationToken) {
        match self.store.latest_time().await {
            Ok(latest) => *self.last_known.lock().await = latest,
            Err(err) => warn!(target = "wittr::sync", error = %err, "could not read local store"),
        }

        loop {
            match self.session(&cancel).await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::Closed) => {
                    info!(target = "wittr::sync", "feed channel closed");
                }
                Err(err) => {
                    warn!(target = "wittr::sync", error = %err, "feed channel failed");
                }
            }

            self.indicator.show();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        debug!(target = "wittr::sync", "sync client stopped");
    }

    async fn session(&self, cancel: &CancellationToken) -> Result<SessionEnd, SyncError> {
        let since = self.last_known().await;
        let mut batches = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            opened = self.connector.open(since) => opened?,
        };
        self.indicator.hide();
        info!(
            target = "wittr::sync",
            since = ?since,
            "feed channel open"
        );

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                next = batches.next() => next,
            };
            match next {
                Some(Ok(posts)) => {
                    self.apply_batch(posts).await?;
                }
                Some(Err(SyncError::Decode(message))) => {
                    warn!(target = "wittr::sync", %message, "ignoring malformed feed message");
                }
                Some(Err(err)) => return Err(err),
                None => return Ok(SessionEnd::Closed),
            }
        }
    }

    /// Fold one inbound batch into the store and advance `last_known`.
    pub async fn apply_batch(&self, posts: Vec<Post>) -> Result<MergeOutcome, SyncError> {
        if posts.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let outcome = self.store.merge(&posts).await?;
        if let Some(newest) = posts.iter().map(|post| post.time).max() {
            let mut last_known = self.last_known.lock().await;
            if last_known.is_none_or(|known| newest > known) {
                *last_known = Some(newest);
            }
        }
        let quiet_for = self.freshness.since_last_update();
        let refresh_due = self.freshness.needs_refresh(SOFT_REFRESH_INTERVAL);
        self.freshness.touch();
        debug!(
            target = "wittr::sync",
            received = posts.len(),
            upserted = outcome.upserted,
            pruned = outcome.pruned,
            retained = outcome.retained,
            "merged feed batch"
        );
        // Bursts inside the soft-refresh window only log at debug.
        if refresh_due {
            let newest = self.newest_age(OffsetDateTime::now_utc()).await;
            info!(
                target = "wittr::sync",
                newest = newest.as_deref().unwrap_or("-"),
                quiet_ms = quiet_for.map(|elapsed| elapsed.as_millis() as u64),
                retained = outcome.retained,
                "feed updated"
            );
        }
        Ok(outcome)
    }
}

/// Periodically drops content-tier entries that no retained post references.
pub struct AssetJanitor {
    store: Arc<dyn FeedStore>,
    content: Arc<CacheTier>,
    interval: Duration,
}

impl AssetJanitor {
    pub fn new(store: Arc<dyn FeedStore>, content: Arc<CacheTier>, interval: Duration) -> Self {
        Self {
            store,
            content,
            interval,
        }
    }

    /// Sweep once now, then every `interval` until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if let Err(err) = self.sweep().await {
                warn!(target = "wittr::sync", error = %err, "asset sweep failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    pub async fn sweep(&self) -> Result<usize, SweepError> {
        let posts = self.store.load().await?;
        let removed = collect_garbage(&self.content, &posts).await?;
        if removed > 0 {
            info!(target = "wittr::sync", removed, "removed unreferenced assets");
        }
        Ok(removed)
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Store(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use futures::stream;
    use time::macros::datetime;

    use super::*;
    use crate::domain::post::PostId;

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<String>>,
    }

    impl StatusSink for RecordingSink {
        fn show(&self, message: &str) {
            self.events
                .lock()
                .expect("events lock")
                .push(format!("show:{message}"));
        }

        fn hide(&self) {
            self.events
                .lock()
                .expect("events lock")
                .push("hide".to_string());
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        posts: StdMutex<Vec<Post>>,
    }

    #[async_trait]
    impl FeedStore for MemoryStore {
        async fn merge(&self, batch: &[Post]) -> Result<MergeOutcome, RepoError> {
            let mut posts = self.posts.lock().expect("store lock");
            for post in batch {
                posts.retain(|existing| existing.id != post.id);
                posts.push(post.clone());
            }
            posts.sort_by(|a, b| b.time.cmp(&a.time));
            let pruned = posts.len().saturating_sub(2);
            posts.truncate(2);
            Ok(MergeOutcome {
                upserted: batch.len(),
                pruned,
                retained: posts.len(),
            })
        }

        async fn load(&self) -> Result<Vec<Post>, RepoError> {
            Ok(self.posts.lock().expect("store lock").clone())
        }

        async fn latest_time(&self) -> Result<Option<OffsetDateTime>, RepoError> {
            Ok(self
                .posts
                .lock()
                .expect("store lock")
                .first()
                .map(|p| p.time))
        }

        async fn len(&self) -> Result<usize, RepoError> {
            Ok(self.posts.lock().expect("store lock").len())
        }

        fn capacity(&self) -> usize {
            2
        }
    }

    /// Fails the first `failures` opens, then serves `batches` once.
    struct ScriptedConnector {
        failures: StdMutex<usize>,
        batches: StdMutex<Option<Vec<Result<Vec<Post>, SyncError>>>>,
        seen_since: StdMutex<Vec<Option<OffsetDateTime>>>,
    }

    #[async_trait]
    impl FeedConnector for ScriptedConnector {
        async fn open(&self, since: Option<OffsetDateTime>) -> Result<BatchStream, SyncError> {
            self.seen_since.lock().expect("since lock").push(since);
            {
                let mut failures = self.failures.lock().expect("failures lock");
                if *failures > 0 {
                    *failures -= 1;
                    return Err(SyncError::transport("refused"));
                }
            }
            match self.batches.lock().expect("batches lock").take() {
                Some(batches) => Ok(stream::iter(batches).chain(stream::pending()).boxed()),
                None => Ok(stream::pending().boxed()),
            }
        }
    }

    fn post(id: &str, seconds: i64) -> Post {
        Post {
            id: PostId::from(id),
            body: String::new(),
            name: "N".to_string(),
            avatar: "/avatars/n".to_string(),
            photo: None,
            time: datetime!(2024-01-01 00:00 UTC) + time::Duration::seconds(seconds),
        }
    }

    #[test]
    fn indicator_shows_once_and_hides_once() {
        let sink = Arc::new(RecordingSink::default());
        let indicator = ConnectionIndicator::new(sink.clone());

        indicator.hide();
        indicator.show();
        indicator.show();
        indicator.show();
        indicator.hide();
        indicator.hide();

        let events = sink.events.lock().expect("events lock").clone();
        assert_eq!(events, vec![format!("show:{RECONNECT_MESSAGE}"), "hide".to_string()]);
    }

    #[tokio::test]
    async fn apply_batch_merges_and_advances_last_known() {
        let store = Arc::new(MemoryStore::default());
        let client = SyncClient::new(
            Arc::new(ScriptedConnector {
                failures: StdMutex::new(0),
                batches: StdMutex::new(None),
                seen_since: StdMutex::new(Vec::new()),
            }),
            store.clone(),
            Arc::new(Freshness::new()),
            Arc::new(RecordingSink::default()),
            Duration::from_millis(1),
        );

        client
            .apply_batch(vec![post("a", 10), post("b", 30), post("c", 20)])
            .await
            .expect("merge");
        assert_eq!(client.last_known().await, Some(post("b", 30).time));
        assert_eq!(store.len().await.expect("len"), 2);

        client.apply_batch(vec![post("old", 1)]).await.expect("merge");
        assert_eq!(client.last_known().await, Some(post("b", 30).time));
    }

    #[tokio::test]
    async fn merge_marks_feed_fresh_and_reports_newest_age() {
        let freshness = Arc::new(Freshness::new());
        let client = SyncClient::new(
            Arc::new(ScriptedConnector {
                failures: StdMutex::new(0),
                batches: StdMutex::new(None),
                seen_since: StdMutex::new(Vec::new()),
            }),
            Arc::new(MemoryStore::default()),
            freshness.clone(),
            Arc::new(RecordingSink::default()),
            Duration::from_millis(1),
        );
        assert!(freshness.needs_refresh(SOFT_REFRESH_INTERVAL));
        assert_eq!(client.newest_age(post("a", 0).time).await, None);

        client
            .apply_batch(vec![post("a", 0)])
            .await
            .expect("merge");

        assert!(!freshness.needs_refresh(SOFT_REFRESH_INTERVAL));
        assert!(freshness.since_last_update().is_some());
        let now = post("a", 0).time + time::Duration::seconds(150);
        assert_eq!(client.newest_age(now).await.as_deref(), Some("2m"));
    }

    #[tokio::test]
    async fn run_retries_until_connected_and_uses_last_known() {
        let store = Arc::new(MemoryStore::default());
        store.merge(&[post("seed", 5)]).await.expect("seed");

        let connector = Arc::new(ScriptedConnector {
            failures: StdMutex::new(2),
            batches: StdMutex::new(Some(vec![
                Ok(vec![post("x", 50)]),
                Err(SyncError::decode("garbage")),
                Ok(vec![post("y", 60)]),
            ])),
            seen_since: StdMutex::new(Vec::new()),
        });
        let sink = Arc::new(RecordingSink::default());
        let client = Arc::new(SyncClient::new(
            connector.clone(),
            store.clone(),
            Arc::new(Freshness::new()),
            sink.clone(),
            Duration::from_millis(5),
        ));

        let cancel = CancellationToken::new();
        let handle = {
            let client = client.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { client.run(cancel).await })
        };

        for _ in 0..100 {
            if client.last_known().await == Some(post("y", 60).time) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        handle.await.expect("client joins");

        let seen = connector.seen_since.lock().expect("since lock").clone();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|since| *since == Some(post("seed", 5).time)));

        let events = sink.events.lock().expect("events lock").clone();
        assert_eq!(events, vec![format!("show:{RECONNECT_MESSAGE}"), "hide".to_string()]);
        assert!(!client.indicator().is_visible());

        let ids: Vec<_> = store
            .load()
            .await
            .expect("load")
            .into_iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(ids, vec!["y", "x"]);
    }
}
