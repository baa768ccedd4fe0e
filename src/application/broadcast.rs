//! Feed server: owns the ring and fans new posts out to live subscribers.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::post::{Post, now_millis};

use super::{
    generator::{PostGenerator, random_interval},
    ring::{DEFAULT_FEED_CAPACITY, FeedRing},
};

const METRIC_FEED_SUBSCRIBERS: &str = "wittr_feed_subscribers";
const METRIC_FEED_BROADCAST: &str = "wittr_feed_broadcast_total";

/// A batch of posts as sent on the live channel.
pub type Batch = Arc<Vec<Post>>;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub capacity: NonZeroUsize,
    pub tick_min: Duration,
    pub tick_max: Duration,
    /// Per-subscriber backlog before a slow subscriber starts lagging.
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            capacity: NonZeroUsize::new(DEFAULT_FEED_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            tick_min: Duration::from_secs(5),
            tick_max: Duration::from_secs(15),
            channel_capacity: 64,
        }
    }
}

/// What a connecting client asks for.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeRequest {
    /// Time of the newest post the client already holds.
    pub since: Option<OffsetDateTime>,
    /// Passive observers receive no catch-up batch.
    pub skip_catch_up: bool,
}

/// Catch-up batch plus the live feed of subsequent ticks.
#[derive(Debug)]
pub struct Subscription {
    pub catch_up: Vec<Post>,
    pub updates: broadcast::Receiver<Batch>,
}

pub struct FeedServer {
    ring: Mutex<FeedRing>,
    updates: broadcast::Sender<Batch>,
    generator: Arc<dyn PostGenerator>,
    config: FeedConfig,
}

impl FeedServer {
    pub fn new(config: FeedConfig, generator: Arc<dyn PostGenerator>) -> Self {
        let (updates, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            ring: Mutex::new(FeedRing::new(config.capacity)),
            updates,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Seed the ring with a full history of synthetic posts.
    ///
    /// Timestamps count backwards from now by a random tick interval each, so
    /// the seeded history looks like it was produced by earlier ticks.
    pub async fn initialize(&self) {
        let mut time = now_millis();
        let mut posts = Vec::with_capacity(self.config.capacity.get());
        for _ in 0..self.config.capacity.get() {
            let gap = random_interval(self.config.tick_min, self.config.tick_max);
            time -= gap;
            posts.push(self.generator.generate(time));
        }

        let mut ring = self.ring.lock().await;
        *ring = FeedRing::from_posts(self.config.capacity, posts);
        info!(
            target = "wittr::feed",
            posts = ring.len(),
            "feed ring initialised"
        );
    }

    /// Generate one post, add it to the ring and broadcast it alone.
    ///
    /// The ring update and the broadcast happen under the ring lock so a
    /// concurrent subscriber sees either the old ring and then this post, or
    /// the new ring and no duplicate push.
    pub async fn tick(&self) -> Post {
        let post = self.generator.generate(now_millis());

        let mut ring = self.ring.lock().await;
        let dropped = ring.push(post.clone());
        let batch: Batch = Arc::new(vec![post.clone()]);
        let receivers = self.updates.send(batch).unwrap_or(0);
        drop(ring);

        counter!(METRIC_FEED_BROADCAST).increment(1);
        gauge!(METRIC_FEED_SUBSCRIBERS).set(receivers as f64);
        debug!(
            target = "wittr::feed",
            post_id = %post.id,
            dropped = dropped.len(),
            receivers,
            "broadcast new post"
        );

        post
    }

    /// Tick forever at random intervals until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let delay = random_interval(self.config.tick_min, self.config.tick_max);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.tick().await;
        }
        info!(target = "wittr::feed", "feed ticker stopped");
    }

    /// Register a subscriber and compute its catch-up batch atomically with
    /// respect to ticks.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Subscription {
        let ring = self.ring.lock().await;
        let updates = self.updates.subscribe();
        let catch_up = if request.skip_catch_up {
            Vec::new()
        } else {
            ring.catch_up(request.since)
        };
        drop(ring);

        gauge!(METRIC_FEED_SUBSCRIBERS).set(self.updates.receiver_count() as f64);
        Subscription { catch_up, updates }
    }

    pub async fn snapshot(&self) -> Vec<Post> {
        self.ring.lock().await.to_vec()
    }

    pub fn subscriber_count(&self) -> usize {
        self.updates.receiver_count()
    }
}
