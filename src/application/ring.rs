//! Bounded, newest-first history of feed posts.

use std::{collections::VecDeque, num::NonZeroUsize};

use time::OffsetDateTime;

use crate::domain::post::Post;

/// Default number of posts retained by the server and by clients.
pub const DEFAULT_FEED_CAPACITY: usize = 30;

/// Newest-first ring of at most `capacity` posts.
///
/// Every mutation leaves `len() <= capacity` and the posts ordered
/// non-increasing by `time`.
#[derive(Debug, Clone)]
pub struct FeedRing {
    posts: VecDeque<Post>,
    capacity: NonZeroUsize,
}

impl FeedRing {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            posts: VecDeque::with_capacity(capacity.get()),
            capacity,
        }
    }

    /// Build a ring from posts in any order, keeping the newest `capacity`.
    pub fn from_posts(capacity: NonZeroUsize, mut posts: Vec<Post>) -> Self {
        posts.sort_by(|a, b| b.time.cmp(&a.time));
        posts.truncate(capacity.get());
        Self {
            posts: posts.into(),
            capacity,
        }
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn newest(&self) -> Option<&Post> {
        self.posts.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Post> {
        self.posts.iter()
    }

    pub fn to_vec(&self) -> Vec<Post> {
        self.posts.iter().cloned().collect()
    }

    /// Insert a post and drop the oldest entries beyond capacity.
    ///
    /// A post stamped "now" lands at the front. Posts carrying an older time
    /// are placed where they keep the ordering intact. Returns the dropped posts.
    pub fn push(&mut self, post: Post) -> Vec<Post> {
        let index = self.posts.partition_point(|existing| existing.time > post.time);
        self.posts.insert(index, post);

        let mut dropped = Vec::new();
        while self.posts.len() > self.capacity.get() {
            if let Some(oldest) = self.posts.pop_back() {
                dropped.push(oldest);
            }
        }
        dropped
    }

    /// Posts a subscriber should receive on connect.
    ///
    /// Without `since`, the whole ring. With `since`, every post strictly newer
    /// than it. When nothing is newer, the whole ring is returned as well: the
    /// client may be current or may predate the ring entirely, and its merge
    /// is idempotent either way.
    pub fn catch_up(&self, since: Option<OffsetDateTime>) -> Vec<Post> {
        let Some(since) = since else {
            return self.to_vec();
        };

        let cutoff = self
            .posts
            .iter()
            .position(|post| post.time <= since)
            .unwrap_or(self.posts.len());

        if cutoff == 0 {
            return self.to_vec();
        }

        self.posts.iter().take(cutoff).cloned().collect()
    }

    pub fn is_ordered(&self) -> bool {
        self.posts
            .iter()
            .zip(self.posts.iter().skip(1))
            .all(|(newer, older)| newer.time >= older.time)
    }
}
