//! Persistence contract for the client's local copy of the feed.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::post::Post;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Result of folding a batch into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Posts written, new or overwritten.
    pub upserted: usize,
    /// Oldest posts removed to respect the bound.
    pub pruned: usize,
    /// Size of the store after the merge.
    pub retained: usize,
}

/// Bounded, time-indexed post collection.
///
/// Implementations must apply a merge atomically: readers never observe the
/// store above its bound or with only part of a batch applied.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Upsert every post by id, then keep only the newest `capacity` by time.
    async fn merge(&self, posts: &[Post]) -> Result<MergeOutcome, RepoError>;

    /// All retained posts, newest first.
    async fn load(&self) -> Result<Vec<Post>, RepoError>;

    /// Time of the newest retained post.
    async fn latest_time(&self) -> Result<Option<OffsetDateTime>, RepoError>;

    async fn len(&self) -> Result<usize, RepoError>;

    fn capacity(&self) -> usize;
}
