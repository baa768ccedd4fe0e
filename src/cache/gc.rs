//! Reference-counting sweep of the content tier.

use tracing::debug;

use crate::domain::post::Post;

use super::{CacheError, keys::referenced_keys, tier::CacheTier};

/// Delete every entry of `content` whose key no post in `posts` references.
/// Returns how many entries were removed.
pub async fn collect_garbage(content: &CacheTier, posts: &[Post]) -> Result<usize, CacheError> {
    let referenced = referenced_keys(posts);
    let mut removed = 0;

    for key in content.keys().await? {
        if referenced.contains(&key) {
            continue;
        }
        if content.remove(&key).await? {
            debug!(target = "wittr::cache", key = %key, "unreferenced asset removed");
            removed += 1;
        }
    }

    content.record_eviction("unreferenced", removed);
    Ok(removed)
}
