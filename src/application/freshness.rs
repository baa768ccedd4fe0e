//! Client-side bookkeeping of when the feed was last refreshed.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use time::OffsetDateTime;

/// Minimum spacing between soft refreshes of relative timestamps.
pub const SOFT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Freshness {
    last_update: Mutex<Option<Instant>>,
}

impl Default for Freshness {
    fn default() -> Self {
        Self::new()
    }
}

impl Freshness {
    pub fn new() -> Self {
        Self {
            last_update: Mutex::new(None),
        }
    }

    /// Record that new posts were applied.
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, at: Instant) {
        if let Ok(mut guard) = self.last_update.lock() {
            *guard = Some(at);
        }
    }

    pub fn since_last_update(&self) -> Option<Duration> {
        self.since_last_update_at(Instant::now())
    }

    pub fn since_last_update_at(&self, now: Instant) -> Option<Duration> {
        self.last_update
            .lock()
            .ok()
            .and_then(|guard| *guard)
            .map(|at| now.saturating_duration_since(at))
    }

    /// Whether at least `min_interval` has passed since the last update.
    /// Never-updated state always needs a refresh.
    pub fn needs_refresh(&self, min_interval: Duration) -> bool {
        self.since_last_update()
            .is_none_or(|elapsed| elapsed >= min_interval)
    }
}

/// Short human label for how long ago `time` was, relative to `now`.
pub fn relative_label(time: OffsetDateTime, now: OffsetDateTime) -> String {
    let seconds = (now - time).whole_seconds();
    match seconds {
        s if s < 1 => "now".to_string(),
        s if s < 60 => format!("{s}s"),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn untouched_state_needs_refresh() {
        let freshness = Freshness::new();
        assert!(freshness.since_last_update().is_none());
        assert!(freshness.needs_refresh(SOFT_REFRESH_INTERVAL));
    }

    #[test]
    fn touch_resets_elapsed_time() {
        let freshness = Freshness::new();
        let start = Instant::now();
        freshness.touch_at(start);

        let elapsed = freshness
            .since_last_update_at(start + Duration::from_secs(3))
            .expect("touched");
        assert_eq!(elapsed, Duration::from_secs(3));
        assert!(!freshness.needs_refresh(Duration::from_secs(60)));
    }

    #[test]
    fn labels_scale_with_age() {
        let now = datetime!(2024-06-01 12:00:00 UTC);
        assert_eq!(relative_label(now, now), "now");
        assert_eq!(relative_label(now - time::Duration::seconds(42), now), "42s");
        assert_eq!(relative_label(now - time::Duration::minutes(5), now), "5m");
        assert_eq!(relative_label(now - time::Duration::hours(3), now), "3h");
        assert_eq!(relative_label(now - time::Duration::days(2), now), "2d");
    }

    #[test]
    fn future_times_read_as_now() {
        let now = datetime!(2024-06-01 12:00:00 UTC);
        assert_eq!(relative_label(now + time::Duration::seconds(5), now), "now");
    }
}
