//! Synthetic post content for the feed server.

use std::time::Duration;

use rand::{Rng, seq::SliceRandom};
use time::OffsetDateTime;

use crate::domain::{
    assets::{AVATAR_PREFIX, PHOTO_PREFIX},
    post::{Post, PostId, truncate_to_millis},
};

/// Source of new feed entries.
///
/// The broadcast engine only relies on the contract that `generate` stamps the
/// post with the supplied time and a fresh identity.
pub trait PostGenerator: Send + Sync {
    fn generate(&self, time: OffsetDateTime) -> Post;
}

const AUTHORS: &[(&str, &str)] = &[
    ("Ada Okafor", "ada"),
    ("Bruno Castell", "bruno"),
    ("Chen Wei", "chen"),
    ("Dolores Vance", "dolores"),
    ("Emeka Obi", "emeka"),
    ("Freya Lind", "freya"),
];

const BODIES: &[&str] = &[
    "Just shipped the thing. Going to sleep for a week.",
    "Does anyone else read error messages out loud to the cat?",
    "Coffee number three. The build is still red.",
    "Train wifi is the true test of offline-first design.",
    "Found a bug that only happens on Tuesdays. Sure.",
    "Refactored for two hours, diff is minus four lines. Worth it.",
    "Hot take: cache invalidation is mostly a naming problem.",
    "The sunset over the harbour tonight was unreal.",
    "Reminder: back up your stuff. That's it, that's the post.",
    "Spent the morning convincing a spreadsheet to be a database.",
];

const PHOTOS: &[&str] = &[
    "9-8028-7527734776-e1d2bda28e",
    "8-7520-15923744627-4f1a9b2c3d",
    "1-532-21470345120-8b2d4e6f10",
    "6-5613-30116783511-0c9e8d7a6b",
    "4-3710-12508234771-a1b2c3d4e5",
];

/// Picks random authors, bodies and (half of the time) photos.
#[derive(Debug, Default, Clone)]
pub struct SyntheticPostGenerator;

impl SyntheticPostGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl PostGenerator for SyntheticPostGenerator {
    fn generate(&self, time: OffsetDateTime) -> Post {
        let mut rng = rand::thread_rng();
        let (name, avatar) = AUTHORS.choose(&mut rng).copied().unwrap_or(AUTHORS[0]);
        let body = BODIES.choose(&mut rng).copied().unwrap_or(BODIES[0]);
        let photo = if rng.gen_bool(0.5) {
            PHOTOS
                .choose(&mut rng)
                .map(|photo| format!("{PHOTO_PREFIX}{photo}"))
        } else {
            None
        };

        Post {
            id: PostId::generate(),
            body: body.to_string(),
            name: name.to_string(),
            avatar: format!("{AVATAR_PREFIX}{avatar}"),
            photo,
            time: truncate_to_millis(time),
        }
    }
}

/// Uniformly random duration in `[min, max]`, at millisecond resolution.
pub fn random_interval(min: Duration, max: Duration) -> Duration {
    let (low, high) = if min <= max { (min, max) } else { (max, min) };
    let low_ms = low.as_millis() as u64;
    let high_ms = high.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(low_ms..=high_ms))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn generated_posts_carry_requested_time_and_unique_ids() {
        let generator = SyntheticPostGenerator::new();
        let time = datetime!(2024-05-01 10:00:00 UTC);
        let first = generator.generate(time);
        let second = generator.generate(time);

        assert_eq!(first.time, time);
        assert_ne!(first.id, second.id);
        assert!(first.avatar.starts_with(AVATAR_PREFIX));
        if let Some(photo) = &first.photo {
            assert!(photo.starts_with(PHOTO_PREFIX));
        }
    }

    #[test]
    fn random_interval_stays_in_bounds() {
        let min = Duration::from_secs(5);
        let max = Duration::from_secs(15);
        for _ in 0..200 {
            let delay = random_interval(min, max);
            assert!(delay >= min && delay <= max);
        }
    }

    #[test]
    fn random_interval_tolerates_swapped_bounds() {
        let delay = random_interval(Duration::from_secs(2), Duration::from_secs(1));
        assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(2));
    }
}
