//! Per-tier eviction policy values.

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use serde::Deserialize;
use time::OffsetDateTime;

const STANDARD_MAX_ENTRIES: usize = 50;
const COMPACT_MAX_ENTRIES: usize = 30;
const COMPACT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Count and age bounds applied to one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionPolicy {
    /// Least-recently-inserted entries are evicted past this count.
    pub max_entries: Option<NonZeroUsize>,
    /// Entries older than this are misses and are deleted on access.
    pub max_age: Option<Duration>,
}

impl EvictionPolicy {
    pub const UNBOUNDED: EvictionPolicy = EvictionPolicy {
        max_entries: None,
        max_age: None,
    };

    pub fn is_expired(&self, inserted_at: OffsetDateTime, now: OffsetDateTime) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        let age = now - inserted_at;
        age.is_positive() && age.unsigned_abs() > max_age
    }
}

/// Named content-tier policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyPreset {
    /// 50 entries, no age cap.
    #[default]
    Standard,
    /// 30 entries, one day.
    Compact,
}

impl PolicyPreset {
    pub fn policy(self) -> EvictionPolicy {
        match self {
            PolicyPreset::Standard => EvictionPolicy {
                max_entries: NonZeroUsize::new(STANDARD_MAX_ENTRIES),
                max_age: None,
            },
            PolicyPreset::Compact => EvictionPolicy {
                max_entries: NonZeroUsize::new(COMPACT_MAX_ENTRIES),
                max_age: Some(COMPACT_MAX_AGE),
            },
        }
    }
}

impl FromStr for PolicyPreset {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(PolicyPreset::Standard),
            "compact" => Ok(PolicyPreset::Compact),
            other => Err(format!("unknown cache policy preset `{other}`")),
        }
    }
}
