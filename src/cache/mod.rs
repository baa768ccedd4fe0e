//! Wittr tiered response cache
//!
//! Requests are classified, mapped to a normalized key, and served by one of a
//! small set of strategies against two tiers:
//!
//! - **static** (`wittr-static-v<version>`): skeleton and build artifacts,
//!   replaced wholesale on version change;
//! - **content** (`wittr-content-imgs`): photos and avatars, bounded by its
//!   eviction policy and swept against the local feed store.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! static_version = 1
//! preset = "standard"   # or "compact"
//! quota_bytes = 52428800
//! ```

pub mod engine;
mod error;
pub mod gc;
pub mod keys;
pub mod lifecycle;
mod lock;
pub mod policy;
pub mod storage;
pub mod strategy;
pub mod tier;

pub use engine::{Fetcher, ResponseCache, ResponseSource, Served};
pub use error::CacheError;
pub use keys::{Classifier, KeyNormalizer, ResourceClass};
pub use lifecycle::{PrecacheManifest, StaticSetup, activate, install, start_static_tier};
pub use policy::{EvictionPolicy, PolicyPreset};
pub use storage::{CacheStorage, CachedResponse, MemoryCacheStorage, StoredEntry};
pub use strategy::{Strategy, StrategyPlan};
pub use tier::{CacheTier, CacheVersion, InsertOutcome, TierName};
