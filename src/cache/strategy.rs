//! Closed set of caching strategies, one plan per resource class.

use super::keys::{KeyNormalizer, ResourceClass};

const STATUS_OPAQUE: u16 = 0;
const STATUS_OK: u16 = 200;
const STATUS_PARTIAL: u16 = 206;
const STATUS_MOVED: u16 = 301;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Serve a stored entry if present, otherwise fetch and store.
    CacheFirst,
    /// Serve a stored entry immediately and refresh it in the background.
    StaleWhileRevalidate,
    /// Serve from any tier if present, otherwise fetch without storing.
    Opportunistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierRole {
    Static,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyPlan {
    pub class: ResourceClass,
    pub strategy: Strategy,
    /// Tier written on a cacheable network response. `None` never writes.
    pub tier: Option<TierRole>,
    pub normalizer: KeyNormalizer,
    cacheable: &'static [u16],
}

impl StrategyPlan {
    pub fn for_class(class: ResourceClass) -> Self {
        match class {
            ResourceClass::Skeleton => Self {
                class,
                strategy: Strategy::CacheFirst,
                tier: Some(TierRole::Static),
                normalizer: KeyNormalizer::Skeleton,
                cacheable: &[STATUS_OK, STATUS_OPAQUE, STATUS_PARTIAL],
            },
            ResourceClass::BuildArtifact => Self {
                class,
                strategy: Strategy::CacheFirst,
                tier: Some(TierRole::Static),
                normalizer: KeyNormalizer::Exact,
                cacheable: &[STATUS_OK, STATUS_OPAQUE],
            },
            ResourceClass::Photo => Self {
                class,
                strategy: Strategy::CacheFirst,
                tier: Some(TierRole::Content),
                normalizer: KeyNormalizer::PhotoWidth,
                cacheable: &[STATUS_OK, STATUS_OPAQUE, STATUS_MOVED],
            },
            ResourceClass::Avatar => Self {
                class,
                strategy: Strategy::StaleWhileRevalidate,
                tier: Some(TierRole::Content),
                normalizer: KeyNormalizer::AvatarDensity,
                cacheable: &[STATUS_OK, STATUS_OPAQUE],
            },
            ResourceClass::Other => Self {
                class,
                strategy: Strategy::Opportunistic,
                tier: None,
                normalizer: KeyNormalizer::Exact,
                cacheable: &[],
            },
        }
    }

    pub fn key(&self, request: &str) -> String {
        self.normalizer.apply(request)
    }

    pub fn is_cacheable(&self, status: u16) -> bool {
        self.cacheable.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_lists_differ_per_class() {
        let skeleton = StrategyPlan::for_class(ResourceClass::Skeleton);
        assert!(skeleton.is_cacheable(206));
        assert!(!skeleton.is_cacheable(301));

        let photo = StrategyPlan::for_class(ResourceClass::Photo);
        assert!(photo.is_cacheable(301));
        assert!(!photo.is_cacheable(206));
        assert!(!photo.is_cacheable(404));

        let other = StrategyPlan::for_class(ResourceClass::Other);
        assert!(!other.is_cacheable(200));
        assert_eq!(other.tier, None);
    }

    #[test]
    fn avatars_revalidate_in_content_tier() {
        let plan = StrategyPlan::for_class(ResourceClass::Avatar);
        assert_eq!(plan.strategy, Strategy::StaleWhileRevalidate);
        assert_eq!(plan.tier, Some(TierRole::Content));
        assert_eq!(plan.key("/avatars/sam-2x.jpg"), "/avatars/sam");
    }
}
