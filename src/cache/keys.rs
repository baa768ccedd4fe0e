//! Resource classification and cache key normalization.
//!
//! Size variants of the same logical resource share one key:
//! `/photos/9-8028-7527734776-e1d2bda28e-800px.jpg` and its `-320px.jpg`
//! sibling both map to `/photos/9-8028-7527734776-e1d2bda28e`, the same
//! size-neutral reference a post carries.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{
    assets::{AVATAR_PREFIX, PHOTO_PREFIX},
    post::Post,
};

/// Key shared by every spelling of the page skeleton.
pub const SKELETON_KEY: &str = "/";

const SKELETON_PATHS: &[&str] = &["/", "/index.html", "/skeleton"];
const STATIC_PREFIX: &str = "/static/";
const ARTIFACT_EXTENSIONS: &[&str] = &[
    "js",
    "css",
    "woff",
    "woff2",
    "ttf",
    "ico",
    "png",
    "svg",
    "webmanifest",
];

static PHOTO_WIDTH_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\d+px\.jpg$").expect("photo width pattern is valid"));
static AVATAR_DENSITY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\dx\.jpg$").expect("avatar density pattern is valid"));

/// Resource classes, in matching priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Skeleton,
    BuildArtifact,
    Photo,
    Avatar,
    Other,
}

impl ResourceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Skeleton => "skeleton",
            ResourceClass::BuildArtifact => "artifact",
            ResourceClass::Photo => "photo",
            ResourceClass::Avatar => "avatar",
            ResourceClass::Other => "other",
        }
    }
}

/// Maps a request onto the key it is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyNormalizer {
    /// Request path and query, unchanged.
    Exact,
    /// Every skeleton spelling collapses to [`SKELETON_KEY`].
    Skeleton,
    /// Drop the query and the `-<width>px.jpg` suffix.
    PhotoWidth,
    /// Drop the query and the `-<density>x.jpg` suffix.
    AvatarDensity,
}

impl KeyNormalizer {
    pub fn apply(self, request: &str) -> String {
        match self {
            KeyNormalizer::Exact => request.to_string(),
            KeyNormalizer::Skeleton => SKELETON_KEY.to_string(),
            KeyNormalizer::PhotoWidth => normalize_photo(request),
            KeyNormalizer::AvatarDensity => normalize_avatar(request),
        }
    }
}

pub fn strip_query(request: &str) -> &str {
    request
        .split_once(['?', '#'])
        .map_or(request, |(path, _)| path)
}

pub fn normalize_photo(request: &str) -> String {
    PHOTO_WIDTH_SUFFIX
        .replace(strip_query(request), "")
        .into_owned()
}

pub fn normalize_avatar(request: &str) -> String {
    AVATAR_DENSITY_SUFFIX
        .replace(strip_query(request), "")
        .into_owned()
}

/// Decides which class a request belongs to.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    artifacts: HashSet<String>,
}

impl Classifier {
    /// `artifacts` are exact paths known to be build output, in addition to the
    /// `/static/` prefix and the artifact file extensions.
    pub fn new<I, S>(artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            artifacts: artifacts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, request: &str) -> ResourceClass {
        let path = strip_query(request);

        if SKELETON_PATHS.contains(&path) {
            ResourceClass::Skeleton
        } else if self.artifacts.contains(path)
            || path.starts_with(STATIC_PREFIX)
            || has_artifact_extension(path)
        {
            ResourceClass::BuildArtifact
        } else if path.starts_with(PHOTO_PREFIX) {
            ResourceClass::Photo
        } else if path.starts_with(AVATAR_PREFIX) {
            ResourceClass::Avatar
        } else {
            ResourceClass::Other
        }
    }
}

fn has_artifact_extension(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.')
        .is_some_and(|(_, ext)| ARTIFACT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Content-tier keys still referenced by retained posts.
pub fn referenced_keys(posts: &[Post]) -> HashSet<String> {
    posts
        .iter()
        .flat_map(Post::asset_references)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::{
        assets::{PhotoSize, avatar_variant, photo_variant},
        post::PostId,
    };

    #[test]
    fn photo_variants_share_one_key() {
        let a800 = normalize_photo("/photos/9-8028-7527734776-e1d2bda28e-800px.jpg");
        let a320 = normalize_photo("/photos/9-8028-7527734776-e1d2bda28e-320px.jpg?v=2");
        let b800 = normalize_photo("/photos/1-532-21470345120-8b2d4e6f10-800px.jpg");

        assert_eq!(a800, "/photos/9-8028-7527734776-e1d2bda28e");
        assert_eq!(a800, a320);
        assert_ne!(a800, b800);
    }

    #[test]
    fn every_photo_size_normalizes_to_the_reference() {
        let reference = "/photos/4-3710-12508234771-a1b2c3d4e5";
        for size in PhotoSize::ALL {
            assert_eq!(normalize_photo(&photo_variant(reference, size)), reference);
        }
    }

    #[test]
    fn avatar_densities_share_one_key() {
        let one = normalize_avatar(&avatar_variant("/avatars/sam", 1));
        let two = normalize_avatar(&avatar_variant("/avatars/sam", 2));
        let other = normalize_avatar(&avatar_variant("/avatars/jo", 2));

        assert_eq!(one, "/avatars/sam");
        assert_eq!(one, two);
        assert_ne!(one, other);
    }

    #[test]
    fn classification_follows_priority() {
        let classifier = Classifier::new(["/js/main.bundle"]);

        assert_eq!(classifier.classify("/"), ResourceClass::Skeleton);
        assert_eq!(classifier.classify("/index.html"), ResourceClass::Skeleton);
        assert_eq!(classifier.classify("/js/main.bundle"), ResourceClass::BuildArtifact);
        assert_eq!(classifier.classify("/static/app.css"), ResourceClass::BuildArtifact);
        assert_eq!(classifier.classify("/imgs/icon.png"), ResourceClass::BuildArtifact);
        assert_eq!(
            classifier.classify("/photos/1-2-3-4-640px.jpg"),
            ResourceClass::Photo
        );
        assert_eq!(classifier.classify("/avatars/sam-1x.jpg"), ResourceClass::Avatar);
        assert_eq!(classifier.classify("/ping"), ResourceClass::Other);
    }

    #[test]
    fn skeleton_spellings_share_key() {
        assert_eq!(KeyNormalizer::Skeleton.apply("/index.html"), SKELETON_KEY);
        assert_eq!(KeyNormalizer::Skeleton.apply("/"), SKELETON_KEY);
    }

    #[test]
    fn referenced_keys_collects_avatars_and_photos() {
        let post = Post {
            id: PostId::from("p"),
            body: String::new(),
            name: "Sam".to_string(),
            avatar: "/avatars/sam".to_string(),
            photo: Some("/photos/1-2-3-4".to_string()),
            time: datetime!(2024-01-01 00:00 UTC),
        };
        let keys = referenced_keys(&[post]);
        assert!(keys.contains("/avatars/sam"));
        assert!(keys.contains("/photos/1-2-3-4"));
        assert_eq!(keys.len(), 2);
    }
}
