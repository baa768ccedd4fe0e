//! Feed posts as they travel between server, wire and local store.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::DomainError;

/// Opaque, globally unique post identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PostId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single feed entry. Immutable once created.
///
/// `avatar` and `photo` hold size-neutral references (for example
/// `/photos/9-8028-7527734776-e1d2bda28e`); clients append a width or density
/// suffix when requesting the actual image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub body: String,
    pub name: String,
    pub avatar: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
}

impl Post {
    /// Milliseconds since the Unix epoch, the resolution used by the catch-up protocol.
    pub fn epoch_millis(&self) -> i64 {
        to_epoch_millis(self.time)
    }

    /// Asset references that must stay cached while this post is retained.
    pub fn asset_references(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.avatar.as_str()).chain(self.photo.as_deref())
    }
}

/// Convert an instant to whole milliseconds since the Unix epoch.
pub fn to_epoch_millis(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Build an instant from milliseconds since the Unix epoch.
pub fn from_epoch_millis(millis: i64) -> Result<OffsetDateTime, DomainError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|_| DomainError::TimestampOutOfRange { millis })
}

/// Current time truncated to millisecond precision.
///
/// Post times are compared against client-supplied `since` values that only
/// carry milliseconds, so sub-millisecond precision must never be assigned.
pub fn now_millis() -> OffsetDateTime {
    truncate_to_millis(OffsetDateTime::now_utc())
}

pub fn truncate_to_millis(time: OffsetDateTime) -> OffsetDateTime {
    let millis = time.millisecond();
    time.replace_millisecond(millis).unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn sample(photo: Option<&str>) -> Post {
        Post {
            id: PostId::from("a1"),
            body: "hello".to_string(),
            name: "Sam".to_string(),
            avatar: "/avatars/sam".to_string(),
            photo: photo.map(str::to_string),
            time: datetime!(2024-03-01 12:00:00.250 UTC),
        }
    }

    #[test]
    fn wire_shape_uses_iso_time_and_omits_missing_photo() {
        let json = serde_json::to_value(sample(None)).expect("serialize post");
        assert_eq!(json["id"], "a1");
        let time = json["time"].as_str().expect("time is a string");
        assert!(time.starts_with("2024-03-01T12:00:00.25"), "unexpected time {time}");
        assert!(json.get("photo").is_none());
    }

    #[test]
    fn wire_shape_parses_with_photo() {
        let raw = r#"{"id":"b2","body":"hi","name":"Jo","avatar":"/avatars/jo","photo":"/photos/1-2-3-4","time":"2024-03-01T12:00:01.000Z"}"#;
        let post: Post = serde_json::from_str(raw).expect("parse post");
        assert_eq!(post.photo.as_deref(), Some("/photos/1-2-3-4"));
        assert_eq!(post.time, datetime!(2024-03-01 12:00:01 UTC));
    }

    #[test]
    fn epoch_millis_round_trip_keeps_precision() {
        let post = sample(None);
        let restored = from_epoch_millis(post.epoch_millis()).expect("valid millis");
        assert_eq!(restored, post.time);
    }

    #[test]
    fn truncation_drops_sub_millisecond_digits() {
        let time = datetime!(2024-03-01 12:00:00.123456789 UTC);
        assert_eq!(truncate_to_millis(time), datetime!(2024-03-01 12:00:00.123 UTC));
    }

    #[test]
    fn asset_references_include_photo_when_present() {
        let post = sample(Some("/photos/1-2-3-4"));
        let refs: Vec<_> = post.asset_references().collect();
        assert_eq!(refs, vec!["/avatars/sam", "/photos/1-2-3-4"]);
    }
}
