//! Size-parametric media references and the photo request path grammar.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::DomainError;

pub const PHOTO_PREFIX: &str = "/photos/";
pub const AVATAR_PREFIX: &str = "/avatars/";

static PHOTO_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^-/]+)-([^-/]+)-([^-/]+)-([^-/]+)-([^-/]+)\.jpg$")
        .expect("photo file pattern is valid")
});

/// Pixel widths a photo can be requested at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhotoSize {
    W1024,
    W800,
    W640,
    W320,
}

impl PhotoSize {
    pub const ALL: [PhotoSize; 4] = [
        PhotoSize::W1024,
        PhotoSize::W800,
        PhotoSize::W640,
        PhotoSize::W320,
    ];

    pub fn token(self) -> &'static str {
        match self {
            PhotoSize::W1024 => "1024px",
            PhotoSize::W800 => "800px",
            PhotoSize::W640 => "640px",
            PhotoSize::W320 => "320px",
        }
    }

    /// Size letter understood by the upstream media provider.
    pub fn provider_suffix(self) -> char {
        match self {
            PhotoSize::W1024 => 'b',
            PhotoSize::W800 => 'c',
            PhotoSize::W640 => 'z',
            PhotoSize::W320 => 'n',
        }
    }
}

impl FromStr for PhotoSize {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PhotoSize::ALL
            .into_iter()
            .find(|size| size.token() == value)
            .ok_or_else(|| DomainError::UnsupportedPhotoSize {
                token: value.to_string(),
            })
    }
}

/// A parsed `/photos/{farm}-{server}-{id}-{secret}-{type}.jpg` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRequest {
    pub farm: String,
    pub server: String,
    pub id: String,
    pub secret: String,
    pub size: PhotoSize,
}

impl PhotoRequest {
    /// Parse the file name portion of a photo path.
    pub fn parse(file_name: &str) -> Result<Self, DomainError> {
        let captures = PHOTO_FILE
            .captures(file_name)
            .ok_or_else(|| DomainError::MalformedPhotoPath {
                path: file_name.to_string(),
            })?;

        let part = |index: usize| {
            captures
                .get(index)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };

        Ok(Self {
            farm: part(1),
            server: part(2),
            id: part(3),
            secret: part(4),
            size: part(5).parse()?,
        })
    }

    /// Size-neutral reference, the form stored on posts.
    pub fn reference(&self) -> String {
        format!(
            "{PHOTO_PREFIX}{}-{}-{}-{}",
            self.farm, self.server, self.id, self.secret
        )
    }
}

/// URL path for a photo reference at a given width.
pub fn photo_variant(reference: &str, size: PhotoSize) -> String {
    format!("{reference}-{}.jpg", size.token())
}

/// URL path for an avatar reference at a given pixel density.
pub fn avatar_variant(reference: &str, density: u8) -> String {
    format!("{reference}-{density}x.jpg")
}
