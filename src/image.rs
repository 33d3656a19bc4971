//! The archived image entity and its identifiers.
//!
//! An [`Image`] is keyed by an opaque [`ImageId`] and deduplicated by its origin URL.
//! The [`ContentHash`] is a fingerprint of the fetched bytes and carries no uniqueness
//! guarantee.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    error::Error,
    fmt::Display,
    hash::Hasher,
    str::FromStr,
};
use twox_hash::XxHash64;
use uuid::Uuid;

/// Opaque identifier assigned to an image on first insert.
///
/// Backed by a UUIDv7, so identifiers generated later sort after earlier ones.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    /// Generates a fresh identifier.
    pub fn generate() -> Self {
        ImageId(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ImageId {
    fn from(value: String) -> Self {
        ImageId(value)
    }
}

impl From<&str> for ImageId {
    fn from(value: &str) -> Self {
        ImageId(value.to_string())
    }
}

/// A 64-bit xxHash fingerprint of the fetched bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 8]);

impl ContentHash {
    /// Computes the fingerprint over the full body.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(bytes);

        ContentHash::from(hasher.finish())
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for ContentHash {
    type Err = ContentHashParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.len() != 16 {
            return Err(ContentHashParseError::InvalidLength);
        }

        let mut bytes = [0u8; 8];

        for (i, byte) in bytes.iter_mut().enumerate() {
            let chunk = value
                .get(i * 2..i * 2 + 2)
                .ok_or(ContentHashParseError::InvalidHex)?;
            *byte = u8::from_str_radix(chunk, 16).map_err(|_| ContentHashParseError::InvalidHex)?;
        }

        Ok(ContentHash(bytes))
    }
}

impl From<u64> for ContentHash {
    fn from(value: u64) -> Self {
        ContentHash(value.to_be_bytes())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ContentHashParseError {
    InvalidLength,
    InvalidHex,
}

impl Display for ContentHashParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentHashParseError::InvalidLength => {
                write!(f, "content hash must be exactly 16 hexadecimal characters.")
            }
            ContentHashParseError::InvalidHex => {
                write!(f, "content hash contains invalid hexadecimal characters.")
            }
        }
    }
}

impl Error for ContentHashParseError {}

/// An archived image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image {
    pub id: ImageId,
    /// Origin URL. Unique across every stored record, deleted or not.
    pub url: String,
    /// Set on first insert and never revised.
    pub added: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub content_hash: ContentHash,
    pub size: u64,
    pub deleted: bool,
    /// Raw bytes, present only when blobs are stored inline.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
    /// Extension hint derived from the URL path, e.g. `.png`.
    pub ext: String,
    pub mime: String,
}

impl Image {
    /// Whether the record carries a cached copy of the fetched bytes.
    pub fn has_blob(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{ContentHash, ContentHashParseError, ImageId};
    use std::str::FromStr;

    #[test]
    fn test_content_hash_parse() {
        assert_eq!(
            Ok(ContentHash([50, 148, 53, 229, 230, 107, 232, 9])),
            ContentHash::from_str("329435e5e66be809")
        );
        assert_eq!(
            Err(ContentHashParseError::InvalidLength),
            ContentHash::from_str("329435e5e66b")
        );
        assert_eq!(
            Err(ContentHashParseError::InvalidHex),
            ContentHash::from_str("Z29435e5e66be809")
        );
        assert_eq!(
            Ok(ContentHash::from(0x329435e5e66be809_u64)),
            ContentHash::from_str("329435e5e66be809")
        );
    }

    #[test]
    fn test_content_hash_display() {
        let hash = ContentHash::of(b"kinq");
        let rendered = hash.to_string();

        assert_eq!(16, rendered.len());
        assert_eq!(Ok(hash), ContentHash::from_str(&rendered));
        assert_eq!(hash, ContentHash::of(b"kinq"));
        assert_ne!(hash, ContentHash::of(b"kinq!"));
    }

    #[test]
    fn test_image_ids_are_unique() {
        let a = ImageId::generate();
        let b = ImageId::generate();

        assert_ne!(a, b);
        assert_eq!(36, a.as_str().len());
    }
}
