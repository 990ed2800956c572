use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::str::FromStr;

/// Dense, zero-based identifier of an indexed post. Equals the entry's position in the index.
///
/// Serialized as its decimal string form (`"0"`, `"1"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PostId(u64);

impl PostId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    pub(crate) fn from_position(position: usize) -> Self {
        Self(position as u64)
    }

    pub(crate) fn position(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PostId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl Serialize for PostId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PostId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|err| serde::de::Error::custom(format!("invalid post id '{raw}': {err}")))
    }
}

/// Structured metadata attached to a post at ingestion time. Never updated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostMetadata {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub audio_text: Option<String>,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default)]
    pub has_video: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: PostId,
    /// `1 / (1 + squared L2 distance)`: 1.0 for an exact match, decreasing towards 0.
    pub score: f32,
    pub metadata: PostMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub posts: usize,
    pub dimension: usize,
    pub vectors_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_id_serializes_as_string() {
        let json = serde_json::to_string(&PostId::new(42)).unwrap();
        assert_eq!(json, "\"42\"");
        let back: PostId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PostId::new(42));
        assert!(serde_json::from_str::<PostId>("\"forty-two\"").is_err());
    }

    #[test]
    fn metadata_rejects_unknown_fields() {
        let err = serde_json::from_str::<PostMetadata>(r#"{"text":"hi","likes":3}"#);
        assert!(err.is_err());

        let parsed: PostMetadata = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("hi"));
        assert!(!parsed.has_image);
        assert!(parsed.tags.is_empty());
    }
}
