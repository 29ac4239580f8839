//! Core domain types for crawling review forums.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

/// A conference instance (e.g. ICLR 2024, main track). Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    /// Short venue name as used in group ids (`ICLR`, `NeurIPS`).
    pub name: String,
    /// Conference year.
    pub year: u16,
    /// Track segment of the group id (`Conference`, `Workshop/...`).
    pub track: String,
    /// Full group id, for venues that do not follow `{name}.cc/{year}/{track}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_override: Option<String>,
}

impl Venue {
    /// Main conference track of `name` in `year`.
    pub fn new(name: impl Into<String>, year: u16) -> Self {
        Self {
            name: name.into(),
            year,
            track: "Conference".into(),
            group_override: None,
        }
    }

    pub fn with_track(mut self, track: impl Into<String>) -> Self {
        self.track = track.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group_override = Some(group.into());
        self
    }

    /// The venue group id on the remote service.
    pub fn id(&self) -> String {
        match &self.group_override {
            Some(group) => group.clone(),
            None => format!("{}.cc/{}/{}", self.name, self.year, self.track),
        }
    }

    /// Invitation under which submissions are posted.
    pub fn submission_invitation(&self) -> String {
        format!("{}/-/Submission", self.id())
    }

    /// Invitation used by older venues for anonymized submissions.
    pub fn blind_submission_invitation(&self) -> String {
        format!("{}/-/Blind_Submission", self.id())
    }

    /// Filesystem-friendly label, e.g. `iclr_2024`.
    pub fn slug(&self) -> String {
        format!("{}_{}", self.name.to_lowercase(), self.year)
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

// ---------------------------------------------------------------------------
// ForumHandle
// ---------------------------------------------------------------------------

/// External identifier of one submission's discussion thread.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForumHandle(pub String);

impl ForumHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ForumHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ForumHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// ProtocolVersion
// ---------------------------------------------------------------------------

/// API generation a note was fetched through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V1,
    V2,
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => f.write_str("v1"),
            Self::V2 => f.write_str("v2"),
        }
    }
}

// ---------------------------------------------------------------------------
// RawNote
// ---------------------------------------------------------------------------

/// Unmodified payload of one note (submission, review, decision or comment).
///
/// `content` is stored exactly as received: v2 wraps each value in
/// `{"value": ...}`, v1 does not. Use [`RawNote::field`] to read through
/// the wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNote {
    pub id: String,
    pub forum: ForumHandle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replyto: Option<String>,
    /// Source-declared invitation labels. Never used for classification.
    #[serde(default)]
    pub invitations: Vec<String>,
    /// Authoring roles/groups.
    #[serde(default)]
    pub signatures: Vec<String>,
    /// Visibility scope.
    #[serde(default)]
    pub readers: Vec<String>,
    #[serde(default)]
    pub content: BTreeMap<String, Value>,
    /// Submission number within the venue, when the source assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    /// Creation time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_ms: Option<i64>,
    /// Last modification time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_ms: Option<i64>,
    pub protocol: ProtocolVersion,
}

impl RawNote {
    /// Whether this is the forum's root note (the submission itself).
    pub fn is_root(&self) -> bool {
        self.id == self.forum.0
    }

    /// Content value for `key`, unwrapping a v2 `{"value": ...}` wrapper.
    pub fn field(&self, key: &str) -> Option<&Value> {
        let raw = self.content.get(key)?;
        match raw {
            Value::Object(map) if map.contains_key("value") => map.get("value"),
            other => Some(other),
        }
    }

    /// String content for `key`, if the value is a string.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// Iterate over content keys and their unwrapped values.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.content.keys().filter_map(|k| self.field(k).map(|v| (k.as_str(), v)))
    }

    /// Last-modified timestamp used for fingerprinting (falls back to creation).
    pub fn revision_ms(&self) -> i64 {
        self.modified_ms.or(self.created_ms).unwrap_or(0)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_ms.and_then(DateTime::<Utc>::from_timestamp_millis)
    }
}

// ---------------------------------------------------------------------------
// RecordKind
// ---------------------------------------------------------------------------

/// Classification assigned from a note's content shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Submission,
    Review,
    MetaReview,
    Comment,
    Unknown,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submission => "submission",
            Self::Review => "review",
            Self::MetaReview => "meta_review",
            Self::Comment => "comment",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// FingerprintEntry
// ---------------------------------------------------------------------------

/// Persisted content hash of one forum, as of its last successful processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub venue_id: String,
    pub forum: ForumHandle,
    /// Hex SHA-256 over the forum's note ids and revision timestamps.
    pub content_hash: String,
    pub note_count: usize,
    pub last_seen: DateTime<Utc>,
}
