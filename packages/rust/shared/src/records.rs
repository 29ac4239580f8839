//! Canonical output records emitted by the crawl engine.
//!
//! Records are produced by the normalizer, handed to sinks, and never mutated
//! afterwards. Every record carries the forum handle and id of the note it
//! came from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{ForumHandle, RawNote, RecordKind};

/// Optional derived fields attached to a record.
pub type Enrichment = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// CanonicalRecord
// ---------------------------------------------------------------------------

/// A normalized, validated note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum CanonicalRecord {
    Paper(PaperRecord),
    Review(ReviewRecord),
    Decision(DecisionRecord),
    Comment(CommentRecord),
}

impl CanonicalRecord {
    pub fn forum(&self) -> &ForumHandle {
        match self {
            Self::Paper(r) => &r.forum,
            Self::Review(r) => &r.forum,
            Self::Decision(r) => &r.forum,
            Self::Comment(r) => &r.forum,
        }
    }

    pub fn note_id(&self) -> &str {
        match self {
            Self::Paper(r) => &r.note_id,
            Self::Review(r) => &r.note_id,
            Self::Decision(r) => &r.note_id,
            Self::Comment(r) => &r.note_id,
        }
    }

    /// The classification this record was normalized from.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Paper(_) => RecordKind::Submission,
            Self::Review(_) => RecordKind::Review,
            Self::Decision(_) => RecordKind::MetaReview,
            Self::Comment(_) => RecordKind::Comment,
        }
    }

    pub fn enrichment(&self) -> &Enrichment {
        match self {
            Self::Paper(r) => &r.enrichment,
            Self::Review(r) => &r.enrichment,
            Self::Decision(r) => &r.enrichment,
            Self::Comment(r) => &r.enrichment,
        }
    }
}

// ---------------------------------------------------------------------------
// Record variants
// ---------------------------------------------------------------------------

/// A submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub forum: ForumHandle,
    pub note_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub forum_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub enrichment: Enrichment,
}

/// A peer review with a parsed rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub forum: ForumHandle,
    pub note_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replyto: Option<String>,
    /// Numeric component of the rating (`8` for `"8: Accept"`).
    pub rating_value: f64,
    /// Rating exactly as the source spelled it.
    pub rating_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soundness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strengths: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weaknesses: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limitations: Option<String>,
    /// Free-form review body (`review`, `main_review`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_text: Option<String>,
    #[serde(default)]
    pub enrichment: Enrichment,
}

/// A committee decision or meta-review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub forum: ForumHandle,
    pub note_id: String,
    /// Decision text as the source spelled it.
    pub decision: String,
    /// Canonical label (`Accept (Poster)`, `Reject`, ...).
    pub decision_label: String,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    #[serde(default)]
    pub enrichment: Enrichment,
}

/// Any remaining discussion: author responses, public comments, rebuttals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub forum: ForumHandle,
    pub note_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replyto: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_role: Option<String>,
    #[serde(default)]
    pub enrichment: Enrichment,
}

// ---------------------------------------------------------------------------
// Rejects
// ---------------------------------------------------------------------------

/// A note that failed validation, kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedNote {
    pub note: RawNote,
    pub attempted: RecordKind,
    pub error: ValidationError,
}
