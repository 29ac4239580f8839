//! Content classifier: assigns a [`RecordKind`] from a note's content shape.
//!
//! Invitation labels are ignored; venues rename them from year to year while
//! the field layout of reviews and decisions stays recognizable. The shape is
//! computed once per note and run through an ordered rule chain; the first
//! matching rule wins.

use std::collections::BTreeSet;

use reviewcrawl_shared::{ClassifierConfig, RawNote, RecordKind};

use crate::fields::{field_ci, is_non_empty, parse_score};

// ---------------------------------------------------------------------------
// NoteShape
// ---------------------------------------------------------------------------

/// Normalized view of a note's content used by the rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteShape {
    /// Lowercased keys whose values are non-empty.
    pub keys: BTreeSet<String>,
    /// A rating or confidence field holds a number or `"N: label"`.
    pub scored: bool,
    /// At least one review text section is filled in.
    pub review_text: bool,
    /// A decision or recommendation field is filled in.
    pub decision: bool,
    /// Signed by the organizing committee (chairs, area chairs).
    pub committee_signed: bool,
    /// The note is its forum's root.
    pub root: bool,
    /// Any textual content at all.
    pub textual: bool,
}

type Rule = (RecordKind, fn(&NoteShape) -> bool);

/// Evaluated top to bottom.
const RULES: &[Rule] = &[
    (RecordKind::Review, looks_like_review),
    (RecordKind::MetaReview, looks_like_decision),
    (RecordKind::Submission, is_root),
    (RecordKind::Comment, has_text),
];

fn looks_like_review(shape: &NoteShape) -> bool {
    shape.scored && shape.review_text
}

fn looks_like_decision(shape: &NoteShape) -> bool {
    shape.decision && shape.committee_signed
}

fn is_root(shape: &NoteShape) -> bool {
    shape.root
}

fn has_text(shape: &NoteShape) -> bool {
    shape.textual
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Pure function of a [`RawNote`] and the configured heuristics.
#[derive(Debug, Clone)]
pub struct Classifier {
    config: ClassifierConfig,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let lower = |keys: &[String]| keys.iter().map(|k| k.to_lowercase()).collect();
        Self {
            config: ClassifierConfig {
                rating_keys: lower(&config.rating_keys),
                confidence_keys: lower(&config.confidence_keys),
                review_text_keys: lower(&config.review_text_keys),
                decision_keys: lower(&config.decision_keys),
                justification_keys: lower(&config.justification_keys),
                committee_markers: lower(&config.committee_markers),
                comment_keys: lower(&config.comment_keys),
                min_text_chars: config.min_text_chars,
            },
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Compute the shape the rules look at.
    pub fn shape(&self, note: &RawNote) -> NoteShape {
        let min = self.config.min_text_chars;

        let keys: BTreeSet<String> = note
            .fields()
            .filter(|(_, v)| is_non_empty(v, min))
            .map(|(k, _)| k.to_lowercase())
            .collect();

        let scored = self
            .config
            .rating_keys
            .iter()
            .chain(&self.config.confidence_keys)
            .filter(|k| keys.contains(*k))
            .any(|k| field_ci(note, k).and_then(parse_score).is_some());

        let review_text = self
            .config
            .review_text_keys
            .iter()
            .any(|k| keys.contains(k));

        let decision = self.config.decision_keys.iter().any(|k| keys.contains(k));

        let committee_signed = note.signatures.iter().any(|sig| {
            let sig = sig.to_lowercase();
            self.config
                .committee_markers
                .iter()
                .any(|marker| sig.contains(marker.as_str()))
        });

        let textual = note
            .fields()
            .any(|(_, v)| matches!(v, serde_json::Value::String(_)) && is_non_empty(v, min));

        NoteShape {
            keys,
            scored,
            review_text,
            decision,
            committee_signed,
            root: note.is_root(),
            textual,
        }
    }

    /// Classify a note. Never fails; unrecognized shapes are `Unknown`.
    pub fn classify(&self, note: &RawNote) -> RecordKind {
        let shape = self.shape(note);
        classify_shape(&shape)
    }
}

/// Run the rule chain over a precomputed shape.
pub fn classify_shape(shape: &NoteShape) -> RecordKind {
    RULES
        .iter()
        .find(|(_, matches)| matches(shape))
        .map(|(kind, _)| *kind)
        .unwrap_or(RecordKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewcrawl_shared::{ForumHandle, ProtocolVersion};
    use serde_json::json;

    fn note(id: &str, signatures: &[&str], content: serde_json::Value) -> RawNote {
        RawNote {
            id: id.into(),
            forum: ForumHandle::new("forum1"),
            replyto: (id != "forum1").then(|| "forum1".to_string()),
            invitations: vec!["irrelevant/-/Label".into()],
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
            readers: vec!["everyone".into()],
            content: serde_json::from_value(content).unwrap(),
            number: None,
            created_ms: Some(1),
            modified_ms: None,
            protocol: ProtocolVersion::V2,
        }
    }

    #[test]
    fn v2_review() {
        let n = note(
            "r1",
            &["ICLR.cc/2024/Conference/Submission1/Reviewer_abcd"],
            json!({
                "rating": {"value": "8: accept, good paper"},
                "confidence": {"value": "4: You are confident in your assessment"},
                "summary": {"value": "The paper proposes ..."},
                "strengths": {"value": "Clear writing."}
            }),
        );
        assert_eq!(Classifier::default().classify(&n), RecordKind::Review);
    }

    #[test]
    fn legacy_v1_review() {
        let n = note(
            "r1",
            &["ICLR.cc/2019/Conference/Paper1/AnonReviewer1"],
            json!({
                "title": "Interesting but limited",
                "rating": "6: Marginally above acceptance threshold",
                "review": "This paper studies ...",
                "confidence": "3: The reviewer is fairly confident"
            }),
        );
        assert_eq!(Classifier::default().classify(&n), RecordKind::Review);
    }

    #[test]
    fn numeric_rating_review() {
        let n = note(
            "r1",
            &[],
            json!({"rating": {"value": 6}, "main_review": {"value": "Good."}}),
        );
        assert_eq!(Classifier::default().classify(&n), RecordKind::Review);
    }

    #[test]
    fn chair_decision() {
        let n = note(
            "d1",
            &["ICLR.cc/2024/Conference/Program_Chairs"],
            json!({
                "title": {"value": "Paper Decision"},
                "decision": {"value": "Accept (poster)"},
                "comment": {"value": "Reviewers agree."}
            }),
        );
        assert_eq!(Classifier::default().classify(&n), RecordKind::MetaReview);
    }

    #[test]
    fn area_chair_recommendation_with_confidence() {
        // Area-chair notes carry a confidence score but no review sections.
        let n = note(
            "m1",
            &["ICLR.cc/2019/Conference/Paper1/Area_Chair1"],
            json!({
                "metareview": "All reviewers lean accept.",
                "recommendation": "Accept (Poster)",
                "confidence": "5: The area chair is absolutely certain"
            }),
        );
        assert_eq!(Classifier::default().classify(&n), RecordKind::MetaReview);
    }

    #[test]
    fn decision_without_committee_is_comment() {
        let n = note(
            "c1",
            &["ICLR.cc/2024/Conference/Submission1/Authors"],
            json!({"decision": {"value": "Accept"}, "comment": {"value": "We hope so!"}}),
        );
        assert_eq!(Classifier::default().classify(&n), RecordKind::Comment);
    }

    #[test]
    fn root_is_submission() {
        let n = note(
            "forum1",
            &["~Ada_Lovelace1"],
            json!({"title": {"value": "T"}, "abstract": {"value": "A"}}),
        );
        assert_eq!(Classifier::default().classify(&n), RecordKind::Submission);
    }

    #[test]
    fn unparseable_rating_without_sections_is_comment() {
        let n = note("x1", &[], json!({"rating": {"value": "great"}, "comment": {"value": "hi"}}));
        assert_eq!(Classifier::default().classify(&n), RecordKind::Comment);
    }

    #[test]
    fn empty_content_is_unknown() {
        let n = note("x1", &[], json!({"comment": {"value": "   "}, "flag": {"value": 3}}));
        assert_eq!(Classifier::default().classify(&n), RecordKind::Unknown);
    }

    #[test]
    fn min_text_chars_is_respected() {
        let config = ClassifierConfig {
            min_text_chars: 10,
            ..ClassifierConfig::default()
        };
        let n = note("c1", &[], json!({"comment": {"value": "+1"}}));
        assert_eq!(Classifier::new(&config).classify(&n), RecordKind::Unknown);
        assert_eq!(Classifier::default().classify(&n), RecordKind::Comment);
    }

    #[test]
    fn custom_keys_extend_heuristics() {
        let config = ClassifierConfig {
            rating_keys: vec!["Overall_Score".into()],
            review_text_keys: vec!["assessment".into()],
            ..ClassifierConfig::default()
        };
        let n = note(
            "r1",
            &[],
            json!({"overall_score": "7: good", "assessment": "Fine work."}),
        );
        let classifier = Classifier::new(&config);
        assert_eq!(classifier.config().rating_keys, vec!["overall_score".to_string()]);
        assert_eq!(classifier.classify(&n), RecordKind::Review);
        assert_eq!(Classifier::default().classify(&n), RecordKind::Comment);
    }

    #[test]
    fn classification_is_deterministic() {
        let n = note(
            "r1",
            &[],
            json!({"rating": {"value": "3: reject"}, "weaknesses": {"value": "Many."}}),
        );
        let classifier = Classifier::default();
        let first = classifier.classify(&n);
        for _ in 0..10 {
            assert_eq!(classifier.classify(&n.clone()), first);
        }
        assert_eq!(classifier.shape(&n), classifier.shape(&n));
    }
}
