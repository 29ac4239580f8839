//! Normalizer/validator: turns classified notes into canonical records.
//!
//! Validation failures never abort a forum; they are returned as
//! [`ValidationError`] and routed to the reject channel by the engine.

use serde_json::Value;

use reviewcrawl_shared::{
    CanonicalRecord, ClassifierConfig, CommentRecord, DecisionRecord, Enrichment, PaperRecord,
    RawNote, RecordKind, ReviewRecord, ValidationError,
};

use crate::fields::{field_ci, first_present, is_non_empty, parse_score, string_list, value_text};

/// Free-form review body fields, most specific first.
const REVIEW_BODY_KEYS: &[&str] = &[
    "review",
    "main_review",
    "summary_of_the_review",
    "strength_and_weaknesses",
    "strengths_and_weaknesses",
];

/// Builds canonical records for one venue.
#[derive(Debug, Clone)]
pub struct Normalizer {
    site_url: String,
    venue_label: Option<String>,
    config: ClassifierConfig,
}

impl Normalizer {
    pub fn new(site_url: impl Into<String>, config: &ClassifierConfig) -> Self {
        Self {
            site_url: site_url.into().trim_end_matches('/').to_string(),
            venue_label: None,
            config: config.clone(),
        }
    }

    /// Label recorded in enrichment when a submission does not carry its own.
    pub fn with_venue_label(mut self, label: impl Into<String>) -> Self {
        self.venue_label = Some(label.into());
        self
    }

    /// Validate `note` as `kind` and build its record.
    pub fn normalize(
        &self,
        note: &RawNote,
        kind: RecordKind,
    ) -> Result<CanonicalRecord, ValidationError> {
        match kind {
            RecordKind::Submission => self.paper(note).map(CanonicalRecord::Paper),
            RecordKind::Review => self.review(note).map(CanonicalRecord::Review),
            RecordKind::MetaReview => self.decision(note).map(CanonicalRecord::Decision),
            RecordKind::Comment => self.comment(note).map(CanonicalRecord::Comment),
            RecordKind::Unknown => Err(ValidationError::new(
                "kind",
                "content shape matches no known record kind",
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Per-kind builders
    // -----------------------------------------------------------------------

    fn paper(&self, note: &RawNote) -> Result<PaperRecord, ValidationError> {
        let title = note
            .text("title")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ValidationError::missing("title"))?;

        let abstract_text = match note.field("abstract") {
            None => return Err(ValidationError::missing("abstract")),
            Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(ValidationError::new("abstract", "expected text")),
        };

        let authors = string_list(note.field("authors"));
        if authors.is_empty() {
            return Err(ValidationError::new("authors", "at least one author is required"));
        }

        let mut enrichment = self.base_enrichment(note);
        for (key, label) in [("TLDR", "tldr"), ("TL;DR", "tldr"), ("primary_area", "primary_area")] {
            if let Some(text) = field_ci(note, key).and_then(Value::as_str) {
                enrichment
                    .entry(label.to_string())
                    .or_insert_with(|| Value::String(text.to_string()));
            }
        }
        let venue = note
            .text("venue")
            .map(str::to_string)
            .or_else(|| self.venue_label.clone());
        if let Some(venue) = venue {
            enrichment.insert("venue".into(), Value::String(venue));
        }

        let has_pdf = note.text("pdf").is_some_and(|p| !p.trim().is_empty());

        Ok(PaperRecord {
            forum: note.forum.clone(),
            note_id: note.id.clone(),
            number: note.number,
            title: title.to_string(),
            abstract_text,
            authors,
            keywords: string_list(note.field("keywords")),
            forum_url: format!("{}/forum?id={}", self.site_url, note.forum),
            pdf_url: has_pdf.then(|| format!("{}/pdf?id={}", self.site_url, note.forum)),
            enrichment,
        })
    }

    fn review(&self, note: &RawNote) -> Result<ReviewRecord, ValidationError> {
        let (rating_key, raw_rating) =
            first_present(note, &self.config.rating_keys, self.config.min_text_chars)
                .ok_or_else(|| ValidationError::missing("rating"))?;
        let (rating_value, rating_label) = parse_score(raw_rating).ok_or_else(|| {
            ValidationError::new(
                "rating",
                format!("cannot parse a numeric score from {raw_rating}"),
            )
        })?;

        let confidence = first_present(note, &self.config.confidence_keys, self.config.min_text_chars)
            .map(|(_, v)| v);

        let section = |key: &str| field_ci(note, key).and_then(value_text);
        let review_text = REVIEW_BODY_KEYS.iter().find_map(|key| {
            field_ci(note, key)
                .filter(|v| is_non_empty(v, self.config.min_text_chars))
                .and_then(value_text)
        });

        let mut enrichment = self.base_enrichment(note);
        enrichment.insert("rating_field".into(), Value::String(rating_key.to_string()));

        Ok(ReviewRecord {
            forum: note.forum.clone(),
            note_id: note.id.clone(),
            replyto: note.replyto.clone(),
            rating_value,
            rating_label,
            confidence: confidence.and_then(value_text),
            confidence_value: confidence.and_then(parse_score).map(|(v, _)| v),
            summary: section("summary"),
            soundness: section("soundness"),
            presentation: section("presentation"),
            contribution: section("contribution"),
            strengths: section("strengths"),
            weaknesses: section("weaknesses"),
            questions: section("questions"),
            limitations: section("limitations"),
            review_text,
            enrichment,
        })
    }

    fn decision(&self, note: &RawNote) -> Result<DecisionRecord, ValidationError> {
        let decision = first_present(note, &self.config.decision_keys, self.config.min_text_chars)
            .and_then(|(_, v)| value_text(v))
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| ValidationError::missing("decision"))?;

        let justification =
            first_present(note, &self.config.justification_keys, self.config.min_text_chars)
                .and_then(|(_, v)| value_text(v));

        Ok(DecisionRecord {
            forum: note.forum.clone(),
            note_id: note.id.clone(),
            decision_label: normalize_decision(&decision),
            accepted: is_accepted(&decision),
            decision,
            justification,
            enrichment: self.base_enrichment(note),
        })
    }

    fn comment(&self, note: &RawNote) -> Result<CommentRecord, ValidationError> {
        let min = self.config.min_text_chars;
        let text = first_present(note, &self.config.comment_keys, min)
            .and_then(|(_, v)| v.as_str())
            .or_else(|| {
                // Otherwise the longest text field.
                note.fields()
                    .filter(|(_, v)| is_non_empty(v, min))
                    .filter_map(|(_, v)| v.as_str())
                    .max_by_key(|s| s.len())
            })
            .ok_or_else(|| ValidationError::missing("text"))?;

        Ok(CommentRecord {
            forum: note.forum.clone(),
            note_id: note.id.clone(),
            replyto: note.replyto.clone(),
            text: text.to_string(),
            author_role: note.signatures.first().map(|sig| author_role(sig)),
            enrichment: self.base_enrichment(note),
        })
    }

    /// Fields every record gets.
    fn base_enrichment(&self, note: &RawNote) -> Enrichment {
        let mut enrichment = Enrichment::new();
        if let Some(created) = note.created_at() {
            enrichment.insert("created_at".into(), Value::String(created.to_rfc3339()));
        }
        if let Some(invitation) = note.invitations.first() {
            enrichment.insert("invitation".into(), Value::String(invitation.clone()));
        }
        if !note.signatures.is_empty() {
            enrichment.insert(
                "signatures".into(),
                Value::Array(note.signatures.iter().cloned().map(Value::String).collect()),
            );
        }
        enrichment.insert("protocol".into(), Value::String(note.protocol.to_string()));
        enrichment
    }
}

/// Role part of a signature, without anonymizer suffixes.
///
/// `ICLR.cc/2024/Conference/Submission1/Authors` → `Authors`,
/// `.../Reviewer_abcd` → `Reviewer`, `~Ada_Lovelace1` → `~Ada_Lovelace1`.
fn author_role(signature: &str) -> String {
    let last = signature.rsplit('/').next().unwrap_or(signature);
    if last.starts_with('~') {
        return last.to_string();
    }
    if last.starts_with("Reviewer_") {
        return "Reviewer".into();
    }
    if last.starts_with("Area_Chair") {
        return "Area_Chair".into();
    }
    last.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Canonical decision label.
///
/// Exact (case-insensitive) matches win; otherwise the most specific
/// keyword found in the text decides. Unrecognized text is returned as is.
pub fn normalize_decision(decision: &str) -> String {
    let lower = decision.trim().to_lowercase();

    let exact = match lower.as_str() {
        "accept" | "accepted" => Some("Accept"),
        "reject" | "rejected" => Some("Reject"),
        "withdraw" | "withdrawn" => Some("Withdrawn"),
        "desk reject" | "desk rejected" => Some("Desk Reject"),
        _ => None,
    };
    if let Some(label) = exact {
        return label.to_string();
    }

    const ORDERED: &[(&str, &str)] = &[
        ("desk reject", "Desk Reject"),
        ("withdraw", "Withdrawn"),
        ("reject", "Reject"),
        ("oral", "Accept (Oral)"),
        ("spotlight", "Accept (Spotlight)"),
        ("notable", "Accept (Notable)"),
        ("top", "Accept (Top)"),
        ("best", "Accept (Best)"),
        ("poster", "Accept (Poster)"),
        ("accept", "Accept"),
    ];
    ORDERED
        .iter()
        .find(|(keyword, _)| has_keyword(&lower, keyword))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| decision.trim().to_string())
}

/// Whether a decision text means acceptance. Rejection keywords win.
pub fn is_accepted(decision: &str) -> bool {
    let lower = decision.to_lowercase();
    if ["reject", "desk reject", "withdraw"]
        .iter()
        .any(|k| has_keyword(&lower, k))
    {
        return false;
    }
    ["accept", "oral", "poster", "spotlight", "notable", "top", "best"]
        .iter()
        .any(|k| has_keyword(&lower, k))
}

/// Keywords that only count as whole words.
const WHOLE_WORDS: &[&str] = &["top", "best"];

/// `keyword` starting a word of `text` (`"rejected"` has `"reject"`,
/// `"temporal"` has no `"oral"`). Whole-word keywords also need a boundary
/// after them, so `"topic"` has no `"top"`.
fn has_keyword(text: &str, keyword: &str) -> bool {
    let whole = WHOLE_WORDS.contains(&keyword);
    text.match_indices(keyword).any(|(at, _)| {
        let starts = text[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let ends = !whole
            || text[at + keyword.len()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_alphanumeric());
        starts && ends
    })
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
            invitations: vec!["ICLR.cc/2024/Conference/Submission1/-/Official_Review".into()],
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
            readers: vec!["everyone".into()],
            content: serde_json::from_value(content).unwrap(),
            number: Some(1),
            created_ms: Some(1_700_000_000_000),
            modified_ms: None,
            protocol: ProtocolVersion::V2,
        }
    }

    fn normalizer() -> Normalizer {
        Normalizer::new("https://openreview.net/", &ClassifierConfig::default())
            .with_venue_label("ICLR 2024")
    }

    #[test]
    fn rating_example() {
        let n = note(
            "r1",
            &["ICLR.cc/2024/Conference/Submission1/Reviewer_abcd"],
            json!({
                "rating": {"value": "8: Accept"},
                "confidence": {"value": "4: High"},
                "summary": {"value": "Summary."},
                "soundness": {"value": 3}
            }),
        );
        let record = normalizer().normalize(&n, RecordKind::Review).unwrap();
        let CanonicalRecord::Review(review) = record else {
            panic!("expected review");
        };
        assert_eq!(review.rating_value, 8.0);
        assert_eq!(review.rating_label, "8: Accept");
        assert_eq!(review.confidence.as_deref(), Some("4: High"));
        assert_eq!(review.confidence_value, Some(4.0));
        assert_eq!(review.summary.as_deref(), Some("Summary."));
        assert_eq!(review.soundness.as_deref(), Some("3"));
        assert_eq!(review.enrichment["rating_field"], "rating");
    }

    #[test]
    fn unparseable_rating_is_rejected_not_zero() {
        let n = note(
            "r1",
            &[],
            json!({"rating": {"value": "strong accept"}, "review": {"value": "Great."}}),
        );
        let err = normalizer().normalize(&n, RecordKind::Review).unwrap_err();
        assert_eq!(err.field, "rating");
    }

    #[test]
    fn missing_rating_is_rejected() {
        let n = note(
            "r1",
            &[],
            json!({"confidence": {"value": "3: ok"}, "review": {"value": "Great."}}),
        );
        let err = normalizer().normalize(&n, RecordKind::Review).unwrap_err();
        assert_eq!(err.field, "rating");
    }

    #[test]
    fn paper_normalization() {
        let n = note(
            "forum1",
            &["ICLR.cc/2024/Conference/Submission1/Authors"],
            json!({
                "title": {"value": "  Attention Is Enough  "},
                "abstract": {"value": "We show ...\n"},
                "authors": {"value": ["Ada", " Alan ", "Ada"]},
                "keywords": {"value": "transformers, , attention"},
                "TLDR": {"value": "Short."},
                "pdf": {"value": "/pdf/abc.pdf"}
            }),
        );
        let CanonicalRecord::Paper(paper) = normalizer().normalize(&n, RecordKind::Submission).unwrap()
        else {
            panic!("expected paper");
        };
        // Stored byte-for-byte.
        assert_eq!(paper.title, "  Attention Is Enough  ");
        assert_eq!(paper.abstract_text, "We show ...\n");
        assert_eq!(paper.authors, vec!["Ada", "Alan"]);
        assert_eq!(paper.keywords, vec!["transformers", "attention"]);
        assert_eq!(paper.forum_url, "https://openreview.net/forum?id=forum1");
        assert_eq!(paper.pdf_url.as_deref(), Some("https://openreview.net/pdf?id=forum1"));
        assert_eq!(paper.enrichment["tldr"], "Short.");
        assert_eq!(paper.enrichment["venue"], "ICLR 2024");
        assert_eq!(paper.enrichment["protocol"], "v2");
        assert!(paper.enrichment.contains_key("created_at"));
    }

    #[test]
    fn paper_validation_failures() {
        let normalizer = normalizer();
        let cases = [
            (json!({"abstract": "a", "authors": ["x"]}), "title"),
            (json!({"title": "  ", "abstract": "a", "authors": ["x"]}), "title"),
            (json!({"title": "t", "authors": ["x"]}), "abstract"),
            (json!({"title": "t", "abstract": "a", "authors": []}), "authors"),
            (json!({"title": "t", "abstract": "a", "authors": " , "}), "authors"),
        ];
        for (content, field) in cases {
            let n = note("forum1", &[], content);
            let err = normalizer.normalize(&n, RecordKind::Submission).unwrap_err();
            assert_eq!(err.field, field);
        }
    }

    #[test]
    fn empty_abstract_is_allowed() {
        let n = note("forum1", &[], json!({"title": "t", "abstract": "", "authors": "A, B"}));
        let CanonicalRecord::Paper(paper) = normalizer().normalize(&n, RecordKind::Submission).unwrap()
        else {
            panic!("expected paper");
        };
        assert_eq!(paper.abstract_text, "");
        assert_eq!(paper.authors, vec!["A", "B"]);
        assert!(paper.pdf_url.is_none());
    }

    #[test]
    fn decision_record() {
        let n = note(
            "d1",
            &["ICLR.cc/2024/Conference/Program_Chairs"],
            json!({"decision": {"value": "Accept (spotlight)"}, "comment": {"value": "Congrats."}}),
        );
        let CanonicalRecord::Decision(decision) =
            normalizer().normalize(&n, RecordKind::MetaReview).unwrap()
        else {
            panic!("expected decision");
        };
        assert_eq!(decision.decision, "Accept (spotlight)");
        assert_eq!(decision.decision_label, "Accept (Spotlight)");
        assert!(decision.accepted);
        assert_eq!(decision.justification.as_deref(), Some("Congrats."));
    }

    #[test]
    fn blank_decision_is_rejected() {
        let n = note("d1", &[], json!({"decision": {"value": "  "}}));
        let err = normalizer().normalize(&n, RecordKind::MetaReview).unwrap_err();
        assert_eq!(err.field, "decision");
    }

    #[test]
    fn comment_record() {
        let n = note(
            "c1",
            &["ICLR.cc/2024/Conference/Submission1/Authors"],
            json!({"title": {"value": "Response"}, "comment": {"value": "We thank the reviewer."}}),
        );
        let CanonicalRecord::Comment(comment) = normalizer().normalize(&n, RecordKind::Comment).unwrap()
        else {
            panic!("expected comment");
        };
        assert_eq!(comment.text, "We thank the reviewer.");
        assert_eq!(comment.author_role.as_deref(), Some("Authors"));
        assert_eq!(comment.replyto.as_deref(), Some("forum1"));
    }

    #[test]
    fn comment_falls_back_to_longest_text() {
        let n = note("c1", &[], json!({"title": "Hi", "rebuttal_text": "A much longer body."}));
        let CanonicalRecord::Comment(comment) = normalizer().normalize(&n, RecordKind::Comment).unwrap()
        else {
            panic!("expected comment");
        };
        assert_eq!(comment.text, "A much longer body.");
    }

    #[test]
    fn unknown_is_rejected() {
        let n = note("x1", &[], json!({}));
        let err = normalizer().normalize(&n, RecordKind::Unknown).unwrap_err();
        assert_eq!(err.field, "kind");
    }

    #[test]
    fn record_round_trips_byte_for_byte() {
        let n = note(
            "r1",
            &[],
            json!({
                "rating": {"value": "6: Marginally above — with “quotes” and ünïcödé"},
                "review": {"value": "Line one\r\nLine two\ttabbed  "}
            }),
        );
        let record = normalizer().normalize(&n, RecordKind::Review).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: CanonicalRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);

        let CanonicalRecord::Review(review) = parsed else {
            panic!("expected review");
        };
        assert_eq!(review.rating_label, "6: Marginally above — with “quotes” and ünïcödé");
        assert_eq!(review.review_text.as_deref(), Some("Line one\r\nLine two\ttabbed  "));
    }

    #[test]
    fn decision_labels() {
        let cases = [
            ("Accept", "Accept"),
            ("accepted", "Accept"),
            ("Reject", "Reject"),
            ("Accept (Oral)", "Accept (Oral)"),
            ("Accept (poster)", "Accept (Poster)"),
            ("Accept: notable-top-5%", "Accept (Notable)"),
            ("Desk Rejected", "Desk Reject"),
            ("Withdrawn", "Withdrawn"),
            ("Invite to Workshop Track", "Invite to Workshop Track"),
            ("Accept (Top 5%)", "Accept (Top)"),
            ("Accept (best paper)", "Accept (Best)"),
            ("Revise and resubmit on a laptop", "Revise and resubmit on a laptop"),
            ("Non-stop discussion", "Non-stop discussion"),
            ("Temporal reasoning track", "Temporal reasoning track"),
        ];
        for (raw, label) in cases {
            assert_eq!(normalize_decision(raw), label, "{raw}");
        }
    }

    #[test]
    fn acceptance() {
        assert!(is_accepted("Accept (Poster)"));
        assert!(is_accepted("Oral"));
        assert!(!is_accepted("Reject"));
        assert!(!is_accepted("Desk Reject"));
        assert!(!is_accepted("Withdrawn"));
        assert!(!is_accepted("Invite to Workshop Track"));
        assert!(!is_accepted(""));
        assert!(is_accepted("ICLR 2024 notable-top-5%"));
        assert!(!is_accepted("Submitted to ICLR 2024: topic modelling"));
        assert!(!is_accepted("Pending after a stop in review"));
        assert!(!is_accepted("Moral hazard track"));
    }

    #[test]
    fn author_roles() {
        assert_eq!(author_role("ICLR.cc/2024/Conference/Submission1/Authors"), "Authors");
        assert_eq!(author_role("ICLR.cc/2024/Conference/Submission1/Reviewer_abcd"), "Reviewer");
        assert_eq!(author_role("ICLR.cc/2019/Conference/Paper1/AnonReviewer2"), "AnonReviewer");
        assert_eq!(author_role("ICLR.cc/2024/Conference/Submission1/Area_Chair_xyz"), "Area_Chair");
        assert_eq!(author_role("ICLR.cc/2024/Conference/Program_Chairs"), "Program_Chairs");
        assert_eq!(author_role("~Ada_Lovelace1"), "~Ada_Lovelace1");
    }
}
