//! Crawl orchestration and domain logic for reviewcrawl.
//!
//! This crate ties together protocol negotiation, forum fetching,
//! classification, normalization and the fingerprint cache into a single
//! run (`crawl_venue`).

pub mod classifier;
mod fields;
pub mod fingerprint;
pub mod normalizer;
pub mod pipeline;

pub use classifier::{Classifier, NoteShape, classify_shape};
pub use fingerprint::{FingerprintCache, ForumClaim, compute_fingerprint};
pub use normalizer::{Normalizer, is_accepted, normalize_decision};
pub use pipeline::{
    CrawlEvent, CrawlRun, Engine, ForumOutcome, ProgressReporter, RunCounters, RunSummary,
    SilentProgress, crawl_venue,
};
