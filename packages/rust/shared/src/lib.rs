//! Shared types, error model, and configuration for reviewcrawl.
//!
//! This crate is the foundation depended on by all other reviewcrawl crates.
//! It provides:
//! - [`ReviewCrawlError`]: the unified error type, plus [`ValidationError`]
//! - Domain types ([`Venue`], [`ForumHandle`], [`RawNote`], [`RecordKind`])
//! - Canonical output records ([`CanonicalRecord`] and its variants)
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod records;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiConfig, AppConfig, AttachmentsConfig, ClassifierConfig, CrawlConfig, Credentials,
    DefaultsConfig, RateLimitConfig, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from, load_credentials,
};
pub use error::{Result, ReviewCrawlError, ValidationError};
pub use records::{
    CanonicalRecord, CommentRecord, DecisionRecord, Enrichment, PaperRecord, RejectedNote,
    ReviewRecord,
};
pub use types::{FingerprintEntry, ForumHandle, ProtocolVersion, RawNote, RecordKind, Venue};
