//! Remote access to peer-review forums.
//!
//! This crate provides:
//! - [`dispatcher`]: rate-limited HTTP dispatch with retry and backoff
//! - [`protocol`]: API generation negotiation and the [`NoteSource`] capability
//! - [`fetcher`]: paginated forum fetching and verified PDF attachments

pub mod dispatcher;
pub mod fetcher;
pub mod protocol;

pub use dispatcher::{
    ApiRequest, ApiResponse, Dispatcher, RateBudget, RetryPolicy, backoff_delay, build_client,
};
pub use fetcher::{Attachment, ForumBundle, ForumFetcher, declared_checksum, sha256_hex};
pub use protocol::{Endpoints, NotePage, NoteSource, V1Source, V2Source, negotiate};
