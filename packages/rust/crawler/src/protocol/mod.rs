//! API generation negotiation and the [`NoteSource`] capability.
//!
//! The remote service exposes two incompatible API generations. A venue is
//! served by exactly one of them; [`negotiate`] probes the newer one first,
//! falls back to the older one, and returns a source for the rest of the run.

pub mod v1;
pub mod v2;
pub(crate) mod wire;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use url::Url;

use reviewcrawl_shared::{
    CrawlConfig, Credentials, ForumHandle, ProtocolVersion, RawNote, Result, ReviewCrawlError,
    Venue,
};

use crate::dispatcher::Dispatcher;

pub use v1::V1Source;
pub use v2::V2Source;

/// One page of a notes listing.
#[derive(Debug, Clone, Default)]
pub struct NotePage {
    pub notes: Vec<RawNote>,
    /// Total reported by the server, if any. Not trusted for termination.
    pub total: Option<u64>,
    /// Retries the dispatcher needed for this page.
    pub retries: u32,
}

/// Read access to one venue through one API generation.
#[async_trait]
pub trait NoteSource: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    /// A page of the venue's submissions.
    async fn list_submissions(&self, offset: u32, limit: u32) -> Result<NotePage>;

    /// A page of every note in one forum (submission included).
    async fn list_forum_notes(
        &self,
        forum: &ForumHandle,
        offset: u32,
        limit: u32,
    ) -> Result<NotePage>;

    /// A single note by id, `None` if the server has no such note.
    async fn get_note(&self, id: &str) -> Result<Option<RawNote>>;

    /// Raw bytes of a submission's PDF.
    async fn fetch_pdf(&self, forum: &ForumHandle) -> Result<Vec<u8>>;
}

/// Base URLs of both API generations.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub v2: Url,
    pub v1: Url,
}

impl Endpoints {
    pub fn new(v2: &str, v1: &str) -> Result<Self> {
        let parse = |label: &str, raw: &str| {
            Url::parse(raw)
                .map_err(|e| ReviewCrawlError::config(format!("invalid {label} base URL {raw}: {e}")))
        };
        Ok(Self {
            v2: parse("v2", v2)?,
            v1: parse("v1", v1)?,
        })
    }

    pub fn from_config(config: &CrawlConfig) -> Result<Self> {
        Self::new(&config.v2_base_url, &config.v1_base_url)
    }
}

/// Pick the API generation serving `venue`.
///
/// Structural v2 failures (missing invitation, rejected login, unwrapped
/// content) fall back to v1. Transient failures are returned as is, since
/// they say nothing about which generation the venue speaks. Failing both
/// generations is fatal.
#[instrument(skip_all, fields(venue = %venue))]
pub async fn negotiate(
    venue: &Venue,
    credentials: Option<&Credentials>,
    endpoints: &Endpoints,
    dispatcher: Arc<Dispatcher>,
) -> Result<Arc<dyn NoteSource>> {
    let v2_reason = match V2Source::probe(venue, credentials, &endpoints.v2, dispatcher.clone())
        .await
    {
        Ok(source) => {
            info!(protocol = "v2", "negotiated API generation");
            return Ok(Arc::new(source));
        }
        Err(e) if e.is_transient() => {
            warn!(error = %e, "v2 did not answer, not falling back");
            return Err(e);
        }
        Err(e) => {
            info!(error = %e, "v2 probe failed, trying v1");
            e.to_string()
        }
    };

    match V1Source::probe(venue, credentials, &endpoints.v1, dispatcher).await {
        Ok(source) => {
            info!(protocol = "v1", invitation = source.invitation(), "negotiated API generation");
            Ok(Arc::new(source))
        }
        Err(e) => Err(ReviewCrawlError::ProtocolUnavailable {
            venue: venue.id(),
            reason: format!("v2: {v2_reason}; v1: {e}"),
        }),
    }
}
