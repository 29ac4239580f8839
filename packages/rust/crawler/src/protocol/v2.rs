//! Note source for the current API generation (`api2`).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use reviewcrawl_shared::{
    Credentials, ForumHandle, ProtocolVersion, RawNote, Result, ReviewCrawlError, Venue,
};

use crate::dispatcher::Dispatcher;
use crate::protocol::wire::{self, is_value_wrapped};
use crate::protocol::{NotePage, NoteSource};

/// Reads a venue through the v2 API. Content values arrive wrapped.
pub struct V2Source {
    dispatcher: Arc<Dispatcher>,
    base: Url,
    token: Option<String>,
    invitation: String,
}

impl V2Source {
    /// Log in (when credentials are given) and check that the venue's
    /// submission invitation lists at least one value-wrapped note.
    pub async fn probe(
        venue: &Venue,
        credentials: Option<&Credentials>,
        base: &Url,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        let token = match credentials {
            Some(creds) => {
                Some(wire::login(&dispatcher, base, &creds.username, &creds.password).await?)
            }
            None => None,
        };

        let invitation = venue.submission_invitation();
        let page = wire::get_notes(
            &dispatcher,
            base,
            &[("invitation", invitation.clone()), ("limit", "1".into())],
            token.as_deref(),
            ProtocolVersion::V2,
        )
        .await?;

        let Some(first) = page.notes.first() else {
            return Err(unavailable(venue, format!("no notes under {invitation}")));
        };
        if !is_value_wrapped(&first.content) {
            return Err(unavailable(venue, "content is not value-wrapped"));
        }

        debug!(%invitation, authenticated = token.is_some(), "v2 probe succeeded");
        Ok(Self {
            dispatcher,
            base: base.clone(),
            token,
            invitation,
        })
    }
}

fn unavailable(venue: &Venue, reason: impl Into<String>) -> ReviewCrawlError {
    ReviewCrawlError::ProtocolUnavailable {
        venue: venue.id(),
        reason: reason.into(),
    }
}

#[async_trait]
impl NoteSource for V2Source {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    async fn list_submissions(&self, offset: u32, limit: u32) -> Result<NotePage> {
        wire::get_notes(
            &self.dispatcher,
            &self.base,
            &[
                ("invitation", self.invitation.clone()),
                ("sort", "number:asc".into()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ],
            self.token.as_deref(),
            ProtocolVersion::V2,
        )
        .await
    }

    async fn list_forum_notes(
        &self,
        forum: &ForumHandle,
        offset: u32,
        limit: u32,
    ) -> Result<NotePage> {
        wire::get_notes(
            &self.dispatcher,
            &self.base,
            &[
                ("forum", forum.to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ],
            self.token.as_deref(),
            ProtocolVersion::V2,
        )
        .await
    }

    async fn get_note(&self, id: &str) -> Result<Option<RawNote>> {
        let page = wire::get_notes(
            &self.dispatcher,
            &self.base,
            &[("id", id.to_string())],
            self.token.as_deref(),
            ProtocolVersion::V2,
        )
        .await?;
        Ok(page.notes.into_iter().find(|n| n.id == id))
    }

    async fn fetch_pdf(&self, forum: &ForumHandle) -> Result<Vec<u8>> {
        wire::get_pdf(&self.dispatcher, &self.base, forum, self.token.as_deref()).await
    }
}
