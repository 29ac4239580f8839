//! Note source for the legacy API generation.
//!
//! Older venues post submissions under either `/-/Submission` or, when
//! reviewing was double-blind, `/-/Blind_Submission`. The probe remembers
//! whichever pattern listed notes and uses it for the whole run.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use reviewcrawl_shared::{
    Credentials, ForumHandle, ProtocolVersion, RawNote, Result, ReviewCrawlError, Venue,
};

use crate::dispatcher::Dispatcher;
use crate::protocol::wire;
use crate::protocol::{NotePage, NoteSource};

/// Reads a venue through the v1 API. Content values arrive unwrapped.
pub struct V1Source {
    dispatcher: Arc<Dispatcher>,
    base: Url,
    token: Option<String>,
    invitation: String,
}

impl V1Source {
    /// Try each submission invitation pattern in turn.
    ///
    /// A rejected login is not fatal here: public venues remain readable
    /// anonymously.
    pub async fn probe(
        venue: &Venue,
        credentials: Option<&Credentials>,
        base: &Url,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        let token = match credentials {
            Some(creds) => {
                match wire::login(&dispatcher, base, &creds.username, &creds.password).await {
                    Ok(token) => Some(token),
                    Err(e) => {
                        warn!(error = %e, "v1 login failed, continuing anonymously");
                        None
                    }
                }
            }
            None => None,
        };

        let mut failures = Vec::new();
        for invitation in [
            venue.submission_invitation(),
            venue.blind_submission_invitation(),
        ] {
            let probe = wire::get_notes(
                &dispatcher,
                base,
                &[("invitation", invitation.clone()), ("limit", "1".into())],
                token.as_deref(),
                ProtocolVersion::V1,
            )
            .await;

            match probe {
                Ok(page) if !page.notes.is_empty() => {
                    debug!(%invitation, "v1 probe succeeded");
                    return Ok(Self {
                        dispatcher,
                        base: base.clone(),
                        token,
                        invitation,
                    });
                }
                Ok(_) => failures.push(format!("no notes under {invitation}")),
                Err(e) => failures.push(format!("{invitation}: {e}")),
            }
        }

        Err(ReviewCrawlError::ProtocolUnavailable {
            venue: venue.id(),
            reason: failures.join("; "),
        })
    }

    /// Submission invitation this source lists.
    pub fn invitation(&self) -> &str {
        &self.invitation
    }
}

#[async_trait]
impl NoteSource for V1Source {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V1
    }

    async fn list_submissions(&self, offset: u32, limit: u32) -> Result<NotePage> {
        wire::get_notes(
            &self.dispatcher,
            &self.base,
            &[
                ("invitation", self.invitation.clone()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ],
            self.token.as_deref(),
            ProtocolVersion::V1,
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
            ProtocolVersion::V1,
        )
        .await
    }

    async fn get_note(&self, id: &str) -> Result<Option<RawNote>> {
        let page = wire::get_notes(
            &self.dispatcher,
            &self.base,
            &[("id", id.to_string())],
            self.token.as_deref(),
            ProtocolVersion::V1,
        )
        .await?;
        Ok(page.notes.into_iter().find(|n| n.id == id))
    }

    async fn fetch_pdf(&self, forum: &ForumHandle) -> Result<Vec<u8>> {
        wire::get_pdf(&self.dispatcher, &self.base, forum, self.token.as_deref()).await
    }
}
