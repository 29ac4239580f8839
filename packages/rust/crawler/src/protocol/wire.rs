//! JSON shapes returned by the notes API, shared by both generations.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use reviewcrawl_shared::{ForumHandle, ProtocolVersion, RawNote, Result, ReviewCrawlError};

use crate::dispatcher::{ApiRequest, Dispatcher};
use crate::protocol::NotePage;

/// A note as serialized by either API generation.
///
/// v1 carries a single `invitation`, v2 a list of `invitations`; v2 also
/// wraps every content value in `{"value": ...}`.
#[derive(Debug, Deserialize)]
pub(crate) struct WireNote {
    id: String,
    #[serde(default)]
    forum: Option<String>,
    #[serde(default)]
    replyto: Option<String>,
    #[serde(default)]
    invitation: Option<String>,
    #[serde(default)]
    invitations: Vec<String>,
    #[serde(default)]
    signatures: Vec<String>,
    #[serde(default)]
    readers: Vec<String>,
    #[serde(default)]
    content: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    cdate: Option<i64>,
    #[serde(default)]
    tcdate: Option<i64>,
    #[serde(default)]
    mdate: Option<i64>,
    #[serde(default)]
    tmdate: Option<i64>,
}

impl WireNote {
    pub(crate) fn into_raw(self, protocol: ProtocolVersion) -> RawNote {
        let mut invitations = self.invitations;
        if let Some(single) = self.invitation {
            if !invitations.contains(&single) {
                invitations.insert(0, single);
            }
        }

        RawNote {
            forum: ForumHandle::new(self.forum.unwrap_or_else(|| self.id.clone())),
            id: self.id,
            replyto: self.replyto,
            invitations,
            signatures: self.signatures,
            readers: self.readers,
            content: self.content.unwrap_or_default(),
            number: self.number,
            created_ms: self.cdate.or(self.tcdate),
            modified_ms: self.tmdate.or(self.mdate),
            protocol,
        }
    }
}

/// Body of `GET /notes`.
#[derive(Debug, Deserialize)]
pub(crate) struct NotesResponse {
    #[serde(default)]
    pub notes: Vec<WireNote>,
    #[serde(default)]
    pub count: Option<u64>,
}

/// Body of `POST /login`.
#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub token: String,
}

/// Whether every content value is wrapped as `{"value": ...}`.
pub(crate) fn is_value_wrapped(content: &BTreeMap<String, Value>) -> bool {
    !content.is_empty()
        && content
            .values()
            .all(|v| matches!(v, Value::Object(map) if map.contains_key("value")))
}

/// Join an API path onto a base URL, keeping any base path prefix.
pub(crate) fn endpoint(base: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// One `GET /notes` call, decoded into raw notes.
pub(crate) async fn get_notes(
    dispatcher: &Dispatcher,
    base: &Url,
    query: &[(&str, String)],
    token: Option<&str>,
    protocol: ProtocolVersion,
) -> Result<NotePage> {
    let mut request = ApiRequest::get(endpoint(base, "notes")).bearer(token);
    for (key, value) in query {
        request = request.query(key, value);
    }

    let response = dispatcher.submit(&request).await?;
    let body: NotesResponse = response.json()?;

    Ok(NotePage {
        notes: body
            .notes
            .into_iter()
            .map(|n| n.into_raw(protocol))
            .collect(),
        total: body.count,
        retries: response.retries,
    })
}

/// Exchange credentials for a bearer token.
pub(crate) async fn login(
    dispatcher: &Dispatcher,
    base: &Url,
    username: &str,
    password: &str,
) -> Result<String> {
    let request = ApiRequest::post_json(
        endpoint(base, "login"),
        serde_json::json!({ "id": username, "password": password }),
    );
    let response = dispatcher.submit(&request).await?;
    let body: LoginResponse = response.json()?;
    if body.token.is_empty() {
        return Err(ReviewCrawlError::parse("login response carried an empty token"));
    }
    Ok(body.token)
}

/// Download a submission PDF.
pub(crate) async fn get_pdf(
    dispatcher: &Dispatcher,
    base: &Url,
    forum: &ForumHandle,
    token: Option<&str>,
) -> Result<Vec<u8>> {
    let request = ApiRequest::get(endpoint(base, "pdf"))
        .query("id", forum)
        .bearer(token);
    Ok(dispatcher.submit(&request).await?.body)
}
