//! Forum fetcher: full note trees per forum, plus verified PDF attachments.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use reviewcrawl_shared::{CrawlConfig, ForumHandle, RawNote, Result, ReviewCrawlError};

use crate::protocol::{NotePage, NoteSource};

// ---------------------------------------------------------------------------
// ForumBundle
// ---------------------------------------------------------------------------

/// A PDF downloaded and written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub path: PathBuf,
    /// Hex SHA-256 of the file contents.
    pub sha256: String,
    pub size: u64,
    /// Whether a declared checksum was available and matched.
    pub checksum_verified: bool,
}

/// Every note of one forum, as fetched.
#[derive(Debug, Clone)]
pub struct ForumBundle {
    pub forum: ForumHandle,
    /// The root note.
    pub submission: RawNote,
    /// Replies in listing order.
    pub children: Vec<RawNote>,
    pub attachment: Option<Attachment>,
    /// Dispatcher retries spent on this forum's listing.
    pub retries: u32,
}

impl ForumBundle {
    /// Submission first, then children.
    pub fn notes(&self) -> impl Iterator<Item = &RawNote> {
        std::iter::once(&self.submission).chain(self.children.iter())
    }

    pub fn note_count(&self) -> usize {
        1 + self.children.len()
    }
}

#[derive(Debug, Clone, Copy)]
enum Listing<'a> {
    Submissions,
    Forum(&'a ForumHandle),
}

// ---------------------------------------------------------------------------
// ForumFetcher
// ---------------------------------------------------------------------------

/// Paginates listings through a [`NoteSource`].
pub struct ForumFetcher {
    source: Arc<dyn NoteSource>,
    page_size: u32,
    page_retries: u32,
    attachments_dir: Option<PathBuf>,
}

impl ForumFetcher {
    pub fn new(source: Arc<dyn NoteSource>, page_size: u32, page_retries: u32) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            page_retries,
            attachments_dir: None,
        }
    }

    pub fn from_config(source: Arc<dyn NoteSource>, config: &CrawlConfig) -> Self {
        Self::new(source, config.page_size, config.page_retries)
            .with_attachments_dir(config.attachments_dir.clone())
    }

    /// Download PDFs into `dir`. `None` disables downloads.
    pub fn with_attachments_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.attachments_dir = dir;
        self
    }

    pub fn source(&self) -> &Arc<dyn NoteSource> {
        &self.source
    }

    /// Every submission of the venue, de-duplicated by id.
    #[instrument(skip_all)]
    pub async fn list_submissions(&self) -> Result<Vec<RawNote>> {
        let (notes, retries) = self.paginate(Listing::Submissions).await?;
        debug!(count = notes.len(), retries, "listed submissions");
        Ok(notes)
    }

    /// Every note of `forum`, with the submission separated out.
    ///
    /// Any failure is reported as [`ReviewCrawlError::ForumFetchFailed`].
    #[instrument(skip_all, fields(forum = %forum))]
    pub async fn fetch_notes(&self, forum: &ForumHandle) -> Result<ForumBundle> {
        let failed = |e: ReviewCrawlError| ReviewCrawlError::forum_failed(forum.as_str(), e.to_string());

        let (mut notes, retries) = self.paginate(Listing::Forum(forum)).await.map_err(failed)?;

        let submission = match notes.iter().position(|n| n.id == forum.as_str()) {
            Some(idx) => notes.remove(idx),
            None => {
                debug!("submission missing from listing, fetching directly");
                self.source
                    .get_note(forum.as_str())
                    .await
                    .map_err(failed)?
                    .ok_or_else(|| {
                        ReviewCrawlError::forum_failed(forum.as_str(), "submission note not found")
                    })?
            }
        };

        debug!(children = notes.len(), retries, "fetched forum");
        Ok(ForumBundle {
            forum: forum.clone(),
            submission,
            children: notes,
            attachment: None,
            retries,
        })
    }

    /// Download, verify and store the submission PDF.
    ///
    /// No-op without an attachments directory or a `pdf` reference. On
    /// checksum mismatch the attachment stays absent and
    /// [`ReviewCrawlError::AttachmentMismatch`] is returned.
    #[instrument(skip_all, fields(forum = %bundle.forum))]
    pub async fn attach_pdf(&self, bundle: &mut ForumBundle) -> Result<()> {
        let Some(dir) = &self.attachments_dir else {
            return Ok(());
        };
        if !references_pdf(&bundle.submission) {
            return Ok(());
        }
        bundle.attachment = None;

        let bytes = self.source.fetch_pdf(&bundle.forum).await?;
        let actual = sha256_hex(&bytes);
        let declared = declared_checksum(&bundle.submission);

        if let Some(expected) = &declared {
            if *expected != actual {
                return Err(ReviewCrawlError::AttachmentMismatch {
                    forum: bundle.forum.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let path = dir.join(format!("{}.pdf", file_safe(bundle.forum.as_str())));
        write_atomic(dir, &path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "stored attachment");

        bundle.attachment = Some(Attachment {
            path,
            sha256: actual,
            size: bytes.len() as u64,
            checksum_verified: declared.is_some(),
        });
        Ok(())
    }

    /// [`fetch_notes`](Self::fetch_notes) followed by
    /// [`attach_pdf`](Self::attach_pdf). Attachment failures are logged and
    /// leave the bundle without an attachment.
    pub async fn fetch(&self, forum: &ForumHandle) -> Result<ForumBundle> {
        let mut bundle = self.fetch_notes(forum).await?;
        if let Err(e) = self.attach_pdf(&mut bundle).await {
            warn!(forum = %forum, error = %e, "attachment dropped");
        }
        Ok(bundle)
    }

    // -----------------------------------------------------------------------
    // Pagination
    // -----------------------------------------------------------------------

    /// Read pages until an empty page, a partial page, the reported total,
    /// or a page that adds nothing new.
    async fn paginate(&self, listing: Listing<'_>) -> Result<(Vec<RawNote>, u32)> {
        let limit = self.page_size;
        let mut offset: u32 = 0;
        let mut retries: u32 = 0;
        let mut seen = HashSet::new();
        let mut notes = Vec::new();

        loop {
            let page = self.page_with_retry(listing, offset, limit).await?;
            retries += page.retries;

            let received = page.notes.len();
            let before = notes.len();
            for note in page.notes {
                if seen.insert(note.id.clone()) {
                    notes.push(note);
                }
            }
            offset = offset.saturating_add(received as u32);

            if received == 0 || received < limit as usize {
                break;
            }
            if page.total.is_some_and(|total| u64::from(offset) >= total) {
                break;
            }
            if notes.len() == before {
                warn!(offset, "page repeated earlier notes, stopping pagination");
                break;
            }
        }

        Ok((notes, retries))
    }

    async fn page_with_retry(
        &self,
        listing: Listing<'_>,
        offset: u32,
        limit: u32,
    ) -> Result<NotePage> {
        let mut attempt: u32 = 0;
        loop {
            let result = match listing {
                Listing::Submissions => self.source.list_submissions(offset, limit).await,
                Listing::Forum(forum) => self.source.list_forum_notes(forum, offset, limit).await,
            };
            match result {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.page_retries => {
                    attempt += 1;
                    warn!(offset, attempt, error = %e, "page failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Attachment helpers
// ---------------------------------------------------------------------------

fn references_pdf(note: &RawNote) -> bool {
    note.text("pdf").is_some_and(|p| !p.trim().is_empty())
}

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Checksum the submission declares for its PDF, if any.
///
/// Looks at `pdf_sha256`/`pdf_checksum` first, then at a 64-hex file stem
/// in the `pdf` path.
pub fn declared_checksum(note: &RawNote) -> Option<String> {
    for key in ["pdf_sha256", "pdf_checksum"] {
        if let Some(value) = note.text(key) {
            let value = value.trim().trim_start_matches("sha256:").to_ascii_lowercase();
            if is_sha256_hex(&value) {
                return Some(value);
            }
        }
    }

    let path = note.text("pdf")?;
    let stem = Path::new(path).file_stem()?.to_str()?;
    is_sha256_hex(stem).then(|| stem.to_ascii_lowercase())
}

fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Write to a temp file in `dir`, then rename over `path`.
async fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ReviewCrawlError::io(dir, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment");
    let tmp = dir.join(format!(".{file_name}.part"));

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| ReviewCrawlError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ReviewCrawlError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reviewcrawl_shared::{ProtocolVersion, Venue};
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn note(id: &str, forum: &str, content: serde_json::Value) -> RawNote {
        RawNote {
            id: id.into(),
            forum: ForumHandle::new(forum),
            replyto: (id != forum).then(|| forum.to_string()),
            invitations: vec![],
            signatures: vec![],
            readers: vec!["everyone".into()],
            content: serde_json::from_value(content).unwrap(),
            number: None,
            created_ms: Some(1),
            modified_ms: None,
            protocol: ProtocolVersion::V2,
        }
    }

    /// In-memory source with optional failure injection.
    struct ScriptedSource {
        notes: Vec<RawNote>,
        total: Option<u64>,
        /// Ignore `offset` and always serve the first page.
        stuck: bool,
        transient_failures: AtomicU32,
        permanent: bool,
        pdf: Vec<u8>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(notes: Vec<RawNote>) -> Self {
            Self {
                notes,
                total: None,
                stuck: false,
                transient_failures: AtomicU32::new(0),
                permanent: false,
                pdf: b"%PDF-1.7 test".to_vec(),
                calls: AtomicU32::new(0),
            }
        }

        fn page(&self, offset: u32, limit: u32) -> Result<NotePage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(ReviewCrawlError::PermanentFetchFailure {
                    url: "mock".into(),
                    status: Some(403),
                    message: "forbidden".into(),
                });
            }
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ReviewCrawlError::TransientFetchFailure {
                    url: "mock".into(),
                    attempts: 3,
                    message: "HTTP 503".into(),
                });
            }
            let start = if self.stuck { 0 } else { offset as usize };
            let notes = self
                .notes
                .iter()
                .skip(start)
                .take(limit as usize)
                .cloned()
                .collect();
            Ok(NotePage {
                notes,
                total: self.total,
                retries: 0,
            })
        }
    }

    #[async_trait]
    impl NoteSource for ScriptedSource {
        fn version(&self) -> ProtocolVersion {
            ProtocolVersion::V2
        }

        async fn list_submissions(&self, offset: u32, limit: u32) -> Result<NotePage> {
            self.page(offset, limit)
        }

        async fn list_forum_notes(
            &self,
            _forum: &ForumHandle,
            offset: u32,
            limit: u32,
        ) -> Result<NotePage> {
            self.page(offset, limit)
        }

        async fn get_note(&self, id: &str) -> Result<Option<RawNote>> {
            Ok(Some(note(id, id, serde_json::json!({"title": {"value": "Direct"}}))))
        }

        async fn fetch_pdf(&self, _forum: &ForumHandle) -> Result<Vec<u8>> {
            Ok(self.pdf.clone())
        }
    }

    fn forum_notes(count: usize) -> Vec<RawNote> {
        let mut notes = vec![note("f1", "f1", serde_json::json!({"title": {"value": "T"}}))];
        for i in 1..count {
            notes.push(note(&format!("r{i}"), "f1", serde_json::json!({})));
        }
        notes
    }

    #[tokio::test]
    async fn partial_page_ends_pagination_despite_inflated_total() {
        let mut source = ScriptedSource::new(forum_notes(5));
        source.total = Some(1000);
        let source = Arc::new(source);
        let fetcher = ForumFetcher::new(source.clone(), 2, 0);

        let bundle = fetcher.fetch_notes(&ForumHandle::new("f1")).await.unwrap();
        assert_eq!(bundle.note_count(), 5);
        assert_eq!(bundle.submission.id, "f1");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_page_ends_pagination() {
        let source = Arc::new(ScriptedSource::new(forum_notes(4)));
        let fetcher = ForumFetcher::new(source.clone(), 2, 0);

        let bundle = fetcher.fetch_notes(&ForumHandle::new("f1")).await.unwrap();
        assert_eq!(bundle.note_count(), 4);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reported_total_ends_pagination() {
        let mut source = ScriptedSource::new(forum_notes(4));
        source.total = Some(4);
        let source = Arc::new(source);
        let fetcher = ForumFetcher::new(source.clone(), 2, 0);

        fetcher.fetch_notes(&ForumHandle::new("f1")).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_pages_do_not_loop() {
        let mut source = ScriptedSource::new(forum_notes(6));
        source.stuck = true;
        let source = Arc::new(source);
        let fetcher = ForumFetcher::new(source.clone(), 2, 0);

        let bundle = fetcher.fetch_notes(&ForumHandle::new("f1")).await.unwrap();
        assert_eq!(bundle.note_count(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_page_failure_is_retried() {
        let source = ScriptedSource::new(forum_notes(3));
        source.transient_failures.store(1, Ordering::SeqCst);
        let fetcher = ForumFetcher::new(Arc::new(source), 10, 1);

        let bundle = fetcher.fetch_notes(&ForumHandle::new("f1")).await.unwrap();
        assert_eq!(bundle.note_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_page_retries_fail_the_forum() {
        let source = ScriptedSource::new(forum_notes(3));
        source.transient_failures.store(2, Ordering::SeqCst);
        let fetcher = ForumFetcher::new(Arc::new(source), 10, 1);

        let err = fetcher.fetch_notes(&ForumHandle::new("f1")).await.unwrap_err();
        assert!(matches!(err, ReviewCrawlError::ForumFetchFailed { ref forum, .. } if forum == "f1"));
    }

    #[tokio::test]
    async fn permanent_failure_fails_the_forum() {
        let mut source = ScriptedSource::new(forum_notes(3));
        source.permanent = true;
        let source = Arc::new(source);
        let fetcher = ForumFetcher::new(source.clone(), 10, 3);

        let err = fetcher.fetch_notes(&ForumHandle::new("f1")).await.unwrap_err();
        assert!(matches!(err, ReviewCrawlError::ForumFetchFailed { .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_submission_is_fetched_directly() {
        let notes = vec![note("r1", "f1", serde_json::json!({}))];
        let fetcher = ForumFetcher::new(Arc::new(ScriptedSource::new(notes)), 10, 0);

        let bundle = fetcher.fetch_notes(&ForumHandle::new("f1")).await.unwrap();
        assert_eq!(bundle.submission.text("title"), Some("Direct"));
        assert_eq!(bundle.children.len(), 1);
    }

    #[tokio::test]
    async fn submissions_are_deduplicated() {
        let notes = vec![
            note("f1", "f1", serde_json::json!({})),
            note("f2", "f2", serde_json::json!({})),
            note("f1", "f1", serde_json::json!({})),
        ];
        let fetcher = ForumFetcher::new(Arc::new(ScriptedSource::new(notes)), 10, 0);

        let listed = fetcher.list_submissions().await.unwrap();
        let ids: Vec<_> = listed.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2"]);
    }

    fn pdf_fixture(declared: Option<&str>) -> (ForumFetcher, PathBuf, ForumBundle) {
        let source = ScriptedSource::new(vec![]);
        let mut content = serde_json::json!({"title": {"value": "T"}, "pdf": {"value": "/pdf/abc.pdf"}});
        if let Some(hash) = declared {
            content["pdf_sha256"] = serde_json::json!({"value": hash});
        }
        let dir = std::env::temp_dir().join(format!("rc_pdfs_{}", Uuid::now_v7()));
        let fetcher =
            ForumFetcher::new(Arc::new(source), 10, 0).with_attachments_dir(Some(dir.clone()));
        let bundle = ForumBundle {
            forum: ForumHandle::new("f1"),
            submission: note("f1", "f1", content),
            children: vec![],
            attachment: None,
            retries: 0,
        };
        (fetcher, dir, bundle)
    }

    #[tokio::test]
    async fn verified_attachment_is_written() {
        let expected = sha256_hex(b"%PDF-1.7 test");
        let (fetcher, dir, mut bundle) = pdf_fixture(Some(&expected));

        fetcher.attach_pdf(&mut bundle).await.unwrap();
        let attachment = bundle.attachment.expect("attachment");
        assert!(attachment.checksum_verified);
        assert_eq!(attachment.path, dir.join("f1.pdf"));
        assert_eq!(std::fs::read(&attachment.path).unwrap(), b"%PDF-1.7 test");
    }

    #[tokio::test]
    async fn checksum_mismatch_leaves_attachment_absent() {
        let wrong = "0".repeat(64);
        let (fetcher, dir, mut bundle) = pdf_fixture(Some(&wrong));

        let err = fetcher.attach_pdf(&mut bundle).await.unwrap_err();
        assert!(matches!(err, ReviewCrawlError::AttachmentMismatch { .. }));
        assert!(bundle.attachment.is_none());
        assert!(!dir.join("f1.pdf").exists());
    }

    #[tokio::test]
    async fn no_directory_means_no_download() {
        let (_, _, mut bundle) = pdf_fixture(None);
        let fetcher = ForumFetcher::new(Arc::new(ScriptedSource::new(vec![])), 10, 0);
        fetcher.attach_pdf(&mut bundle).await.unwrap();
        assert!(bundle.attachment.is_none());
    }

    #[test]
    fn checksum_from_path_stem() {
        let hash = sha256_hex(b"x");
        let n = note("f1", "f1", serde_json::json!({"pdf": format!("/pdf/{hash}.pdf")}));
        assert_eq!(declared_checksum(&n), Some(hash));

        let sha1_named = note("f1", "f1", serde_json::json!({"pdf": "/pdf/0123456789abcdef0123456789abcdef01234567.pdf"}));
        assert_eq!(declared_checksum(&sha1_named), None);
    }

    #[tokio::test]
    async fn paginates_against_a_live_listing() {
        let server = wiremock::MockServer::start().await;
        let venue = Venue::new("ICLR", 2024);

        // Probe
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/v2/notes"))
            .and(wiremock::matchers::query_param("limit", "1"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "notes": [{"id": "f1", "content": {"title": {"value": "T"}}}]
            })))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/v2/notes"))
            .and(wiremock::matchers::query_param("forum", "f1"))
            .and(wiremock::matchers::query_param("offset", "0"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "notes": [
                    {"id": "f1", "forum": "f1", "content": {"title": {"value": "T"}}},
                    {"id": "r1", "forum": "f1", "replyto": "f1", "content": {}}
                ],
                "count": 3
            })))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/v2/notes"))
            .and(wiremock::matchers::query_param("forum", "f1"))
            .and(wiremock::matchers::query_param("offset", "2"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "notes": [{"id": "c1", "forum": "f1", "replyto": "r1", "content": {}}],
                "count": 3
            })))
            .mount(&server)
            .await;

        let endpoints = crate::protocol::Endpoints::new(
            &format!("{}/v2", server.uri()),
            &format!("{}/v1", server.uri()),
        )
        .unwrap();
        let source = crate::protocol::negotiate(
            &venue,
            None,
            &endpoints,
            crate::protocol::tests::test_dispatcher(),
        )
        .await
        .ok()
        .expect("negotiated");

        let fetcher = ForumFetcher::new(source, 2, 0);
        let bundle = fetcher.fetch_notes(&ForumHandle::new("f1")).await.unwrap();
        let ids: Vec<_> = bundle.notes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "r1", "c1"]);
    }

    #[tokio::test]
    async fn throttled_forum_listing_counts_retries() {
        use crate::dispatcher::{Dispatcher, RateBudget, RetryPolicy, build_client};

        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/v2/notes"))
            .and(wiremock::matchers::query_param("limit", "1"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "notes": [{"id": "f1", "content": {"title": {"value": "T"}}}]
            })))
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/v2/notes"))
            .and(wiremock::matchers::query_param("forum", "f1"))
            .respond_with(wiremock::ResponseTemplate::new(429))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/v2/notes"))
            .and(wiremock::matchers::query_param("forum", "f1"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "notes": [
                    {"id": "f1", "forum": "f1", "content": {"title": {"value": "T"}}},
                    {"id": "r1", "forum": "f1", "replyto": "f1", "content": {}}
                ],
                "count": 2
            })))
            .mount(&server)
            .await;

        let dispatcher = Arc::new(Dispatcher::new(
            build_client(5).expect("client"),
            RateBudget::new(1000.0, 50).expect("budget"),
            RetryPolicy {
                max_retries: 5,
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(2),
            },
        ));
        let endpoints = crate::protocol::Endpoints::new(
            &format!("{}/v2", server.uri()),
            &format!("{}/v1", server.uri()),
        )
        .unwrap();
        let source = crate::protocol::negotiate(
            &Venue::new("ICLR", 2024),
            None,
            &endpoints,
            dispatcher.clone(),
        )
        .await
        .ok()
        .expect("negotiated");

        let fetcher = ForumFetcher::new(source, 50, 0);
        let bundle = fetcher.fetch(&ForumHandle::new("f1")).await.unwrap();
        assert_eq!(bundle.retries, 3);
        assert_eq!(bundle.note_count(), 2);
        assert!(bundle.attachment.is_none());
        assert_eq!(dispatcher.total_retries(), 3);
    }
}
