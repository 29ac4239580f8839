//! Crawl engine: venue → negotiate → list forums → per-forum worker pool →
//! record stream.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use reviewcrawl_crawler::{Dispatcher, Endpoints, ForumFetcher, negotiate};
use reviewcrawl_shared::{
    CanonicalRecord, CrawlConfig, ForumHandle, ProtocolVersion, RawNote, RejectedNote, Result,
    ReviewCrawlError, Venue,
};
use reviewcrawl_storage::Storage;

use crate::classifier::Classifier;
use crate::fingerprint::{FingerprintCache, compute_fingerprint};
use crate::normalizer::{Normalizer, is_accepted};

// ---------------------------------------------------------------------------
// CrawlRun
// ---------------------------------------------------------------------------

/// Counters updated by workers while a run is in progress.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub fetched: AtomicUsize,
    pub skipped: AtomicUsize,
    pub rejected: AtomicUsize,
    pub failed: AtomicUsize,
    pub filtered: AtomicUsize,
    pub records: AtomicUsize,
    pub emitted: AtomicUsize,
    pub retries: AtomicU64,
    pub attachments_rejected: AtomicUsize,
}

/// One invocation of the engine against a venue. Not persisted.
#[derive(Debug, Clone)]
pub struct CrawlRun {
    pub id: Uuid,
    pub venue: Venue,
    /// Drop forums without an accepting decision.
    pub accepted_only: bool,
    /// Stop after this many forums have been emitted.
    pub max_papers: Option<usize>,
    /// Ignore stored fingerprints.
    pub force_refresh: bool,
    cancel: CancellationToken,
    counters: Arc<RunCounters>,
}

impl CrawlRun {
    pub fn new(venue: Venue) -> Self {
        Self {
            id: Uuid::now_v7(),
            venue,
            accepted_only: false,
            max_papers: None,
            force_refresh: false,
            cancel: CancellationToken::new(),
            counters: Arc::new(RunCounters::default()),
        }
    }

    pub fn accepted_only(mut self, yes: bool) -> Self {
        self.accepted_only = yes;
        self
    }

    pub fn max_papers(mut self, max: Option<usize>) -> Self {
        self.max_papers = max;
        self
    }

    pub fn force_refresh(mut self, yes: bool) -> Self {
        self.force_refresh = yes;
        self
    }

    /// Token that stops scheduling new forums when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }
}

/// Item on the output stream.
#[derive(Debug)]
pub enum CrawlEvent {
    Record(CanonicalRecord),
    Reject(RejectedNote),
    /// Sent after a forum's records and rejects. The consumer answers on
    /// `ack` once they are durable; the forum's fingerprint is only stored
    /// after that. Dropping `ack` leaves the forum to be redone next run.
    Flush {
        forum: ForumHandle,
        ack: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// Summary and progress
// ---------------------------------------------------------------------------

/// What happened to one forum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForumOutcome {
    Emitted { records: usize, rejects: usize },
    /// Fingerprint unchanged since the last run.
    Skipped,
    /// Removed by the accepted-only filter.
    Filtered,
    Failed(String),
    /// Not processed: cancelled, over the paper limit, or already in flight.
    Dropped,
}

/// Totals for a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub venue_id: String,
    pub protocol: ProtocolVersion,
    /// Forums listed for the venue.
    pub forums: usize,
    /// Forums whose notes changed and were processed.
    pub fetched: usize,
    pub skipped: usize,
    /// Forums whose records were emitted.
    pub emitted: usize,
    pub filtered: usize,
    pub failed: usize,
    /// Notes routed to the reject channel.
    pub rejected: usize,
    pub records: usize,
    pub retries: u64,
    pub attachments_rejected: usize,
    pub failed_forums: Vec<(ForumHandle, String)>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the forum list is known.
    fn forums_listed(&self, total: usize);
    /// Called as each forum finishes.
    fn forum_done(&self, forum: &ForumHandle, outcome: &ForumOutcome, completed: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn forums_listed(&self, _total: usize) {}
    fn forum_done(&self, _forum: &ForumHandle, _outcome: &ForumOutcome, _completed: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Everything a worker needs for one forum.
struct ForumContext {
    fetcher: Arc<ForumFetcher>,
    classifier: Arc<Classifier>,
    normalizer: Arc<Normalizer>,
    cache: Arc<FingerprintCache>,
    counters: Arc<RunCounters>,
    events: mpsc::Sender<CrawlEvent>,
    cancel: CancellationToken,
    accepted_only: bool,
    max_papers: Option<usize>,
}

/// Bounded worker pool over a venue's forums.
pub struct Engine {
    fetcher: Arc<ForumFetcher>,
    classifier: Arc<Classifier>,
    normalizer: Arc<Normalizer>,
    cache: Arc<FingerprintCache>,
    dispatcher: Option<Arc<Dispatcher>>,
    concurrency: usize,
}

impl Engine {
    pub fn new(
        fetcher: ForumFetcher,
        classifier: Classifier,
        normalizer: Normalizer,
        cache: FingerprintCache,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            classifier: Arc::new(classifier),
            normalizer: Arc::new(normalizer),
            cache: Arc::new(cache),
            dispatcher: None,
            concurrency: concurrency.max(1),
        }
    }

    /// Report the dispatcher's run-wide retry count in the summary.
    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Process every forum of `run.venue`, streaming events into `events`.
    ///
    /// Only a failure to list the venue's submissions aborts the run;
    /// forum and record failures are counted in the summary.
    #[instrument(skip_all, fields(run_id = %run.id, venue = %run.venue))]
    pub async fn run(
        &self,
        run: &CrawlRun,
        events: mpsc::Sender<CrawlEvent>,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let start = Instant::now();

        progress.phase("Listing submissions");
        let submissions = self.fetcher.list_submissions().await?;
        let mut seen = HashSet::new();
        let forums: Vec<ForumHandle> = submissions
            .into_iter()
            .map(|n| n.forum)
            .filter(|f| seen.insert(f.clone()))
            .collect();
        let total = forums.len();
        progress.forums_listed(total);

        info!(
            forums = total,
            concurrency = self.concurrency,
            accepted_only = run.accepted_only,
            max_papers = ?run.max_papers,
            force_refresh = run.force_refresh,
            "starting crawl"
        );

        let ctx = Arc::new(ForumContext {
            fetcher: self.fetcher.clone(),
            classifier: self.classifier.clone(),
            normalizer: self.normalizer.clone(),
            cache: self.cache.clone(),
            counters: run.counters.clone(),
            events,
            cancel: run.cancel.clone(),
            accepted_only: run.accepted_only,
            max_papers: run.max_papers,
        });

        progress.phase("Crawling forums");
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut completed = 0usize;
        let mut failed_forums = Vec::new();

        for forum in forums {
            let permit = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = process_forum(&ctx, &forum).await;
                (forum, outcome)
            });

            while let Some(joined) = tasks.try_join_next() {
                completed += 1;
                tally(joined, &run.counters, &mut failed_forums, progress, completed, total);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            tally(joined, &run.counters, &mut failed_forums, progress, completed, total);
        }
        drop(ctx);

        let counters = &run.counters;
        let retries = match &self.dispatcher {
            Some(dispatcher) => dispatcher.total_retries(),
            None => counters.retries.load(Ordering::Relaxed),
        };
        let summary = RunSummary {
            run_id: run.id,
            venue_id: run.venue.id(),
            protocol: self.fetcher.source().version(),
            forums: total,
            fetched: counters.fetched.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            emitted: counters.emitted.load(Ordering::Relaxed).min(run.max_papers.unwrap_or(usize::MAX)),
            filtered: counters.filtered.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            records: counters.records.load(Ordering::Relaxed),
            retries,
            attachments_rejected: counters.attachments_rejected.load(Ordering::Relaxed),
            failed_forums,
            cancelled: run.is_cancelled(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            fetched = summary.fetched,
            skipped = summary.skipped,
            emitted = summary.emitted,
            filtered = summary.filtered,
            failed = summary.failed,
            rejected = summary.rejected,
            records = summary.records,
            retries = summary.retries,
            elapsed_ms = summary.elapsed_ms,
            "crawl completed"
        );
        progress.done(&summary);
        Ok(summary)
    }
}

fn tally(
    joined: std::result::Result<(ForumHandle, ForumOutcome), tokio::task::JoinError>,
    counters: &RunCounters,
    failed_forums: &mut Vec<(ForumHandle, String)>,
    progress: &dyn ProgressReporter,
    completed: usize,
    total: usize,
) {
    match joined {
        Ok((forum, outcome)) => {
            if let ForumOutcome::Failed(reason) = &outcome {
                failed_forums.push((forum.clone(), reason.clone()));
            }
            progress.forum_done(&forum, &outcome, completed, total);
        }
        Err(e) => {
            warn!(error = %e, "forum worker panicked");
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ---------------------------------------------------------------------------
// Per-forum processing
// ---------------------------------------------------------------------------

/// claim → fetch → fingerprint → skip? → attach → classify → normalize →
/// filter → emit → flush → commit.
#[instrument(skip_all, fields(forum = %forum))]
async fn process_forum(ctx: &ForumContext, forum: &ForumHandle) -> ForumOutcome {
    let Some(_claim) = ctx.cache.claim(forum) else {
        debug!("forum already in flight");
        return ForumOutcome::Dropped;
    };
    if ctx.cancel.is_cancelled() {
        return ForumOutcome::Dropped;
    }

    let mut bundle = match ctx.fetcher.fetch_notes(forum).await {
        Ok(bundle) => bundle,
        Err(e) => {
            warn!(error = %e, "forum failed");
            ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
            return ForumOutcome::Failed(e.to_string());
        }
    };
    ctx.counters
        .retries
        .fetch_add(u64::from(bundle.retries), Ordering::Relaxed);

    let fingerprint = compute_fingerprint(bundle.notes());
    match ctx.cache.should_skip(forum, &fingerprint).await {
        Ok(true) => {
            debug!("unchanged since last run");
            ctx.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return ForumOutcome::Skipped;
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, "fingerprint lookup failed, processing anyway"),
    }
    ctx.counters.fetched.fetch_add(1, Ordering::Relaxed);

    if let Err(e) = ctx.fetcher.attach_pdf(&mut bundle).await {
        if matches!(e, ReviewCrawlError::AttachmentMismatch { .. }) {
            ctx.counters
                .attachments_rejected
                .fetch_add(1, Ordering::Relaxed);
        }
        warn!(error = %e, "attachment dropped");
    }

    // Submission first, then replies by creation time.
    bundle.children.sort_by(|a, b| {
        (a.created_ms.unwrap_or(i64::MAX), &a.id).cmp(&(b.created_ms.unwrap_or(i64::MAX), &b.id))
    });

    let mut events = Vec::with_capacity(bundle.note_count());
    let mut decision: Option<bool> = None;
    for note in bundle.notes() {
        let kind = ctx.classifier.classify(note);
        match ctx.normalizer.normalize(note, kind) {
            Ok(mut record) => {
                match &mut record {
                    CanonicalRecord::Decision(d) => decision = Some(d.accepted),
                    CanonicalRecord::Paper(p) => {
                        if let Some(value) = bundle
                            .attachment
                            .as_ref()
                            .and_then(|a| serde_json::to_value(a).ok())
                        {
                            p.enrichment.insert("attachment".into(), value);
                        }
                    }
                    _ => {}
                }
                events.push(CrawlEvent::Record(record));
            }
            Err(error) => {
                debug!(note = %note.id, %kind, %error, "note rejected");
                events.push(CrawlEvent::Reject(RejectedNote {
                    note: note.clone(),
                    attempted: kind,
                    error,
                }));
            }
        }
    }

    if ctx.accepted_only && !forum_accepted(decision, &bundle.submission) {
        debug!("not accepted, filtered");
        ctx.counters.filtered.fetch_add(1, Ordering::Relaxed);
        return ForumOutcome::Filtered;
    }

    // Reserve an output slot so the paper limit is never exceeded.
    let slot = ctx.counters.emitted.fetch_add(1, Ordering::SeqCst);
    if let Some(max) = ctx.max_papers {
        if slot >= max {
            ctx.cancel.cancel();
            return ForumOutcome::Dropped;
        }
    }

    let (mut records, mut rejects) = (0, 0);
    for event in events {
        match &event {
            CrawlEvent::Record(_) => records += 1,
            CrawlEvent::Reject(_) => rejects += 1,
            CrawlEvent::Flush { .. } => {}
        }
        if ctx.events.send(event).await.is_err() {
            warn!("record stream closed, cancelling run");
            ctx.cancel.cancel();
            return unpersisted(ctx, "record stream closed");
        }
    }

    let (ack, persisted) = oneshot::channel();
    let flush = CrawlEvent::Flush {
        forum: forum.clone(),
        ack,
    };
    if ctx.events.send(flush).await.is_err() {
        warn!("record stream closed, cancelling run");
        ctx.cancel.cancel();
        return unpersisted(ctx, "record stream closed");
    }
    if persisted.await.is_err() {
        warn!("output was not persisted, leaving forum uncommitted");
        return unpersisted(ctx, "output was not persisted");
    }
    ctx.counters.records.fetch_add(records, Ordering::Relaxed);
    ctx.counters.rejected.fetch_add(rejects, Ordering::Relaxed);

    if let Err(e) = ctx
        .cache
        .commit(forum, &fingerprint, bundle.note_count())
        .await
    {
        warn!(error = %e, "failed to store fingerprint");
    }

    if ctx.max_papers.is_some_and(|max| slot + 1 >= max) {
        info!(max_papers = ?ctx.max_papers, "paper limit reached, stopping");
        ctx.cancel.cancel();
    }

    ForumOutcome::Emitted { records, rejects }
}

/// Give back the forum's output slot and count it as failed.
fn unpersisted(ctx: &ForumContext, reason: &str) -> ForumOutcome {
    ctx.counters.emitted.fetch_sub(1, Ordering::SeqCst);
    ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
    ForumOutcome::Failed(reason.into())
}

/// Acceptance from the decision note, else from the submission's venue label
/// (`"ICLR 2024 poster"` vs `"Submitted to ICLR 2024"`).
fn forum_accepted(decision: Option<bool>, submission: &RawNote) -> bool {
    decision.unwrap_or_else(|| submission.text("venue").is_some_and(is_accepted))
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Negotiate the API generation for `run.venue` and crawl it.
///
/// `ProtocolUnavailable` and setup errors are returned; everything else is
/// contained in the summary.
#[instrument(skip_all, fields(venue = %run.venue))]
pub async fn crawl_venue(
    config: &CrawlConfig,
    run: &CrawlRun,
    storage: Arc<Storage>,
    events: mpsc::Sender<CrawlEvent>,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let dispatcher = Arc::new(Dispatcher::from_config(config)?);
    let endpoints = Endpoints::from_config(config)?;

    progress.phase("Negotiating API generation");
    let source = negotiate(
        &run.venue,
        config.credentials.as_ref(),
        &endpoints,
        dispatcher.clone(),
    )
    .await?;
    info!(protocol = %source.version(), "using API generation");

    let fetcher = ForumFetcher::from_config(source, config);
    let normalizer = Normalizer::new(&config.site_url, &config.classifier)
        .with_venue_label(format!("{} {}", run.venue.name, run.venue.year));
    let cache = FingerprintCache::new(storage, run.venue.id(), run.force_refresh);

    Engine::new(
        fetcher,
        Classifier::new(&config.classifier),
        normalizer,
        cache,
        config.concurrency as usize,
    )
    .with_dispatcher(dispatcher)
    .run(run, events, progress)
    .await
}
