//! JSONL output for a crawl: one file for records, one for rejects.
//!
//! Both files accumulate across runs. A forum's lines are written together
//! when the engine flushes it, and once the stream closes each file is
//! compacted so that every forum keeps only its latest lines.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use reviewcrawl_core::CrawlEvent;
use reviewcrawl_shared::{ForumHandle, Venue};

/// Lines written by a [`JsonlSink`] during one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SinkStats {
    pub records: usize,
    pub rejects: usize,
}

/// Appends events to `<venue>_<year>_records.jsonl` and
/// `<venue>_<year>_rejects.jsonl`, keeping earlier runs' lines for forums
/// that are not reprocessed.
pub(crate) struct JsonlSink {
    records: JsonlFile,
    rejects: JsonlFile,
    /// Serialized lines of forums whose flush has not arrived yet.
    pending: HashMap<ForumHandle, Pending>,
    /// Forums written by this run.
    rewritten: HashSet<String>,
    stats: SinkStats,
}

#[derive(Default)]
struct Pending {
    records: Vec<u8>,
    rejects: Vec<u8>,
    record_count: usize,
    reject_count: usize,
}

impl JsonlSink {
    /// Open (or create) both files under `dir` for appending.
    pub async fn create(dir: &Path, venue: &Venue) -> Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .wrap_err_with(|| format!("creating {}", dir.display()))?;

        let slug = venue.slug();
        Ok(Self {
            records: JsonlFile::open(dir.join(format!("{slug}_records.jsonl")), "/forum").await?,
            rejects: JsonlFile::open(dir.join(format!("{slug}_rejects.jsonl")), "/note/forum")
                .await?,
            pending: HashMap::new(),
            rewritten: HashSet::new(),
            stats: SinkStats::default(),
        })
    }

    pub fn records_path(&self) -> &Path {
        &self.records.path
    }

    pub fn rejects_path(&self) -> &Path {
        &self.rejects.path
    }

    /// Buffer a record or reject under its forum. A flush writes and syncs
    /// the forum's lines, then acknowledges.
    pub async fn write(&mut self, event: CrawlEvent) -> Result<()> {
        match event {
            CrawlEvent::Record(record) => {
                let pending = self.pending.entry(record.forum().clone()).or_default();
                push_line(&mut pending.records, &record)?;
                pending.record_count += 1;
            }
            CrawlEvent::Reject(reject) => {
                let pending = self.pending.entry(reject.note.forum.clone()).or_default();
                push_line(&mut pending.rejects, &reject)?;
                pending.reject_count += 1;
            }
            CrawlEvent::Flush { forum, ack } => {
                self.persist(&forum).await?;
                let _ = ack.send(());
            }
        }
        Ok(())
    }

    /// Write every event until the sender side closes, then compact.
    ///
    /// Lines still waiting for a flush are written too; their forum was
    /// never committed and is redone on the next run.
    pub async fn drain(mut self, mut events: mpsc::Receiver<CrawlEvent>) -> Result<SinkStats> {
        while let Some(event) = events.recv().await {
            self.write(event).await?;
        }

        let mut unflushed: Vec<ForumHandle> = self.pending.keys().cloned().collect();
        unflushed.sort();
        for forum in unflushed {
            warn!(forum = %forum, "stream closed before the forum was flushed");
            self.persist(&forum).await?;
        }

        let Self {
            records,
            rejects,
            rewritten,
            stats,
            ..
        } = self;
        records.compact(&rewritten).await?;
        rejects.compact(&rewritten).await?;
        Ok(stats)
    }

    async fn persist(&mut self, forum: &ForumHandle) -> Result<()> {
        let pending = self.pending.remove(forum).unwrap_or_default();
        self.records.append(&pending.records).await?;
        self.rejects.append(&pending.rejects).await?;
        self.records.sync().await?;
        self.rejects.sync().await?;

        self.stats.records += pending.record_count;
        self.stats.rejects += pending.reject_count;
        self.rewritten.insert(forum.to_string());
        debug!(
            forum = %forum,
            records = pending.record_count,
            rejects = pending.reject_count,
            "forum persisted"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// One append-only JSONL file.
struct JsonlFile {
    path: PathBuf,
    /// Length when opened: everything after it was written by this run.
    start: u64,
    /// JSON pointer to the forum id of a line.
    forum_at: &'static str,
    out: BufWriter<File>,
    dirty: bool,
}

impl JsonlFile {
    async fn open(path: PathBuf, forum_at: &'static str) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .wrap_err_with(|| format!("opening {}", path.display()))?;
        let start = file.metadata().await?.len();
        Ok(Self {
            path,
            start,
            forum_at,
            out: BufWriter::new(file),
            dirty: false,
        })
    }

    async fn append(&mut self, lines: &[u8]) -> Result<()> {
        if !lines.is_empty() {
            self.out.write_all(lines).await?;
            self.dirty = true;
        }
        Ok(())
    }

    async fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.out.flush().await?;
        self.out
            .get_ref()
            .sync_data()
            .await
            .wrap_err_with(|| format!("syncing {}", self.path.display()))?;
        self.dirty = false;
        Ok(())
    }

    /// Rewrite the file with this run's lines, preceded by the earlier lines
    /// of forums this run did not write.
    async fn compact(mut self, rewritten: &HashSet<String>) -> Result<()> {
        self.sync().await?;
        drop(self.out);

        let content = tokio::fs::read(&self.path)
            .await
            .wrap_err_with(|| format!("reading {}", self.path.display()))?;
        let split = usize::try_from(self.start)
            .unwrap_or(usize::MAX)
            .min(content.len());
        let (earlier, current) = content.split_at(split);

        let kept = retained(earlier, self.forum_at, rewritten);
        let mut out = Vec::with_capacity(content.len());
        for line in &kept {
            out.extend_from_slice(line);
            out.push(b'\n');
        }
        out.extend_from_slice(current);
        if out == content {
            return Ok(());
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, &out)
            .await
            .wrap_err_with(|| format!("writing {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).wrap_err_with(|| format!("replacing {}", self.path.display()));
        }
        debug!(
            path = %self.path.display(),
            kept = kept.len(),
            "compacted output"
        );
        Ok(())
    }
}

/// Earlier lines worth keeping: for every forum not in `rewritten`, its last
/// contiguous batch. An interrupted run can leave a forum written twice; the
/// later batch wins. Unreadable lines are dropped.
fn retained<'a>(earlier: &'a [u8], forum_at: &str, rewritten: &HashSet<String>) -> Vec<&'a [u8]> {
    let mut lines: Vec<(Option<String>, &'a [u8])> = Vec::new();
    for line in earlier.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
        match serde_json::from_slice::<serde_json::Value>(line) {
            Ok(value) => {
                let forum = value
                    .pointer(forum_at)
                    .and_then(|f| f.as_str())
                    .map(str::to_string);
                lines.push((forum, line));
            }
            Err(e) => warn!(error = %e, "dropping unreadable output line"),
        }
    }

    let mut batches = Vec::with_capacity(lines.len());
    let mut latest: HashMap<&str, usize> = HashMap::new();
    let mut batch = 0usize;
    for (i, (forum, _)) in lines.iter().enumerate() {
        if i > 0 && lines[i - 1].0 != *forum {
            batch += 1;
        }
        batches.push(batch);
        if let Some(forum) = forum {
            latest.insert(forum.as_str(), batch);
        }
    }

    lines
        .iter()
        .zip(batches)
        .filter(|((forum, _), batch)| match forum {
            Some(forum) => {
                !rewritten.contains(forum) && latest.get(forum.as_str()) == Some(batch)
            }
            None => true,
        })
        .map(|((_, line), _)| *line)
        .collect()
}

fn push_line<T: Serialize>(buf: &mut Vec<u8>, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *buf, value)?;
    buf.push(b'\n');
    Ok(())
}
