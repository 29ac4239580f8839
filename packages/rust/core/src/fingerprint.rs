//! Fingerprint cache: skips forums whose notes have not changed since the
//! last successful run.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use reviewcrawl_shared::{FingerprintEntry, ForumHandle, RawNote, Result};
use reviewcrawl_storage::Storage;

/// SHA-256 over the sorted `id:revision_ms` lines of a forum's notes.
///
/// Independent of listing order; changes whenever a note is added, removed
/// or edited.
pub fn compute_fingerprint<'a>(notes: impl IntoIterator<Item = &'a RawNote>) -> String {
    let mut lines: Vec<String> = notes
        .into_iter()
        .map(|n| format!("{}:{}", n.id, n.revision_ms()))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

type InFlight = Arc<Mutex<HashSet<ForumHandle>>>;

fn lock(set: &InFlight) -> MutexGuard<'_, HashSet<ForumHandle>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive right to process one forum. Released on drop.
#[derive(Debug)]
pub struct ForumClaim {
    forum: ForumHandle,
    in_flight: InFlight,
}

impl ForumClaim {
    pub fn forum(&self) -> &ForumHandle {
        &self.forum
    }
}

impl Drop for ForumClaim {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.forum);
    }
}

/// Per-venue view over the fingerprint store.
pub struct FingerprintCache {
    storage: Arc<Storage>,
    venue_id: String,
    force_refresh: bool,
    in_flight: InFlight,
}

impl FingerprintCache {
    pub fn new(storage: Arc<Storage>, venue_id: impl Into<String>, force_refresh: bool) -> Self {
        Self {
            storage,
            venue_id: venue_id.into(),
            force_refresh,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Claim `forum` for processing. `None` if it is already in flight.
    pub fn claim(&self, forum: &ForumHandle) -> Option<ForumClaim> {
        let mut set = lock(&self.in_flight);
        if !set.insert(forum.clone()) {
            return None;
        }
        Some(ForumClaim {
            forum: forum.clone(),
            in_flight: self.in_flight.clone(),
        })
    }

    /// Whether the stored fingerprint matches. Always false under force-refresh.
    pub async fn should_skip(&self, forum: &ForumHandle, fingerprint: &str) -> Result<bool> {
        if self.force_refresh {
            return Ok(false);
        }
        let stored = self.storage.get_fingerprint(&self.venue_id, forum).await?;
        let unchanged = stored.is_some_and(|entry| entry.content_hash == fingerprint);
        debug!(forum = %forum, unchanged, "fingerprint checked");
        Ok(unchanged)
    }

    /// Record a forum as processed. Call only after its records were emitted.
    pub async fn commit(
        &self,
        forum: &ForumHandle,
        fingerprint: &str,
        note_count: usize,
    ) -> Result<()> {
        self.storage
            .upsert_fingerprint(&FingerprintEntry {
                venue_id: self.venue_id.clone(),
                forum: forum.clone(),
                content_hash: fingerprint.to_string(),
                note_count,
                last_seen: Utc::now(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewcrawl_shared::ProtocolVersion;
    use uuid::Uuid;

    fn note(id: &str, modified: i64) -> RawNote {
        RawNote {
            id: id.into(),
            forum: ForumHandle::new("f1"),
            replyto: None,
            invitations: vec![],
            signatures: vec![],
            readers: vec![],
            content: Default::default(),
            number: None,
            created_ms: Some(1),
            modified_ms: Some(modified),
            protocol: ProtocolVersion::V2,
        }
    }

    async fn cache(force_refresh: bool) -> (FingerprintCache, Arc<Storage>) {
        let tmp = std::env::temp_dir().join(format!("rc_fp_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.expect("open test db"));
        (
            FingerprintCache::new(storage.clone(), "ICLR.cc/2024/Conference", force_refresh),
            storage,
        )
    }

    #[test]
    fn fingerprint_ignores_order() {
        let a = [note("f1", 1), note("r1", 2), note("r2", 3)];
        let b = [note("r2", 3), note("f1", 1), note("r1", 2)];
        assert_eq!(compute_fingerprint(&a), compute_fingerprint(&b));
        assert_eq!(compute_fingerprint(&a).len(), 64);
    }

    #[test]
    fn fingerprint_tracks_edits_and_additions() {
        let base = [note("f1", 1), note("r1", 2)];
        let edited = [note("f1", 1), note("r1", 5)];
        let added = [note("f1", 1), note("r1", 2), note("c1", 3)];
        let fp = compute_fingerprint(&base);
        assert_ne!(fp, compute_fingerprint(&edited));
        assert_ne!(fp, compute_fingerprint(&added));
    }

    #[tokio::test]
    async fn skip_after_commit() {
        let (cache, _) = cache(false).await;
        let forum = ForumHandle::new("f1");
        let fp = compute_fingerprint(&[note("f1", 1)]);

        assert!(!cache.should_skip(&forum, &fp).await.unwrap());
        cache.commit(&forum, &fp, 1).await.unwrap();
        assert!(cache.should_skip(&forum, &fp).await.unwrap());
        assert!(!cache.should_skip(&forum, "different").await.unwrap());
    }

    #[tokio::test]
    async fn force_refresh_never_skips() {
        let (cache, storage) = cache(true).await;
        let forum = ForumHandle::new("f1");
        cache.commit(&forum, "fp", 1).await.unwrap();

        assert!(!cache.should_skip(&forum, "fp").await.unwrap());
        let stored = storage
            .get_fingerprint("ICLR.cc/2024/Conference", &forum)
            .await
            .unwrap();
        assert_eq!(stored.map(|e| e.note_count), Some(1));
    }

    #[tokio::test]
    async fn claims_are_exclusive_until_dropped() {
        let (cache, _) = cache(false).await;
        let forum = ForumHandle::new("f1");

        let claim = cache.claim(&forum).expect("first claim");
        assert_eq!(claim.forum(), &forum);
        assert!(cache.claim(&forum).is_none());
        assert!(cache.claim(&ForumHandle::new("f2")).is_some());

        drop(claim);
        assert!(cache.claim(&forum).is_some());
    }
}
