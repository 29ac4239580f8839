//! libSQL storage for forum fingerprints (offline mode).
//!
//! The [`Storage`] struct wraps a local libSQL database holding one
//! [`FingerprintEntry`] per `(venue_id, forum)`. Every write is a single
//! upsert statement, so an interrupted run never leaves a half-written entry.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use reviewcrawl_shared::{FingerprintEntry, ForumHandle, Result, ReviewCrawlError};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

fn storage_err(e: impl std::fmt::Display) -> ReviewCrawlError {
    ReviewCrawlError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReviewCrawlError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ReviewCrawlError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Fingerprint operations
    // -----------------------------------------------------------------------

    /// Stored fingerprint for one forum, if any.
    pub async fn get_fingerprint(
        &self,
        venue_id: &str,
        forum: &ForumHandle,
    ) -> Result<Option<FingerprintEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT venue_id, forum, content_hash, note_count, last_seen
                 FROM fingerprints WHERE venue_id = ?1 AND forum = ?2",
                params![venue_id, forum.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_fingerprint(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Insert or replace a forum's fingerprint.
    pub async fn upsert_fingerprint(&self, entry: &FingerprintEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO fingerprints (venue_id, forum, content_hash, note_count, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(venue_id, forum) DO UPDATE SET
                   content_hash = excluded.content_hash,
                   note_count = excluded.note_count,
                   last_seen = excluded.last_seen",
                params![
                    entry.venue_id.as_str(),
                    entry.forum.as_str(),
                    entry.content_hash.as_str(),
                    entry.note_count as i64,
                    entry.last_seen.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// All fingerprints stored for a venue, ordered by forum.
    pub async fn list_fingerprints(&self, venue_id: &str) -> Result<Vec<FingerprintEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT venue_id, forum, content_hash, note_count, last_seen
                 FROM fingerprints WHERE venue_id = ?1 ORDER BY forum",
                params![venue_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_fingerprint(&row)?);
        }
        Ok(results)
    }

    /// Delete every fingerprint of a venue. Returns the number of rows removed.
    pub async fn delete_fingerprints(&self, venue_id: &str) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM fingerprints WHERE venue_id = ?1",
                params![venue_id],
            )
            .await
            .map_err(storage_err)?;
        tracing::info!(venue_id, removed, "cleared fingerprints");
        Ok(removed)
    }
}

/// Convert a database row to a [`FingerprintEntry`].
fn row_to_fingerprint(row: &libsql::Row) -> Result<FingerprintEntry> {
    let last_seen: String = row.get(4).map_err(storage_err)?;
    Ok(FingerprintEntry {
        venue_id: row.get::<String>(0).map_err(storage_err)?,
        forum: ForumHandle::new(row.get::<String>(1).map_err(storage_err)?),
        content_hash: row.get::<String>(2).map_err(storage_err)?,
        note_count: row.get::<i64>(3).map_err(storage_err)? as usize,
        last_seen: DateTime::parse_from_rfc3339(&last_seen)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ReviewCrawlError::Storage(format!("invalid date: {e}")))?,
    })
}
