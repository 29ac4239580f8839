//! SQL migration definitions for the fingerprint database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: fingerprints",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per forum, keyed by venue group id
CREATE TABLE IF NOT EXISTS fingerprints (
    venue_id     TEXT NOT NULL,
    forum        TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    note_count   INTEGER NOT NULL,
    last_seen    TEXT NOT NULL,
    PRIMARY KEY (venue_id, forum)
);

CREATE INDEX IF NOT EXISTS idx_fingerprints_venue ON fingerprints(venue_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
