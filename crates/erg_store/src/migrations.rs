//! Ordered, embedded schema migrations.
//!
//! Every store carries a `migrations` table recording which versions have been
//! applied. Reading migration status never mutates the schema; applying runs
//! each pending migration inside its own transaction that also records the
//! version, so a failure rolls the whole step back.
//!
//! Schema-declared metadata columns are *not* handled here — they are
//! materialized per datasource when a store is opened (see
//! [`crate::GenericStorage`]). Migrations cover the fixed part of the schema
//! only, which keeps the embedded SQL static.

use chrono::Utc;
use rusqlite::Connection;

use crate::util::format_time;
use crate::StorageError;

/// One embedded schema migration.
#[derive(Clone, Copy, Debug)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// The full migration history, ascending and gap-free.
///
/// The FTS index was originally kept in sync by triggers; bulk loads blew up
/// memory, so version 4 removes them and the application syncs the index
/// explicitly instead. FTS-shape changes rebuild the index in plain SQL (the
/// index only has fixed columns at migration time).
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: "\
CREATE TABLE blocks (
    id         TEXT PRIMARY KEY,
    text       TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMP NOT NULL,
    source     TEXT NOT NULL,
    datasource TEXT NOT NULL,
    metadata   TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX idx_blocks_created_at ON blocks (created_at DESC);
CREATE TABLE fetch_metadata (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL
);
CREATE VIRTUAL TABLE blocks_fts USING fts5(
    text, source, datasource, metadata,
    content='', contentless_delete=1
);
",
    },
    Migration {
        version: 2,
        name: "add_hostname",
        sql: "\
ALTER TABLE blocks ADD COLUMN hostname TEXT;
DROP TABLE blocks_fts;
CREATE VIRTUAL TABLE blocks_fts USING fts5(
    text, source, datasource, metadata, hostname,
    content='', contentless_delete=1
);
INSERT INTO blocks_fts (rowid, text, source, datasource, metadata, hostname)
    SELECT rowid, text, source, datasource, metadata, COALESCE(hostname, '')
    FROM blocks;
",
    },
    Migration {
        version: 3,
        name: "add_updated_at",
        sql: "\
ALTER TABLE blocks ADD COLUMN updated_at TIMESTAMP;
UPDATE blocks SET updated_at = created_at WHERE updated_at IS NULL;
",
    },
    Migration {
        version: 4,
        name: "drop_fts_sync_triggers",
        sql: "\
DROP TRIGGER IF EXISTS blocks_fts_insert;
DROP TRIGGER IF EXISTS blocks_fts_update;
DROP TRIGGER IF EXISTS blocks_fts_delete;
",
    },
];

/// Status of one store relative to the embedded migration list.
#[derive(Clone, Debug)]
pub struct MigrationStatus {
    pub applied: Vec<i64>,
    pub pending: Vec<Migration>,
}

impl MigrationStatus {
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// A store with no recorded versions at all: a brand-new file, to be
    /// bootstrapped rather than gated.
    pub fn is_bootstrap(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Applies the embedded migration list to one store.
#[derive(Clone, Copy)]
pub struct MigrationManager {
    migrations: &'static [Migration],
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationManager {
    pub fn new() -> Self {
        Self::with_migrations(MIGRATIONS)
    }

    /// A manager over a custom migration list. Test-oriented: lets a test
    /// apply a prefix of the history and then observe the pending gate.
    pub fn with_migrations(migrations: &'static [Migration]) -> Self {
        debug_assert!(
            migrations
                .windows(2)
                .all(|w| w[1].version == w[0].version + 1),
            "migration versions must be ascending and gap-free"
        );
        Self { migrations }
    }

    pub fn migrations(&self) -> &'static [Migration] {
        self.migrations
    }

    fn ensure_table(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS migrations (
                version    INTEGER PRIMARY KEY,
                applied_at TIMESTAMP NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Which versions are applied and which are still pending.
    ///
    /// Does not apply anything: calling this any number of times leaves the
    /// store's schema untouched (bookkeeping table aside).
    pub fn status(&self, conn: &Connection) -> Result<MigrationStatus, StorageError> {
        Self::ensure_table(conn)?;

        let mut stmt = conn.prepare("SELECT version FROM migrations ORDER BY version")?;
        let applied: Vec<i64> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        let pending = self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .copied()
            .collect();

        Ok(MigrationStatus { applied, pending })
    }

    /// Apply every pending migration, ascending. Returns how many ran.
    ///
    /// Each migration executes inside a transaction that also records its
    /// version, so a failing migration leaves no partial schema behind.
    pub fn apply_pending(&self, conn: &mut Connection) -> Result<usize, StorageError> {
        let pending = self.status(conn)?.pending;

        for migration in &pending {
            let tx = conn.transaction()?;
            tx.execute_batch(migration.sql)?;
            tx.execute(
                "INSERT INTO migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![migration.version, format_time(Utc::now())],
            )?;
            tx.commit()?;
            erg_log::info!(
                version = migration.version,
                name = migration.name,
                "applied migration"
            );
        }

        Ok(pending.len())
    }
}
