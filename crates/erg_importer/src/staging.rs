use std::collections::BTreeMap;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

use erg_types::GenericBlock;

use crate::ImportError;

/// The staging table: blocks waiting to be pulled into their native stores.
///
/// Rows are keyed by a fresh staging id (the producer's block id is inside
/// `block_data` and only has to be unique within its target), and carry the
/// target datasource name for routing and stats.
pub struct StagingStore {
    conn: Mutex<Connection>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StagingStats {
    pub staged: u64,
    pub per_target: BTreeMap<String, u64>,
}

impl StagingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImportError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 30_000)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS importer_blocks (
                id                TEXT PRIMARY KEY,
                target_datasource TEXT NOT NULL,
                block_data        TEXT NOT NULL,
                created_at        TIMESTAMP NOT NULL,
                imported_at       TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_importer_blocks_target
                ON importer_blocks (target_datasource);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Stage one block under a freshly generated key. The block's `source`
    /// names the *target* datasource it should eventually land in.
    pub fn stage(&self, block: &GenericBlock) -> Result<String, ImportError> {
        let staging_id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO importer_blocks \
             (id, target_datasource, block_data, created_at, imported_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                staging_id,
                block.source,
                serde_json::to_string(block)?,
                block
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Nanos, true),
                Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;
        Ok(staging_id)
    }

    /// Return every staged block and delete them, atomically: a crash either
    /// leaves all rows staged or hands them all out, never both.
    pub fn export_all(&self) -> Result<Vec<GenericBlock>, ImportError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut blocks = Vec::new();
        {
            let mut stmt =
                tx.prepare("SELECT block_data FROM importer_blocks ORDER BY imported_at, id")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let data: String = row.get(0)?;
                match serde_json::from_str::<GenericBlock>(&data) {
                    Ok(block) => blocks.push(block),
                    Err(err) => {
                        // Undecodable rows are dropped with the batch rather
                        // than wedging the export forever.
                        erg_log::warn!(%err, "discarding undecodable staged block");
                    }
                }
            }
        }
        tx.execute("DELETE FROM importer_blocks", [])?;
        tx.commit()?;

        Ok(blocks)
    }

    pub fn stats(&self) -> Result<StagingStats, ImportError> {
        let conn = self.conn.lock();
        let staged: i64 =
            conn.query_row("SELECT COUNT(*) FROM importer_blocks", [], |r| r.get(0))?;

        let mut per_target = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT target_datasource, COUNT(*) FROM importer_blocks GROUP BY target_datasource",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            per_target.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64);
        }

        Ok(StagingStats {
            staged: staged as u64,
            per_target,
        })
    }
}
