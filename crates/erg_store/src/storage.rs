//! One embedded store per datasource instance.
//!
//! The FTS index is contentless and synced by the application: an explicit
//! insert per stored block, an explicit delete-then-insert per upsert, and
//! [`GenericStorage::fts_rebuild`] to recover from a desync. There are no
//! triggers; they were removed after bulk loads blew up memory (see the
//! migration history in [`crate::migrations`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Transaction};

use erg_types::{Block, BlockFactory, BlockSchema, GenericBlock, GenericBlockFactory, Value};

use crate::migrations::MigrationManager;
use crate::util::{format_time, parse_time, process_hostname};
use crate::{QueryError, StorageError};

/// Store columns every block row carries, in storage order.
const FIXED_FTS_COLUMNS: &[&str] = &["text", "source", "datasource", "metadata", "hostname"];

const SELECT_BLOCK_COLUMNS: &str = "id, text, created_at, source, datasource, metadata, hostname";

/// A single-store query, as issued by the search planner.
#[derive(Clone, Debug, Default)]
pub struct StoreQuery {
    /// FTS query string, passed to the engine verbatim. `None` or blank scans
    /// the base table instead.
    pub text: Option<String>,

    /// Inclusive `created_at` window.
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,

    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub total_blocks: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

// SQL strings depend on the datasource schema; build them once at open.
struct Statements {
    insert_block: String,
    update_block: String,
    select_existing: String,
    fts_delete: String,
    fts_insert: String,
    fts_repopulate: String,

    /// Schema-declared metadata columns, in deterministic order.
    extra_columns: Vec<(String, erg_types::ColumnType)>,

    /// Schema columns mirrored into the FTS index (text columns only).
    fts_extra_columns: Vec<String>,
}

impl Statements {
    fn build(schema: &BlockSchema) -> Self {
        let extra_columns: Vec<_> = schema
            .columns()
            .map(|(name, ty)| (name.to_owned(), ty))
            .collect();
        let fts_extra_columns: Vec<_> = schema.text_columns().map(str::to_owned).collect();

        let mut insert_cols =
            "id, text, created_at, source, datasource, metadata, hostname, updated_at".to_owned();
        let mut insert_marks = "?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8".to_owned();
        for (i, (name, _)) in extra_columns.iter().enumerate() {
            insert_cols.push_str(&format!(", \"{name}\""));
            insert_marks.push_str(&format!(", ?{}", 9 + i));
        }
        let insert_block = format!("INSERT INTO blocks ({insert_cols}) VALUES ({insert_marks})");

        let mut update_sets =
            "text = ?1, source = ?2, datasource = ?3, metadata = ?4, hostname = ?5, updated_at = ?6"
                .to_owned();
        for (i, (name, _)) in extra_columns.iter().enumerate() {
            update_sets.push_str(&format!(", \"{name}\" = ?{}", 7 + i));
        }
        let update_block = format!(
            "UPDATE blocks SET {update_sets} WHERE rowid = ?{}",
            7 + extra_columns.len()
        );

        let select_existing = "SELECT rowid, created_at, hostname FROM blocks WHERE id = ?1".to_owned();

        let mut fts_cols: Vec<String> = FIXED_FTS_COLUMNS.iter().map(|c| (*c).to_owned()).collect();
        fts_cols.extend(fts_extra_columns.iter().map(|name| format!("\"{name}\"")));
        let fts_col_list = fts_cols.join(", ");
        let n_fts = fts_cols.len();

        let fts_delete = "DELETE FROM blocks_fts WHERE rowid = ?1".to_owned();
        let fts_insert = format!(
            "INSERT INTO blocks_fts (rowid, {fts_col_list}) VALUES ({})",
            (1..=n_fts + 1)
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut repopulate_select =
            "SELECT rowid, text, source, datasource, COALESCE(metadata, '{}'), COALESCE(hostname, '')"
                .to_owned();
        for name in &fts_extra_columns {
            repopulate_select.push_str(&format!(", COALESCE(\"{name}\", '')"));
        }
        let fts_repopulate = format!(
            "INSERT INTO blocks_fts (rowid, {fts_col_list}) {repopulate_select} FROM blocks"
        );

        Self {
            insert_block,
            update_block,
            select_existing,
            fts_delete,
            fts_insert,
            fts_repopulate,
            extra_columns,
            fts_extra_columns,
        }
    }
}

/// One datasource instance's store: base table, FTS index, fetch metadata.
///
/// The connection is behind a mutex — one writer per store, with WAL allowing
/// concurrent readers from other handles if anyone opens them.
pub struct GenericStorage {
    name: String,
    path: PathBuf,
    schema: BlockSchema,
    conn: Mutex<Connection>,
    prototype: RwLock<Option<Arc<dyn BlockFactory>>>,
    sql: Statements,
}

impl std::fmt::Debug for GenericStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericStorage")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl GenericStorage {
    /// Open (creating and bootstrapping if absent) the store at `path`.
    ///
    /// An existing store with pending migrations is refused with
    /// [`StorageError::PendingMigrations`]; a brand-new file gets the full
    /// migration history applied.
    pub fn open(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        schema: BlockSchema,
    ) -> Result<Self, StorageError> {
        Self::open_impl(path.as_ref(), name.into(), schema, false)
    }

    /// Migration-tooling bypass: apply whatever is pending, then open.
    pub fn open_and_migrate(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        schema: BlockSchema,
    ) -> Result<Self, StorageError> {
        Self::open_impl(path.as_ref(), name.into(), schema, true)
    }

    fn open_impl(
        path: &Path,
        name: String,
        schema: BlockSchema,
        migrate: bool,
    ) -> Result<Self, StorageError> {
        for (column, _) in schema.columns() {
            if !BlockSchema::is_valid_column_name(column) {
                return Err(StorageError::InvalidSchemaColumn {
                    datasource: name,
                    column: column.to_owned(),
                });
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        apply_pragmas(&conn)?;

        let manager = MigrationManager::new();
        let status = manager.status(&conn)?;
        if migrate || status.is_bootstrap() {
            manager.apply_pending(&mut conn)?;
        } else if status.pending_count() > 0 {
            return Err(StorageError::PendingMigrations {
                datasource: name,
                count: status.pending_count(),
            });
        }

        let sql = Statements::build(&schema);
        ensure_schema(&mut conn, &schema, &sql)?;

        erg_log::debug!(datasource = %name, path = %path.display(), "opened store");

        Ok(Self {
            name,
            path: path.to_owned(),
            schema,
            conn: Mutex::new(conn),
            prototype: RwLock::new(None),
            sql,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &BlockSchema {
        &self.schema
    }

    /// Install the factory used to rebuild this store's rows into concrete
    /// blocks. Without one, queries return [`GenericBlock`]s.
    pub fn register_block_prototype(&self, prototype: Arc<dyn BlockFactory>) {
        *self.prototype.write() = Some(prototype);
    }

    /// Upsert one block. Idempotent for a given `(source, id)`.
    pub fn store_block(&self, block: &dyn Block, ds_type: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        self.upsert_block(&tx, block, ds_type)?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert a batch inside one transaction.
    pub fn store_blocks(
        &self,
        blocks: &[Arc<dyn Block>],
        ds_type: &str,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for block in blocks {
            self.upsert_block(&tx, block.as_ref(), ds_type)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_block(
        &self,
        tx: &Transaction<'_>,
        block: &dyn Block,
        ds_type: &str,
    ) -> Result<(), StorageError> {
        // Old row, if any. `created_at` is deliberately not read back — an
        // upsert never touches it, so the first write wins.
        struct Existing {
            rowid: i64,
            hostname: Option<String>,
        }

        let existing: Option<Existing> = {
            let mut stmt = tx.prepare_cached(&self.sql.select_existing)?;
            stmt.query_row([block.id()], |row| {
                Ok(Existing {
                    rowid: row.get(0)?,
                    hostname: row.get(2)?,
                })
            })
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?
        };

        let metadata = block.metadata();
        let metadata_json =
            serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_owned());

        // Hostname: captured from the process on first insert; a later upsert
        // only overwrites it when the incoming block carries one.
        let hostname: Option<String> = match block.hostname() {
            Some(h) if !h.is_empty() => Some(h.to_owned()),
            _ => match &existing {
                Some(existing) => existing.hostname.clone(),
                None => process_hostname(),
            },
        };

        let now = format_time(Utc::now());

        let rowid = if let Some(existing) = &existing {
            // Explicit FTS sync: drop the stale index entry, then reinsert
            // after the base row is updated.
            tx.prepare_cached(&self.sql.fts_delete)?
                .execute([existing.rowid])?;

            let mut params: Vec<SqlValue> = vec![
                SqlValue::Text(block.text().to_owned()),
                SqlValue::Text(block.source().to_owned()),
                SqlValue::Text(ds_type.to_owned()),
                SqlValue::Text(metadata_json.clone()),
                hostname
                    .clone()
                    .map_or(SqlValue::Null, SqlValue::Text),
                SqlValue::Text(now),
            ];
            for (name, _) in &self.sql.extra_columns {
                params.push(metadata_sql_value(&metadata, name));
            }
            params.push(SqlValue::Integer(existing.rowid));
            tx.prepare_cached(&self.sql.update_block)?
                .execute(params_from_iter(params))?;

            existing.rowid
        } else {
            let mut params: Vec<SqlValue> = vec![
                SqlValue::Text(block.id().to_owned()),
                SqlValue::Text(block.text().to_owned()),
                SqlValue::Text(format_time(block.created_at())),
                SqlValue::Text(block.source().to_owned()),
                SqlValue::Text(ds_type.to_owned()),
                SqlValue::Text(metadata_json.clone()),
                hostname
                    .clone()
                    .map_or(SqlValue::Null, SqlValue::Text),
                SqlValue::Text(now),
            ];
            for (name, _) in &self.sql.extra_columns {
                params.push(metadata_sql_value(&metadata, name));
            }
            tx.prepare_cached(&self.sql.insert_block)?
                .execute(params_from_iter(params))?;
            tx.last_insert_rowid()
        };

        let mut fts_params: Vec<SqlValue> = vec![
            SqlValue::Integer(rowid),
            SqlValue::Text(block.text().to_owned()),
            SqlValue::Text(block.source().to_owned()),
            SqlValue::Text(ds_type.to_owned()),
            SqlValue::Text(metadata_json),
            SqlValue::Text(hostname.unwrap_or_default()),
        ];
        for name in &self.sql.fts_extra_columns {
            fts_params.push(SqlValue::Text(
                metadata
                    .get(name)
                    .map(Value::to_display_string)
                    .unwrap_or_default(),
            ));
        }
        tx.prepare_cached(&self.sql.fts_insert)?
            .execute(params_from_iter(fts_params))?;

        Ok(())
    }

    /// Run one page-sized query against this store.
    ///
    /// A non-blank `text` consults the FTS index with the query string bound
    /// verbatim (user input is never spliced into SQL); engine syntax errors
    /// surface as [`StorageError::Query`]. A blank query scans the base table
    /// newest-first.
    pub fn search(&self, query: &StoreQuery) -> Result<Vec<Arc<dyn Block>>, StorageError> {
        let conn = self.conn.lock();

        let mut sql;
        let mut params: Vec<SqlValue> = Vec::new();

        let fts_text = query.text.as_deref().filter(|t| !t.trim().is_empty());
        if let Some(text) = fts_text {
            sql = format!(
                "SELECT {} FROM blocks_fts f JOIN blocks b ON b.rowid = f.rowid \
                 WHERE blocks_fts MATCH ?1",
                prefixed_block_columns("b")
            );
            params.push(SqlValue::Text(text.to_owned()));
        } else {
            sql = format!("SELECT {SELECT_BLOCK_COLUMNS} FROM blocks WHERE 1 = 1");
        }

        let col = if fts_text.is_some() { "b.created_at" } else { "created_at" };
        if let Some(start) = query.start {
            params.push(SqlValue::Text(format_time(start)));
            sql.push_str(&format!(" AND {col} >= ?{}", params.len()));
        }
        if let Some(end) = query.end {
            params.push(SqlValue::Text(format_time(end)));
            sql.push_str(&format!(" AND {col} <= ?{}", params.len()));
        }

        let id_col = if fts_text.is_some() { "b.id" } else { "id" };
        params.push(SqlValue::Integer(query.limit as i64));
        let limit_idx = params.len();
        params.push(SqlValue::Integer(query.offset as i64));
        sql.push_str(&format!(
            " ORDER BY {col} DESC, {id_col} ASC LIMIT ?{limit_idx} OFFSET ?{}",
            limit_idx + 1
        ));

        let result = self.query_blocks(&conn, &sql, params);
        match result {
            Ok(blocks) => Ok(blocks),
            Err(err) => match (&err, fts_text) {
                (StorageError::Sqlite(sqlite_err), Some(text))
                    if is_fts_syntax_error(sqlite_err) =>
                {
                    Err(QueryError::from_fts_failure(text, &sqlite_err.to_string()).into())
                }
                _ => Err(err),
            },
        }
    }

    /// All blocks newer than `since`, newest first.
    pub fn blocks_since(&self, since: DateTime<Utc>) -> Result<Vec<Arc<dyn Block>>, StorageError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {SELECT_BLOCK_COLUMNS} FROM blocks WHERE created_at > ?1 \
             ORDER BY created_at DESC"
        );
        self.query_blocks(&conn, &sql, vec![SqlValue::Text(format_time(since))])
    }

    fn query_blocks(
        &self,
        conn: &Connection,
        sql: &str,
        params: Vec<SqlValue>,
    ) -> Result<Vec<Arc<dyn Block>>, StorageError> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;

        let prototype = self.prototype.read().clone();
        let mut blocks: Vec<Arc<dyn Block>> = Vec::new();
        while let Some(row) = rows.next()? {
            let generic = decode_row(&self.name, row)?;
            let source = generic.source.clone();
            let block = match &prototype {
                Some(factory) => factory.from_generic(&generic, &source),
                None => GenericBlockFactory.from_generic(&generic, &source),
            };
            blocks.push(block);
        }
        Ok(blocks)
    }

    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        let conn = self.conn.lock();
        let (total, oldest, newest): (i64, Option<String>, Option<String>) = conn.query_row(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM blocks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(StorageStats {
            total_blocks: total as u64,
            oldest: oldest.as_deref().and_then(|s| parse_time(s).ok()),
            newest: newest.as_deref().and_then(|s| parse_time(s).ok()),
        })
    }

    // --- fetch metadata -------------------------------------------------

    /// Opaque per-store key/value storage (e.g. a last-fetch cursor).
    pub fn get_fetch_metadata(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM fetch_metadata WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    pub fn set_fetch_metadata(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO fetch_metadata (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, \
             updated_at = excluded.updated_at",
            rusqlite::params![key, value, format_time(Utc::now())],
        )?;
        Ok(())
    }

    // --- maintenance ----------------------------------------------------

    pub fn optimize(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO blocks_fts (blocks_fts) VALUES ('optimize')",
            [],
        )?;
        conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }

    pub fn analyze(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute_batch("ANALYZE;")?;
        Ok(())
    }

    pub fn wal_checkpoint(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn vacuum(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("VACUUM", [])?;
        Ok(())
    }

    /// SQLite's own file-level check.
    pub fn integrity_check(&self) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("PRAGMA integrity_check")?;
        let findings: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        let ok = findings == ["ok"];
        if !ok {
            erg_log::warn!(datasource = %self.name, ?findings, "integrity check failed");
        }
        Ok(ok)
    }

    /// Detect base-table/FTS desync.
    ///
    /// A contentless index cannot verify its token content against the base
    /// table; a row-count mismatch is the observable failure mode, and
    /// [`GenericStorage::fts_rebuild`] is the recovery.
    pub fn fts_integrity_check(&self) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let blocks: i64 = conn.query_row("SELECT COUNT(*) FROM blocks", [], |r| r.get(0))?;
        let indexed: i64 = conn.query_row("SELECT COUNT(*) FROM blocks_fts", [], |r| r.get(0))?;
        let ok = blocks == indexed;
        if !ok {
            erg_log::warn!(
                datasource = %self.name,
                blocks,
                indexed,
                "FTS index out of sync with base table"
            );
        }
        Ok(ok)
    }

    /// Drop all index content and repopulate it from the base table.
    pub fn fts_rebuild(&self) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("INSERT INTO blocks_fts (blocks_fts) VALUES ('delete-all')", [])?;
        tx.execute(&self.sql.fts_repopulate, [])?;
        tx.commit()?;
        erg_log::info!(datasource = %self.name, "rebuilt FTS index");
        Ok(())
    }
}

fn prefixed_block_columns(prefix: &str) -> String {
    SELECT_BLOCK_COLUMNS
        .split(", ")
        .map(|c| format!("{prefix}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn metadata_sql_value(metadata: &BTreeMap<String, Value>, column: &str) -> SqlValue {
    match metadata.get(column) {
        Some(Value::Text(s)) => SqlValue::Text(s.clone()),
        Some(Value::Integer(i)) => SqlValue::Integer(*i),
        Some(Value::Real(f)) => SqlValue::Real(*f),
        Some(Value::Boolean(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Timestamp(t)) => SqlValue::Text(format_time(*t)),
        None => SqlValue::Null,
    }
}

fn decode_row(datasource: &str, row: &rusqlite::Row<'_>) -> Result<GenericBlock, StorageError> {
    let created_at_raw: String = row.get(2)?;
    let created_at = parse_time(&created_at_raw).map_err(|err| {
        StorageError::Corrupt {
            datasource: datasource.to_owned(),
            reason: format!("bad created_at {created_at_raw:?}: {err}"),
        }
    })?;

    let metadata_json: String = row.get(5)?;
    let metadata: BTreeMap<String, Value> = match serde_json::from_str(&metadata_json) {
        Ok(metadata) => metadata,
        Err(err) => {
            erg_log::warn_once!("undecodable metadata in {datasource}: {err}");
            BTreeMap::new()
        }
    };

    Ok(GenericBlock {
        id: row.get(0)?,
        text: row.get(1)?,
        created_at,
        source: row.get(3)?,
        kind: row.get(4)?,
        hostname: row.get(6)?,
        metadata,
    })
}

fn is_fts_syntax_error(err: &rusqlite::Error) -> bool {
    let message = err.to_string();
    message.contains("fts5")
        || message.contains("malformed MATCH")
        || message.contains("unterminated string")
        || message.contains("no such column")
        || message.contains("unknown special query")
}

fn apply_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    // journal_mode returns the resulting mode as a row.
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", 30_000)?;
    conn.pragma_update(None, "cache_size", -64_000)?;
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\")"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    Ok(columns)
}

/// Materialize the datasource-declared metadata columns.
///
/// New columns are added with `ALTER TABLE`; a change to the searchable
/// column set recreates the FTS index and repopulates it from the base table.
fn ensure_schema(
    conn: &mut Connection,
    schema: &BlockSchema,
    sql: &Statements,
) -> Result<(), StorageError> {
    let existing = table_columns(conn, "blocks")?;
    for (column, ty) in schema.columns() {
        if !existing.iter().any(|c| c == column) {
            conn.execute_batch(&format!(
                "ALTER TABLE blocks ADD COLUMN \"{column}\" {}",
                ty.sql_type()
            ))?;
        }
    }

    let mut want_fts: Vec<String> = FIXED_FTS_COLUMNS.iter().map(|c| (*c).to_owned()).collect();
    want_fts.extend(sql.fts_extra_columns.iter().cloned());

    let have_fts = table_columns(conn, "blocks_fts")?;
    if have_fts != want_fts {
        let quoted: Vec<String> = want_fts.iter().map(|c| format!("\"{c}\"")).collect();
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS blocks_fts;
             CREATE VIRTUAL TABLE blocks_fts USING fts5({}, content='', contentless_delete=1);",
            quoted.join(", ")
        ))?;
        tx.execute(&sql.fts_repopulate, [])?;
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use erg_types::ColumnType;

    #[test]
    fn statements_include_schema_columns() {
        let schema = BlockSchema::new()
            .with_column("tag", ColumnType::Text)
            .with_column("ordinal", ColumnType::Integer);
        let sql = Statements::build(&schema);

        assert!(sql.insert_block.contains("\"tag\""));
        assert!(sql.insert_block.contains("\"ordinal\""));
        // Only text columns reach the FTS index.
        assert!(sql.fts_insert.contains("\"tag\""));
        assert!(!sql.fts_insert.contains("\"ordinal\""));
        assert_eq!(sql.fts_extra_columns, vec!["tag"]);
    }
}
