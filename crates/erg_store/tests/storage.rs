//! Single-store behavior: upsert semantics, FTS sync, query safety,
//! maintenance.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use erg_store::{GenericStorage, StorageError, StoreQuery};
use erg_types::{Block as _, BlockSchema, ColumnType, GenericBlock, Value};

// ---

fn schema() -> BlockSchema {
    BlockSchema::new()
        .with_column("tag", ColumnType::Text)
        .with_column("ordinal", ColumnType::Integer)
}

fn block(id: &str, text: &str, created_at: &str) -> GenericBlock {
    GenericBlock {
        id: id.to_owned(),
        text: text.to_owned(),
        created_at: created_at.parse().unwrap(),
        kind: "toy".to_owned(),
        source: "my_toy".to_owned(),
        hostname: None,
        metadata: BTreeMap::from([
            ("tag".to_owned(), Value::from("alpha")),
            ("ordinal".to_owned(), Value::from(1_i64)),
        ]),
    }
}

fn open_store(dir: &tempfile::TempDir) -> GenericStorage {
    GenericStorage::open(dir.path().join("my_toy.db"), "my_toy", schema()).unwrap()
}

fn all_blocks(store: &GenericStorage) -> Vec<Arc<dyn erg_types::Block>> {
    store
        .search(&StoreQuery {
            limit: 1000,
            ..Default::default()
        })
        .unwrap()
}

// ---

#[test]
fn store_and_search_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);

    store.store_block(&block("a", "the quick brown fox", "2024-05-01T10:00:00Z"), "toy")?;
    store.store_block(&block("b", "lazy dogs sleep", "2024-05-01T11:00:00Z"), "toy")?;

    let hits = store.search(&StoreQuery {
        text: Some("fox".to_owned()),
        limit: 10,
        ..Default::default()
    })?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id(), "a");
    assert_eq!(hits[0].source(), "my_toy");
    assert_eq!(hits[0].kind(), "toy");

    // Schema-declared text columns are searchable too.
    let hits = store.search(&StoreQuery {
        text: Some("alpha".to_owned()),
        limit: 10,
        ..Default::default()
    })?;
    assert_eq!(hits.len(), 2);

    // Empty query scans newest-first.
    let all = all_blocks(&store);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id(), "b");

    Ok(())
}

#[test]
fn upsert_is_idempotent_and_preserves_created_at() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);

    let first = block("stable", "original text", "2024-05-01T10:00:00Z");
    store.store_block(&first, "toy")?;

    // Refetch: same id, newer timestamp, new text.
    let mut second = block("stable", "revised text", "2024-06-01T10:00:00Z");
    second
        .metadata
        .insert("tag".to_owned(), Value::from("beta"));
    store.store_block(&second, "toy")?;

    let all = all_blocks(&store);
    assert_eq!(all.len(), 1, "upsert must not duplicate");

    let row = &all[0];
    assert_eq!(row.text(), "revised text");
    assert_eq!(
        row.created_at(),
        "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>()?,
        "created_at keeps the first write"
    );
    assert_eq!(row.metadata()["tag"], Value::from("beta"));

    // The old text must no longer match; the new one must.
    let old = store.search(&StoreQuery {
        text: Some("original".to_owned()),
        limit: 10,
        ..Default::default()
    })?;
    assert!(old.is_empty(), "stale FTS entry survived the upsert");

    let new = store.search(&StoreQuery {
        text: Some("revised".to_owned()),
        limit: 10,
        ..Default::default()
    })?;
    assert_eq!(new.len(), 1);

    Ok(())
}

#[test]
fn updated_at_is_monotonic() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);

    store.store_block(&block("x", "one", "2024-05-01T10:00:00Z"), "toy")?;
    let conn = rusqlite::Connection::open(dir.path().join("my_toy.db"))?;
    let t1: String =
        conn.query_row("SELECT updated_at FROM blocks WHERE id = 'x'", [], |r| r.get(0))?;

    std::thread::sleep(std::time::Duration::from_millis(5));
    store.store_block(&block("x", "two", "2024-05-01T10:00:00Z"), "toy")?;
    let t2: String =
        conn.query_row("SELECT updated_at FROM blocks WHERE id = 'x'", [], |r| r.get(0))?;

    assert!(t2 > t1, "updated_at must be non-decreasing ({t1} -> {t2})");
    Ok(())
}

#[test]
fn hostname_captured_on_first_insert_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);

    store.store_block(&block("h", "text", "2024-05-01T10:00:00Z"), "toy")?;

    // An incoming non-empty hostname overwrites.
    let mut roaming = block("h", "text", "2024-05-01T10:00:00Z");
    roaming.hostname = Some("elsewhere".to_owned());
    store.store_block(&roaming, "toy")?;
    assert_eq!(all_blocks(&store)[0].hostname(), Some("elsewhere"));

    // A hostname-less upsert leaves the stored one alone.
    store.store_block(&block("h", "text", "2024-05-01T10:00:00Z"), "toy")?;
    assert_eq!(all_blocks(&store)[0].hostname(), Some("elsewhere"));

    Ok(())
}

#[test]
fn forward_slash_is_a_query_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);
    store.store_block(&block("q3", "Quake3e released", "2024-05-01T10:00:00Z"), "toy")?;

    let err = store
        .search(&StoreQuery {
            text: Some("KG7x/Quake3e".to_owned()),
            limit: 10,
            ..Default::default()
        })
        .unwrap_err();

    match err {
        StorageError::Query(query_err) => {
            let message = query_err.user_message();
            assert!(
                message.contains("Forward slashes (/) are not allowed"),
                "unfriendly message: {message}"
            );
            assert!(!message.contains("fts5"), "raw engine text leaked: {message}");
        }
        other => panic!("expected QueryError, got {other}"),
    }

    // The same store still answers well-formed queries.
    let hits = store.search(&StoreQuery {
        text: Some("Quake3e".to_owned()),
        limit: 10,
        ..Default::default()
    })?;
    assert_eq!(hits.len(), 1);

    Ok(())
}

#[test]
fn adversarial_queries_never_touch_data() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);
    store.store_block(&block("safe", "untouched content", "2024-05-01T10:00:00Z"), "toy")?;

    let payloads = [
        "'; DROP TABLE blocks; --",
        "\" OR 1=1 --",
        "blocks_fts MATCH 'x'",
        "x\" UNION SELECT * FROM fetch_metadata --",
        "col:*/",
        "NEAR(((",
    ];

    for payload in payloads {
        let result = store.search(&StoreQuery {
            text: Some(payload.to_owned()),
            limit: 10,
            ..Default::default()
        });
        // Either a typed error or a (possibly empty) result set; never a panic,
        // never damage.
        match result {
            Ok(_) => {}
            Err(StorageError::Query(_)) => {}
            Err(other) => panic!("payload {payload:?} produced {other}"),
        }
    }

    // Data and schema survived every attempt.
    let hits = store.search(&StoreQuery {
        text: Some("untouched".to_owned()),
        limit: 10,
        ..Default::default()
    })?;
    assert_eq!(hits.len(), 1);

    let conn = rusqlite::Connection::open(dir.path().join("my_toy.db"))?;
    for table in ["blocks", "blocks_fts", "fetch_metadata", "migrations"] {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
            [table],
            |r| r.get(0),
        )?;
        assert_eq!(count, 1, "table {table} went missing");
    }

    Ok(())
}

#[test]
fn date_window_is_inclusive() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);

    store.store_block(&block("d1", "day one", "2024-05-01T12:00:00Z"), "toy")?;
    store.store_block(&block("d2", "day two", "2024-05-02T12:00:00Z"), "toy")?;
    store.store_block(&block("d3", "day three", "2024-05-03T12:00:00Z"), "toy")?;

    let hits = store.search(&StoreQuery {
        start: Some("2024-05-02T00:00:00Z".parse()?),
        end: Some("2024-05-02T23:59:59.999999999Z".parse()?),
        limit: 10,
        ..Default::default()
    })?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id(), "d2");

    Ok(())
}

#[test]
fn blocks_since_and_stats() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);

    store.store_block(&block("s1", "first", "2024-05-01T10:00:00Z"), "toy")?;
    store.store_block(&block("s2", "second", "2024-05-02T10:00:00Z"), "toy")?;
    store.store_block(&block("s3", "third", "2024-05-03T10:00:00Z"), "toy")?;

    let since = store.blocks_since("2024-05-01T12:00:00Z".parse()?)?;
    let ids: Vec<_> = since.iter().map(|b| b.id().to_owned()).collect();
    assert_eq!(ids, vec!["s3", "s2"], "newest first, strictly newer than cutoff");

    let stats = store.stats()?;
    assert_eq!(stats.total_blocks, 3);
    assert_eq!(stats.oldest, Some("2024-05-01T10:00:00Z".parse()?));
    assert_eq!(stats.newest, Some("2024-05-03T10:00:00Z".parse()?));

    Ok(())
}

#[test]
fn fetch_metadata_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);

    assert_eq!(store.get_fetch_metadata("cursor")?, None);
    store.set_fetch_metadata("cursor", "page=3")?;
    assert_eq!(store.get_fetch_metadata("cursor")?.as_deref(), Some("page=3"));
    store.set_fetch_metadata("cursor", "page=4")?;
    assert_eq!(store.get_fetch_metadata("cursor")?.as_deref(), Some("page=4"));

    Ok(())
}

#[test]
fn fts_rebuild_recovers_from_desync() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);

    let batch: Vec<Arc<dyn erg_types::Block>> = (0..5)
        .map(|i| {
            Arc::new(block(
                &format!("r{i}"),
                &format!("rebuild target {i}"),
                "2024-05-01T10:00:00Z",
            )) as Arc<dyn erg_types::Block>
        })
        .collect();
    store.store_blocks(&batch, "toy")?;
    assert!(store.fts_integrity_check()?);

    // Sabotage the index behind the store's back.
    let conn = rusqlite::Connection::open(dir.path().join("my_toy.db"))?;
    conn.execute("INSERT INTO blocks_fts (blocks_fts) VALUES ('delete-all')", [])?;
    drop(conn);

    assert!(!store.fts_integrity_check()?);

    store.fts_rebuild()?;
    assert!(store.fts_integrity_check()?);

    let hits = store.search(&StoreQuery {
        text: Some("rebuild".to_owned()),
        limit: 10,
        ..Default::default()
    })?;
    assert_eq!(hits.len(), 5);

    Ok(())
}

#[test]
fn maintenance_ops_run_clean() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);
    store.store_block(&block("m", "maintain me", "2024-05-01T10:00:00Z"), "toy")?;

    store.optimize()?;
    store.analyze()?;
    store.wal_checkpoint()?;
    store.vacuum()?;
    assert!(store.integrity_check()?);
    assert!(store.fts_integrity_check()?);

    Ok(())
}

#[test]
fn reopening_with_new_schema_columns_migrates_in_place() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("my_toy.db");

    {
        let store = GenericStorage::open(&path, "my_toy", BlockSchema::new())?;
        store.store_block(&block("old", "from before the schema", "2024-05-01T10:00:00Z"), "toy")?;
    }

    // Reopen with a wider schema: column added, FTS index rebuilt.
    let store = GenericStorage::open(&path, "my_toy", schema())?;
    store.store_block(&block("new", "with tag column", "2024-05-02T10:00:00Z"), "toy")?;

    let hits = store.search(&StoreQuery {
        text: Some("alpha".to_owned()),
        limit: 10,
        ..Default::default()
    })?;
    assert_eq!(hits.len(), 1, "new text column must be searchable");
    assert_eq!(hits[0].id(), "new");

    // Pre-existing rows survived and are still searchable.
    let hits = store.search(&StoreQuery {
        text: Some("before".to_owned()),
        limit: 10,
        ..Default::default()
    })?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id(), "old");

    Ok(())
}

#[test]
fn registered_prototypes_rebuild_concrete_blocks() -> anyhow::Result<()> {
    // A concrete block type that derives its summary from metadata, the way
    // real adapters do.
    #[derive(Debug)]
    struct TaggedBlock {
        inner: GenericBlock,
    }

    impl erg_types::Block for TaggedBlock {
        fn id(&self) -> &str {
            &self.inner.id
        }
        fn text(&self) -> &str {
            &self.inner.text
        }
        fn created_at(&self) -> DateTime<Utc> {
            self.inner.created_at
        }
        fn source(&self) -> &str {
            &self.inner.source
        }
        fn kind(&self) -> &str {
            &self.inner.kind
        }
        fn metadata(&self) -> BTreeMap<String, Value> {
            self.inner.metadata.clone()
        }
        fn summary(&self) -> String {
            let tag = self
                .inner
                .metadata
                .get("tag")
                .and_then(|v| v.as_text())
                .unwrap_or("untagged");
            format!("[{tag}] {}", self.inner.id)
        }
    }

    struct TaggedFactory;
    impl erg_types::BlockFactory for TaggedFactory {
        fn from_generic(&self, generic: &GenericBlock, source: &str) -> Arc<dyn erg_types::Block> {
            let mut inner = generic.clone();
            inner.source = source.to_owned();
            Arc::new(TaggedBlock { inner })
        }
    }

    let dir = tempfile::tempdir()?;
    let store = open_store(&dir);
    store.register_block_prototype(Arc::new(TaggedFactory));

    store.store_block(&block("p1", "prototype round trip", "2024-05-01T10:00:00Z"), "toy")?;

    let rebuilt = &all_blocks(&store)[0];
    assert_eq!(rebuilt.summary(), "[alpha] p1");
    assert_eq!(rebuilt.source(), "my_toy", "reconstruction preserves the row's source");

    Ok(())
}

#[test]
fn rejects_invalid_schema_column_names() {
    let dir = tempfile::tempdir().unwrap();

    // The builder debug-asserts, but schemas can also arrive deserialized
    // from adapter config; the storage layer is the hard gate.
    let bad: BlockSchema = serde_json::from_str(r#"{"drop table blocks": "text"}"#).unwrap();
    let err = GenericStorage::open(dir.path().join("x.db"), "x", bad).unwrap_err();
    assert!(matches!(err, StorageError::InvalidSchemaColumn { .. }), "{err}");
}
