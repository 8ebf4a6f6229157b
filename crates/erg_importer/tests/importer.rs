//! Ingress end-to-end: import, export-and-delete, auth, and the full
//! stage-then-route loop through the warehouse.

use std::sync::Arc;
use std::time::Duration;

use erg_importer::{ImporterClientConfig, ImporterConfig, ImporterDatasource, ImporterServer};
use erg_store::StorageManager;
use erg_types::testkit::{ToyConfig, ToyDatasource};
use erg_types::{CancelToken, SinkSet};
use erg_warehouse::{Warehouse, WarehouseConfig};

// ---

const TOKEN: &str = "secret-import-token";

fn start_server(dir: &tempfile::TempDir) -> (ImporterServer, String) {
    let server = ImporterServer::start(ImporterConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        token: TOKEN.to_owned(),
        db_path: dir.path().join("internal").join("importer.db"),
    })
    .unwrap();
    let url = format!("http://{}", server.local_addr());
    (server, url)
}

fn import_payload() -> serde_json::Value {
    serde_json::json!({
        "blocks": [
            {
                "id": "t1",
                "text": "first timestamp block",
                "created_at": "2024-05-01T10:00:00Z",
                "type": "timestamp",
                "source": "timestamp",
            },
            {
                "id": "f1",
                "text": "a firefox visit",
                "created_at": "2024-05-01T10:01:00Z",
                "type": "firefox",
                "source": "firefox",
            },
            {
                "id": "t2",
                "text": "second timestamp block",
                "created_at": "2024-05-01T10:02:00Z",
                "type": "timestamp",
                "source": "timestamp",
            },
        ]
    })
}

fn bearer() -> String {
    format!("Bearer {TOKEN}")
}

// ---

#[test]
fn import_then_export_drains_the_staging_store() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (server, url) = start_server(&dir);

    let mut response = ureq::post(&format!("{url}/api/import/blocks"))
        .header("Authorization", &bearer())
        .send_json(import_payload())?;
    let body: serde_json::Value = response.body_mut().read_json()?;
    assert_eq!(body["accepted"], 3);
    assert_eq!(body["rejected"], 0);

    let mut response = ureq::get(&format!("{url}/api/stats"))
        .header("Authorization", &bearer())
        .call()?;
    let stats: serde_json::Value = response.body_mut().read_json()?;
    assert_eq!(stats["staged"], 3);
    assert_eq!(stats["per_target"]["timestamp"], 2);
    assert_eq!(stats["per_target"]["firefox"], 1);

    let mut response = ureq::get(&format!("{url}/api/blocks/export"))
        .header("Authorization", &bearer())
        .call()?;
    let exported: serde_json::Value = response.body_mut().read_json()?;
    assert_eq!(exported["blocks"].as_array().unwrap().len(), 3);

    // The export deleted atomically: nothing left for a second pull.
    let mut response = ureq::get(&format!("{url}/api/blocks/export"))
        .header("Authorization", &bearer())
        .call()?;
    let empty: serde_json::Value = response.body_mut().read_json()?;
    assert_eq!(empty["blocks"].as_array().unwrap().len(), 0);

    server.stop();
    Ok(())
}

#[test]
fn invalid_blocks_are_rejected_individually() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (_server, url) = start_server(&dir);

    let payload = serde_json::json!({
        "blocks": [
            { "id": "ok", "text": "fine", "created_at": "2024-05-01T10:00:00Z",
              "type": "toy", "source": "timestamp" },
            { "id": "", "text": "missing id", "created_at": "2024-05-01T10:00:00Z",
              "type": "toy", "source": "timestamp" },
            { "id": "no-time", "text": "x", "type": "toy", "source": "timestamp" },
        ]
    });

    let mut response =
        ureq::post(&format!("{url}/api/import/blocks"))
        .header("Authorization", &bearer())
        .send_json(payload)?;
    let body: serde_json::Value = response.body_mut().read_json()?;
    assert_eq!(body["accepted"], 1);
    assert_eq!(body["rejected"], 2);
    assert_eq!(body["errors"].as_array().unwrap().len(), 2);

    Ok(())
}

#[test]
fn auth_is_enforced_except_health() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (_server, url) = start_server(&dir);

    // No token.
    let err = ureq::get(&format!("{url}/api/stats")).call().unwrap_err();
    assert!(matches!(err, ureq::Error::StatusCode(401)), "{err}");

    // Wrong token.
    let err = ureq::get(&format!("{url}/api/blocks/export"))
        .header("Authorization", "Bearer nope")
        .call()
        .unwrap_err();
    assert!(matches!(err, ureq::Error::StatusCode(401)), "{err}");

    // Health is open.
    let mut response = ureq::get(&format!("{url}/health")).call()?;
    let body: serde_json::Value = response.body_mut().read_json()?;
    assert_eq!(body["status"], "ok");

    Ok(())
}

#[test]
fn unknown_routes_are_404() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (_server, url) = start_server(&dir);

    let err = ureq::get(&format!("{url}/api/nope"))
        .header("Authorization", &bearer())
        .call()
        .unwrap_err();
    assert!(matches!(err, ureq::Error::StatusCode(404)), "{err}");
    Ok(())
}

/// The full loop: POST → staging → importer datasource → warehouse routing.
/// Blocks for the configured `timestamp` instance land in its store; the
/// `firefox` block is dropped because nothing configured that name.
#[test]
fn staged_blocks_route_into_native_stores() -> anyhow::Result<()> {
    let ingress_dir = tempfile::tempdir()?;
    let (server, url) = start_server(&ingress_dir);

    let response = ureq::post(&format!("{url}/api/import/blocks"))
        .header("Authorization", &bearer())
        .send_json(import_payload())?;
    assert_eq!(response.status(), 200);

    let store_dir = tempfile::tempdir()?;
    let storage = Arc::new(StorageManager::new(store_dir.path())?);
    let warehouse = Warehouse::new(
        WarehouseConfig {
            optimize_interval: Duration::ZERO,
            ..Default::default()
        },
        storage.clone(),
        SinkSet::default(),
    );

    // The native store the staged blocks should land in…
    warehouse.add_datasource(Arc::new(ToyDatasource::new(
        "timestamp",
        ToyConfig {
            count: 0,
            ..Default::default()
        },
    )));
    // …and the importer instance that pulls them over.
    warehouse.add_datasource(Arc::new(ImporterDatasource::new(
        "importer",
        ImporterClientConfig {
            url: url.clone(),
            token: TOKEN.to_owned(),
        },
    )));

    warehouse.fetch_once(&CancelToken::new());

    let stats = storage.get_store("timestamp")?.stats()?;
    assert_eq!(stats.total_blocks, 2, "both timestamp blocks routed home");
    assert!(
        !store_dir.path().join("firefox.db").exists(),
        "the unconfigured target must not materialize"
    );

    let status = warehouse.status();
    assert_eq!(status["importer"].blocks_stored, 2);
    assert_eq!(status["importer"].blocks_dropped, 1);

    server.stop();
    Ok(())
}
