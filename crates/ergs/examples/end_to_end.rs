//! Build an engine from an inline config, harvest once, search, and tail the
//! firehose.
//!
//! ```sh
//! cargo run --example end_to_end
//! ```

use std::collections::BTreeMap;

use ergs::{Block as _, CancelToken, Config, DatasourceConfig, Engine, SearchParams};

fn main() -> anyhow::Result<()> {
    ergs::setup_logging();
    erg_types::testkit::register_toy_kind();

    let dir = tempfile::tempdir()?;
    let config = Config {
        storage_dir: dir.path().join("storage"),
        event_socket_path: Some(dir.path().join("ergs.sock")),
        datasources: BTreeMap::from([
            (
                "soria".to_owned(),
                DatasourceConfig {
                    kind: "toy".to_owned(),
                    interval_secs: None,
                    config: serde_json::json!({ "count": 5, "tag": "soria" }),
                },
            ),
            (
                "madrid".to_owned(),
                DatasourceConfig {
                    kind: "toy".to_owned(),
                    interval_secs: Some(60),
                    config: serde_json::json!({ "count": 3, "tag": "madrid" }),
                },
            ),
        ]),
        ..Default::default()
    };

    let engine = Engine::from_config(&config)?;

    let (_, firehose) = engine.hub().register();
    engine.fetch_once(&CancelToken::new());

    println!("--- firehose ---");
    for event in firehose.try_iter() {
        println!("{} [{}] {}", event.created_at, event.datasource, event.text);
    }

    let results = engine.search_service().search(&SearchParams {
        query: "soria".to_owned(),
        ..Default::default()
    })?;
    println!("--- search: soria ({} hits) ---", results.total_count);
    for block in &results.ordered {
        println!("{} {} {}", block.created_at(), block.source(), block.summary());
    }

    engine.shutdown();
    Ok(())
}
