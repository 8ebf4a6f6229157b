//! The importer HTTP ingress.
//!
//! Bearer-token authenticated except for `/health`. Responses are JSON;
//! request bodies are capped well below anything the staging store would
//! struggle with.

use std::io::Read as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tiny_http::{Header, Method, Request, Response, Server};

use erg_types::{CancelToken, GenericBlock};

use crate::{ImportError, StagingStore};

const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);
const MAX_IMPORT_BODY: u64 = 16 * 1024 * 1024;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ImporterConfig {
    /// e.g. `127.0.0.1:9090`; port 0 picks an ephemeral port.
    pub bind_addr: String,

    /// The bearer token producers must present.
    pub token: String,

    /// The staging database, conventionally `<storage_dir>/internal/importer.db`.
    pub db_path: PathBuf,
}

#[derive(serde::Deserialize)]
struct ImportRequest {
    blocks: Vec<serde_json::Value>,
}

#[derive(serde::Serialize)]
struct ImportResponse {
    accepted: usize,
    rejected: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

/// What `GET /api/blocks/export` returns (and what the importer datasource
/// consumes).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ExportResponse {
    pub blocks: Vec<GenericBlock>,
}

/// The staging ingress: accepts foreign blocks over HTTP, hands them back out
/// (once) to the importer datasource.
pub struct ImporterServer {
    staging: Arc<StagingStore>,
    local_addr: SocketAddr,
    token: CancelToken,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ImporterServer {
    pub fn start(config: ImporterConfig) -> Result<Self, ImportError> {
        let staging = Arc::new(StagingStore::open(&config.db_path)?);
        let server =
            Server::http(&config.bind_addr).map_err(|err| ImportError::Endpoint(err.to_string()))?;
        let local_addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| ImportError::Endpoint("importer bound to a non-IP address".to_owned()))?;

        let token = CancelToken::new();
        let loop_token = token.clone();
        let loop_staging = staging.clone();
        let auth_token = config.token.clone();

        let handle = std::thread::Builder::new()
            .name("importer-http".into())
            .spawn(move || {
                loop {
                    match server.recv_timeout(RECV_POLL_INTERVAL) {
                        Ok(Some(request)) => {
                            handle_request(request, &loop_staging, &auth_token);
                        }
                        Ok(None) => {
                            if loop_token.is_cancelled() {
                                break;
                            }
                        }
                        Err(err) => {
                            erg_log::warn!(%err, "importer http receive failed");
                            if loop_token.is_cancelled() {
                                break;
                            }
                        }
                    }
                }
            })?;

        erg_log::info!(addr = %local_addr, "importer ingress listening");

        Ok(Self {
            staging,
            local_addr,
            token,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn staging(&self) -> &Arc<StagingStore> {
        &self.staging
    }

    pub fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ImporterServer {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_request(mut request: Request, staging: &StagingStore, auth_token: &str) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    let path = url.split('?').next().unwrap_or(&url).to_owned();

    let response = match (&method, path.as_str()) {
        (Method::Get, "/health") => json_response(200, &serde_json::json!({ "status": "ok" })),

        _ if !authorized(&request, auth_token) => {
            json_response(401, &serde_json::json!({ "error": "unauthorized" }))
        }

        (Method::Post, "/api/import/blocks") => import_blocks(&mut request, staging),

        (Method::Get, "/api/blocks/export") => match staging.export_all() {
            Ok(blocks) => json_response(200, &ExportResponse { blocks }),
            Err(err) => server_error(&err),
        },

        (Method::Get, "/api/stats") => match staging.stats() {
            Ok(stats) => json_response(200, &stats),
            Err(err) => server_error(&err),
        },

        _ => json_response(404, &serde_json::json!({ "error": "not found" })),
    };

    if let Err(err) = request.respond(response) {
        erg_log::debug!(%err, "importer client went away mid-response");
    }
}

fn authorized(request: &Request, auth_token: &str) -> bool {
    let expected = format!("Bearer {auth_token}");
    request
        .headers()
        .iter()
        .any(|h| h.field.equiv("Authorization") && h.value.as_str() == expected)
}

fn import_blocks(request: &mut Request, staging: &StagingStore) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut body = String::new();
    if request
        .as_reader()
        .take(MAX_IMPORT_BODY)
        .read_to_string(&mut body)
        .is_err()
    {
        return json_response(400, &serde_json::json!({ "error": "unreadable body" }));
    }

    let parsed: ImportRequest = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            return json_response(
                400,
                &serde_json::json!({ "error": format!("bad request: {err}") }),
            );
        }
    };

    let mut accepted = 0;
    let mut errors = Vec::new();

    for (index, raw) in parsed.blocks.into_iter().enumerate() {
        match parse_import_block(raw) {
            Ok(block) => match staging.stage(&block) {
                Ok(_) => accepted += 1,
                Err(err) => errors.push(format!("block {index}: {err}")),
            },
            Err(err) => errors.push(format!("block {index}: {err}")),
        }
    }

    let response = ImportResponse {
        accepted,
        rejected: errors.len(),
        errors,
    };
    erg_log::debug!(
        accepted = response.accepted,
        rejected = response.rejected,
        "import request handled"
    );
    json_response(200, &response)
}

/// Each block is validated on its own so one bad entry rejects only itself.
fn parse_import_block(raw: serde_json::Value) -> Result<GenericBlock, ImportError> {
    let block: GenericBlock = serde_json::from_value(raw)
        .map_err(|err| ImportError::invalid_block(err.to_string()))?;

    for (field, value) in [
        ("id", &block.id),
        ("text", &block.text),
        ("type", &block.kind),
        ("source", &block.source),
    ] {
        if value.trim().is_empty() {
            return Err(ImportError::invalid_block(format!("empty {field}")));
        }
    }
    Ok(block)
}

fn json_response<T: serde::Serialize>(
    status: u16,
    body: &T,
) -> Response<std::io::Cursor<Vec<u8>>> {
    let body = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let content_type = Header::from_bytes("Content-Type", "application/json")
        .expect("static header is valid");
    Response::from_data(body)
        .with_header(content_type)
        .with_status_code(status)
}

fn server_error(err: &ImportError) -> Response<std::io::Cursor<Vec<u8>>> {
    erg_log::warn!(%err, "importer request failed");
    json_response(500, &serde_json::json!({ "error": "internal error" }))
}
