//! The client side of the event bridge.
//!
//! Dials the Unix socket with exponential backoff, reads newline-framed JSON,
//! and forwards block events to the in-process hub. Malformed lines and
//! unknown event kinds are skipped; a lost connection reconnects.

use std::io::BufRead as _;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use erg_types::{CancelToken, WireEvent, MAX_EVENT_LINE_LEN};

use crate::{BridgeError, FirehoseHub};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const READ_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A background thread relaying bridge events into a [`FirehoseHub`].
pub struct BridgeConsumer {
    token: CancelToken,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl BridgeConsumer {
    pub fn start(
        socket_path: impl AsRef<Path>,
        hub: Arc<FirehoseHub>,
    ) -> Result<Self, BridgeError> {
        let socket_path = socket_path.as_ref().to_owned();
        let token = CancelToken::new();

        let run_token = token.clone();
        let handle = std::thread::Builder::new()
            .name("bridge-consumer".into())
            .spawn(move || run(&socket_path, &hub, &run_token))
            .map_err(|source| BridgeError::Spawn {
                thread: "bridge-consumer",
                source,
            })?;

        Ok(Self {
            token,
            handle: Some(handle),
        })
    }

    /// Stop relaying and wait for the reader thread to exit.
    pub fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BridgeConsumer {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(socket_path: &Path, hub: &FirehoseHub, token: &CancelToken) {
    let mut backoff = INITIAL_BACKOFF;

    while !token.is_cancelled() {
        match UnixStream::connect(socket_path) {
            Ok(stream) => {
                erg_log::info!(socket = %socket_path.display(), "connected to event bridge");
                backoff = INITIAL_BACKOFF;
                read_stream(stream, hub, token);
                if !token.is_cancelled() {
                    erg_log::info!("event bridge connection lost, reconnecting");
                }
            }
            Err(err) => {
                erg_log::warn_once!(
                    "event bridge not reachable at {}: {err} (retrying)",
                    socket_path.display()
                );
                if token.sleep(backoff) {
                    break;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

fn read_stream(stream: UnixStream, hub: &FirehoseHub, token: &CancelToken) {
    // Bounded read timeout so cancellation is honored while the socket is
    // quiet.
    if stream.set_read_timeout(Some(READ_POLL_INTERVAL)).is_err() {
        return;
    }

    let mut reader = std::io::BufReader::with_capacity(MAX_EVENT_LINE_LEN, stream);
    let mut line = String::new();

    loop {
        match reader.read_line(&mut line) {
            Ok(0) => return, // EOF
            Ok(_) => {
                handle_line(line.trim_end(), hub);
                line.clear();
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                // A partial line stays buffered in `line` and is finished on
                // the next pass.
                if token.is_cancelled() {
                    return;
                }
            }
            Err(_) => return,
        }

        if line.len() > MAX_EVENT_LINE_LEN {
            erg_log::warn!(len = line.len(), "oversized bridge frame, dropping");
            line.clear();
        }
    }
}

fn handle_line(line: &str, hub: &FirehoseHub) {
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<WireEvent>(line) {
        Ok(WireEvent::Block(block)) => hub.broadcast(&block),
        Ok(_) => {} // heartbeat / info / error / unknown: nothing to relay
        Err(err) => {
            erg_log::debug!(%err, "skipping malformed bridge frame");
        }
    }
}
