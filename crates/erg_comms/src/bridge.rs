//! The producer side of the firehose: a Unix-domain pub-sub socket.
//!
//! Each accepted connection gets its own bounded queue and writer thread; the
//! publisher serializes an event once and `try_send`s the line to every
//! subscriber. A full queue means that subscriber misses the event — the
//! warehouse must never stall on a slow reader.

use std::io::Write as _;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;

use erg_types::{CancelToken, EventSink, WireEvent, MAX_EVENT_LINE_LEN};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const SUBSCRIBER_QUEUE_LEN: usize = 256;
pub(crate) const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("event socket {}: {source}", path.display())]
    Socket {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("spawning {thread} thread: {source}")]
    Spawn {
        thread: &'static str,
        source: std::io::Error,
    },
}

struct Subscriber {
    tx: Sender<Arc<str>>,
}

struct Inner {
    socket_path: PathBuf,
    subscribers: Mutex<Vec<Subscriber>>,
    token: CancelToken,
    dropped: AtomicU64,
}

/// The Unix-socket event publisher.
///
/// Dropping the bridge (or calling [`EventBridge::shutdown`]) stops the
/// accept loop, disconnects subscribers, and unlinks the socket file.
pub struct EventBridge {
    inner: Arc<Inner>,
}

impl EventBridge {
    /// Bind `socket_path` and start accepting subscribers.
    ///
    /// A stale socket file from a previous run is replaced.
    pub fn start(socket_path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        Self::start_with_heartbeat(socket_path, DEFAULT_HEARTBEAT_INTERVAL)
    }

    pub fn start_with_heartbeat(
        socket_path: impl AsRef<Path>,
        heartbeat: Duration,
    ) -> Result<Self, BridgeError> {
        let socket_path = socket_path.as_ref().to_owned();
        let io_err = |source| BridgeError::Socket {
            path: socket_path.clone(),
            source,
        };

        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(io_err)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(io_err)?;
        listener.set_nonblocking(true).map_err(io_err)?;

        let inner = Arc::new(Inner {
            socket_path: socket_path.clone(),
            subscribers: Mutex::new(Vec::new()),
            token: CancelToken::new(),
            dropped: AtomicU64::new(0),
        });

        let accept_inner = inner.clone();
        std::thread::Builder::new()
            .name("event-bridge-accept".into())
            .spawn(move || accept_loop(&accept_inner, listener))
            .map_err(io_err)?;

        if !heartbeat.is_zero() {
            let heartbeat_inner = inner.clone();
            std::thread::Builder::new()
                .name("event-bridge-heartbeat".into())
                .spawn(move || heartbeat_loop(&heartbeat_inner, heartbeat))
                .map_err(io_err)?;
        }

        erg_log::info!(socket = %socket_path.display(), "event bridge listening");
        Ok(Self { inner })
    }

    pub fn socket_path(&self) -> &Path {
        &self.inner.socket_path
    }

    /// Serialize once, enqueue everywhere; drop per subscriber on overflow.
    pub fn publish(&self, event: &WireEvent) {
        publish_line(&self.inner, event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Events dropped on full subscriber queues since startup.
    pub fn events_dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        if self.inner.token.is_cancelled() {
            return;
        }
        self.inner.token.cancel();
        // Dropping the senders lets every writer thread drain and exit.
        self.inner.subscribers.lock().clear();
        let _ = std::fs::remove_file(&self.inner.socket_path);
        erg_log::info!(socket = %self.inner.socket_path.display(), "event bridge stopped");
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EventSink for EventBridge {
    fn publish(&self, event: &WireEvent) {
        publish_line(&self.inner, event);
    }
}

fn publish_line(inner: &Inner, event: &WireEvent) {
    let line = match serde_json::to_string(event) {
        Ok(line) => line,
        Err(err) => {
            erg_log::warn_once!("unencodable bridge event: {err}");
            return;
        }
    };
    if line.len() >= MAX_EVENT_LINE_LEN {
        erg_log::warn!(len = line.len(), "bridge event exceeds frame limit, skipping");
        return;
    }
    let line: Arc<str> = line.into();

    let mut subscribers = inner.subscribers.lock();
    subscribers.retain(|subscriber| match subscriber.tx.try_send(line.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    });
}

fn accept_loop(inner: &Inner, listener: UnixListener) {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = add_subscriber(inner, stream) {
                    erg_log::warn!(%err, "failed to set up bridge subscriber");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                if inner.token.sleep(ACCEPT_POLL_INTERVAL) {
                    break;
                }
            }
            Err(err) => {
                erg_log::warn!(%err, "event bridge accept failed");
                if inner.token.sleep(ACCEPT_POLL_INTERVAL) {
                    break;
                }
            }
        }
    }
    let _ = std::fs::remove_file(&inner.socket_path);
}

fn add_subscriber(inner: &Inner, stream: UnixStream) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    let (tx, rx) = channel::bounded::<Arc<str>>(SUBSCRIBER_QUEUE_LEN);

    std::thread::Builder::new()
        .name("event-bridge-writer".into())
        .spawn(move || {
            let mut stream = stream;
            for line in rx {
                if stream
                    .write_all(line.as_bytes())
                    .and_then(|()| stream.write_all(b"\n"))
                    .and_then(|()| stream.flush())
                    .is_err()
                {
                    // Subscriber went away; the publisher prunes us on the
                    // next try_send.
                    break;
                }
            }
        })?;

    inner.subscribers.lock().push(Subscriber { tx });
    erg_log::debug!("bridge subscriber connected");
    Ok(())
}

fn heartbeat_loop(inner: &Inner, interval: Duration) {
    let ticker = channel::tick(interval);
    loop {
        crossbeam::select! {
            recv(ticker) -> _ => {
                publish_line(inner, &WireEvent::heartbeat(chrono::Utc::now()));
            }
            recv(inner.token.cancelled()) -> _ => break,
        }
    }
}
