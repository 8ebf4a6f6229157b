use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// Cooperative cancellation, checked at every suspension point.
///
/// Cloned tokens share the same state. Cancellation is level-triggered and
/// irrevocable: once cancelled, [`CancelToken::cancelled`] is forever ready,
/// which makes it usable directly inside `crossbeam::select!` arms.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,

    // A zero-capacity channel whose sender is dropped on cancel: receivers
    // block while the token is live and fail fast once it is not.
    keepalive: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                keepalive: Mutex::new(Some(tx)),
                signal: rx,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.keepalive.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// A channel that becomes ready (disconnected) once the token is cancelled.
    ///
    /// For use in `crossbeam::select!`:
    /// ```ignore
    /// select! {
    ///     recv(ticker) -> _ => { /* work */ }
    ///     recv(token.cancelled()) -> _ => break,
    /// }
    /// ```
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// Sleep, waking early on cancellation. Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        match self.inner.signal.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_wakes_sleepers() {
        let token = CancelToken::new();
        let clone = token.clone();

        let handle = std::thread::spawn(move || clone.sleep(Duration::from_secs(60)));

        std::thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(handle.join().unwrap());
        assert!(token.is_cancelled());
    }

    #[test]
    fn sleep_times_out_while_live() {
        let token = CancelToken::new();
        assert!(!token.sleep(Duration::from_millis(10)));
    }
}
