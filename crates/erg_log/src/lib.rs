//! Stderr diagnostics for the ergs crates — what the engine *prints*, not the
//! blocks it stores.
//!
//! Pick a level by audience: `trace`/`debug` are for whoever is chasing a
//! problem, `info` is for an operator watching a healthy run, `warn` means
//! something went wrong but ergs carried on, and `error` means functionality
//! or data was actually lost.
//!
//! A long-running scheduler repeats itself: a flaky datasource or a broken
//! store would otherwise emit the same line every fetch cycle. Reach for the
//! `*_once` variants in those spots; they fire a given message once per
//! process.

// The tracing macros support more syntax features than the log ones, that's why we use them:
pub use tracing::{debug, error, info, trace, warn};

pub use log_once::{debug_once, error_once, info_once, trace_once, warn_once};

pub use log::{Level, LevelFilter};

#[cfg(feature = "setup")]
mod setup;

#[cfg(feature = "setup")]
pub use setup::setup_logging;

/// The default log filter applied by [`setup_logging`], unless `RUST_LOG` says otherwise.
pub fn default_log_filter() -> String {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        rust_log
    } else if cfg!(debug_assertions) {
        "debug".to_owned()
    } else {
        "info".to_owned()
    }
}
