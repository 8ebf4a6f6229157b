use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchState {
    #[default]
    Idle,
    Fetching,
}

/// Per-worker bookkeeping, readable through [`crate::Warehouse::status`].
#[derive(Clone, Debug, Default)]
pub struct FetchStatus {
    pub state: FetchState,

    /// When the current (or most recent) fetch started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the most recent fetch finished.
    pub finished_at: Option<DateTime<Utc>>,

    /// The most recent fetch failure. Cleared by the next successful fetch.
    pub last_error: Option<String>,

    /// Completed fetches since the worker was created.
    pub fetch_count: u64,

    /// Blocks persisted across all fetches.
    pub blocks_stored: u64,

    /// Blocks dropped because their `source` matched no configured store.
    pub blocks_dropped: u64,
}
