use std::sync::Arc;

use crossbeam::channel::Sender;

use crate::{Block, BlockFactory, BlockSchema, CancelToken, RegistryError};

/// The sending half of the channel a datasource streams its blocks into.
pub type BlockSender = Sender<Arc<dyn Block>>;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// The fetch was cancelled, or the consuming side went away.
    #[error("fetch cancelled")]
    Cancelled,

    #[error("datasource {datasource}: {reason}")]
    Datasource { datasource: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn datasource(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Datasource {
            datasource: name.into(),
            reason: reason.into(),
        }
    }
}

/// Somewhere ergs gets blocks from.
///
/// A datasource is one named, configured *instance* of an adapter *kind*
/// (e.g. instance `"my_github"` of kind `"github"`). Each call to
/// [`Datasource::fetch_blocks`] produces one lazy, finite batch of blocks.
///
/// The routing invariant: blocks sent through `out` must report the instance
/// name as their [`Block::source`] — that is what keeps one instance's blocks
/// out of its neighbors' stores. The built-in importer is the one sanctioned
/// exception: it stamps blocks with their *target* datasource so the warehouse
/// routes them onward.
pub trait Datasource: Send + Sync {
    /// The globally unique instance name.
    fn name(&self) -> &str;

    /// The adapter kind, `"type"` on the wire.
    fn kind(&self) -> &str;

    /// The metadata columns this datasource wants materialized in its store.
    fn schema(&self) -> BlockSchema;

    /// The factory used to rebuild this datasource's blocks from storage.
    fn block_prototype(&self) -> Arc<dyn BlockFactory>;

    fn set_config(&self, config: serde_json::Value) -> Result<(), RegistryError>;

    fn config(&self) -> serde_json::Value;

    /// Produce one finite batch of blocks into `out`.
    ///
    /// Must honor `token` at every suspension point — use [`send_block`] for
    /// back-pressured, cancellable sends. Returning [`FetchError::Cancelled`]
    /// after a cancelled send is expected and not treated as a failure.
    fn fetch_blocks(&self, token: &CancelToken, out: &BlockSender) -> Result<(), FetchError>;

    /// Release adapter resources. Called once, before the instance is dropped.
    fn close(&self) {}
}

impl std::fmt::Debug for dyn Datasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datasource")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Back-pressured send that honors cancellation while blocked.
pub fn send_block(
    token: &CancelToken,
    out: &BlockSender,
    block: Arc<dyn Block>,
) -> Result<(), FetchError> {
    if token.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    crossbeam::select! {
        send(out, block) -> res => res.map_err(|_| FetchError::Cancelled),
        recv(token.cancelled()) -> _ => Err(FetchError::Cancelled),
    }
}
