//! The per-fetch protocol shared by scheduled workers and one-shot fans.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam::channel;
use parking_lot::Mutex;

use erg_store::StorageManager;
use erg_types::{
    Block, BlockEvent, CancelToken, Datasource, EventSink, FetchError, SinkSet, WireEvent,
};

use crate::status::{FetchState, FetchStatus};

/// Back-pressure window between a datasource and its worker: a producer that
/// outruns storage blocks on the channel, where cancellation still reaches it.
const FETCH_CHANNEL_CAPACITY: usize = 128;

/// How long to wait, after cancellation, for a datasource that is ignoring
/// its token before abandoning the fetch thread.
const FETCH_ABANDON_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) type BlockCallback<'a> = &'a (dyn Fn(&dyn Block) + Sync);

/// Everything one worker needs to run fetches; shared between its scheduled
/// loop and [`crate::Warehouse::fetch_once`].
pub(crate) struct WorkerContext {
    pub name: String,
    pub datasource: Arc<dyn Datasource>,
    pub interval: Duration,
    pub storage: Arc<StorageManager>,
    pub sinks: Arc<SinkSet>,
    pub status: Mutex<FetchStatus>,

    /// At most one in-flight fetch per instance, no matter who triggers it.
    pub fetch_gate: Mutex<()>,
}

impl WorkerContext {
    pub fn status(&self) -> FetchStatus {
        self.status.lock().clone()
    }
}

/// One complete fetch: start the datasource, drain its stream, route and
/// persist every block, publish events, record status.
pub(crate) fn run_fetch(ctx: &WorkerContext, token: &CancelToken, on_block: Option<BlockCallback<'_>>) {
    let _in_flight = ctx.fetch_gate.lock();
    if token.is_cancelled() {
        return;
    }

    {
        let mut status = ctx.status.lock();
        status.state = FetchState::Fetching;
        status.started_at = Some(Utc::now());
    }
    erg_log::debug!(datasource = %ctx.name, "fetch started");

    let (block_tx, block_rx) = channel::bounded::<Arc<dyn Block>>(FETCH_CHANNEL_CAPACITY);
    let (result_tx, result_rx) = channel::bounded::<Result<(), FetchError>>(1);

    let datasource = ctx.datasource.clone();
    let fetch_token = token.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("fetch-{}", ctx.name))
        .spawn(move || {
            let result = datasource.fetch_blocks(&fetch_token, &block_tx);
            // `block_tx` drops here, closing the stream for the drain loop.
            let _ = result_tx.send(result);
        });
    if let Err(err) = spawned {
        erg_log::error!(datasource = %ctx.name, %err, "failed to spawn fetch thread");
        finish_fetch(ctx, Some(format!("spawn failed: {err}")));
        return;
    }

    loop {
        crossbeam::select! {
            recv(block_rx) -> received => match received {
                Ok(block) => handle_block(ctx, block.as_ref(), on_block),
                Err(_) => break, // stream closed: the fetch is done
            },
            recv(token.cancelled()) -> _ => {
                erg_log::debug!(datasource = %ctx.name, "fetch cancelled");
                break;
            }
        }
    }

    // The datasource honors cancellation at every suspension point, so its
    // thread ends promptly once we stop draining. A datasource that does not
    // gets abandoned, not waited on forever.
    let error = match result_rx.recv_timeout(FETCH_ABANDON_TIMEOUT) {
        Ok(Ok(())) => None,
        Ok(Err(FetchError::Cancelled)) => None,
        Ok(Err(err)) => {
            erg_log::warn!(datasource = %ctx.name, %err, "fetch failed; retrying next interval");
            Some(err.to_string())
        }
        Err(_) => {
            erg_log::warn!(
                datasource = %ctx.name,
                "datasource ignored cancellation; abandoning fetch thread"
            );
            Some("datasource ignored cancellation".to_owned())
        }
    };

    finish_fetch(ctx, error);
}

fn finish_fetch(ctx: &WorkerContext, error: Option<String>) {
    let mut status = ctx.status.lock();
    status.state = FetchState::Idle;
    status.finished_at = Some(Utc::now());
    status.fetch_count += 1;
    status.last_error = error;
    erg_log::debug!(
        datasource = %ctx.name,
        stored = status.blocks_stored,
        dropped = status.blocks_dropped,
        "fetch finished"
    );
}

/// Route one block by its `source` and persist it.
///
/// Blocks whose source matches no configured datasource are dropped with a
/// warning — that is what lets the importer stamp blocks with arbitrary
/// targets without contaminating arbitrary store files. A storage failure
/// skips the block; the id is stable, so the next fetch retries it.
fn handle_block(ctx: &WorkerContext, block: &dyn Block, on_block: Option<BlockCallback<'_>>) {
    let target = block.source();

    if !ctx.storage.is_configured(target) {
        erg_log::warn!(
            datasource = %target,
            block = %block.id(),
            "dropping block routed to unconfigured datasource"
        );
        ctx.status.lock().blocks_dropped += 1;
        return;
    }

    let ds_type = ctx
        .storage
        .configured_kind(target)
        .unwrap_or_else(|| block.kind().to_owned());

    let store = match ctx.storage.get_store(target) {
        Ok(store) => store,
        Err(err) => {
            erg_log::warn!(datasource = %target, %err, "no store for block, dropping");
            ctx.status.lock().blocks_dropped += 1;
            return;
        }
    };

    if let Err(err) = store.store_block(block, &ds_type) {
        erg_log::warn!(
            datasource = %target,
            block = %block.id(),
            %err,
            "failed to store block, skipping"
        );
        return;
    }

    ctx.status.lock().blocks_stored += 1;

    // Best-effort announcements; a slow firehose never stalls the fetch.
    ctx.sinks
        .publish(&WireEvent::Block(BlockEvent::from_block(block, &ds_type)));

    if let Some(callback) = on_block {
        callback(block);
    }
}
