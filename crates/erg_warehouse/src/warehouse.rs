use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::HashMap;
use crossbeam::channel;
use parking_lot::Mutex;

use erg_store::StorageManager;
use erg_types::{Block, CancelToken, Datasource, SinkSet};

use crate::status::FetchStatus;
use crate::worker::{run_fetch, WorkerContext};

#[derive(Clone, Debug)]
pub struct WarehouseConfig {
    /// Default cadence for datasources that do not declare their own.
    pub fetch_interval: Duration,

    /// How often to run store maintenance across all open stores; zero
    /// disables it.
    pub optimize_interval: Duration,

    /// Soft deadline for [`Warehouse::stop`]. Workers still running past it
    /// are logged and abandoned, never crashed into.
    pub shutdown_deadline: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            fetch_interval: Duration::from_secs(30 * 60),
            optimize_interval: Duration::from_secs(60 * 60),
            shutdown_deadline: Duration::from_secs(30),
        }
    }
}

struct Worker {
    ctx: Arc<WorkerContext>,
    token: CancelToken,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Worker {
    fn cancel_and_join(&mut self, deadline: Duration) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            join_with_deadline(handle, deadline, &self.ctx.name);
        }
    }
}

/// The scheduler: one worker per datasource instance.
///
/// Workers run in parallel; within one worker there is never more than one
/// in-flight fetch. A datasource failing only ever affects its own worker —
/// neighbors keep their cadence and their stores.
pub struct Warehouse {
    config: WarehouseConfig,
    storage: Arc<StorageManager>,
    sinks: Arc<SinkSet>,
    workers: Mutex<HashMap<String, Worker>>,
    started: AtomicBool,
    token: CancelToken,
    optimizer: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Warehouse {
    pub fn new(config: WarehouseConfig, storage: Arc<StorageManager>, sinks: SinkSet) -> Self {
        Self {
            config,
            storage,
            sinks: Arc::new(sinks),
            workers: Mutex::new(HashMap::default()),
            started: AtomicBool::new(false),
            token: CancelToken::new(),
            optimizer: Mutex::new(None),
        }
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// Add `datasource` on the default cadence.
    pub fn add_datasource(&self, datasource: Arc<dyn Datasource>) {
        self.add_datasource_with_interval(datasource, self.config.fetch_interval);
    }

    /// Add (or replace) the worker for `datasource`, fetching every
    /// `interval`.
    ///
    /// Idempotent: replacing an existing worker cancels the old one first.
    /// Also configures the storage manager so the instance's own blocks have
    /// somewhere to land.
    pub fn add_datasource_with_interval(&self, datasource: Arc<dyn Datasource>, interval: Duration) {
        let name = datasource.name().to_owned();

        self.storage.configure_datasource(
            &name,
            datasource.kind(),
            datasource.schema(),
            Some(datasource.block_prototype()),
        );

        let ctx = Arc::new(WorkerContext {
            name: name.clone(),
            datasource,
            interval,
            storage: self.storage.clone(),
            sinks: self.sinks.clone(),
            status: Mutex::new(FetchStatus::default()),
            fetch_gate: Mutex::new(()),
        });

        let mut worker = Worker {
            ctx,
            token: CancelToken::new(),
            handle: None,
        };

        let mut workers = self.workers.lock();
        if let Some(mut old) = workers.remove(&name) {
            erg_log::info!(datasource = %name, "replacing worker");
            old.cancel_and_join(self.config.shutdown_deadline);
        }

        if self.started.load(Ordering::SeqCst) {
            spawn_worker(&mut worker);
        }
        workers.insert(name, worker);
    }

    /// Cancel and drain `name`'s worker. The store is left untouched.
    pub fn remove_datasource(&self, name: &str) -> bool {
        let removed = self.workers.lock().remove(name);
        match removed {
            Some(mut worker) => {
                worker.cancel_and_join(self.config.shutdown_deadline);
                erg_log::info!(datasource = %name, "removed worker");
                true
            }
            None => false,
        }
    }

    /// Swap the whole worker set in one call.
    ///
    /// Present workers not in `list` are cancelled; new ones are added;
    /// existing names are replaced (their in-flight fetch cancelled first).
    pub fn replace_all(&self, list: Vec<(Arc<dyn Datasource>, Duration)>) {
        let keep: Vec<String> = list.iter().map(|(ds, _)| ds.name().to_owned()).collect();

        let stale: Vec<String> = {
            let workers = self.workers.lock();
            workers
                .keys()
                .filter(|name| !keep.contains(name))
                .cloned()
                .collect()
        };
        for name in stale {
            self.remove_datasource(&name);
        }

        for (datasource, interval) in list {
            self.add_datasource_with_interval(datasource, interval);
        }
    }

    /// Launch every worker's fetch loop and the periodic optimizer; returns
    /// immediately. Each worker fetches once on startup, then on its
    /// interval.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        for worker in self.workers.lock().values_mut() {
            spawn_worker(worker);
        }

        if !self.config.optimize_interval.is_zero() {
            let storage = self.storage.clone();
            let token = self.token.clone();
            let interval = self.config.optimize_interval;
            let handle = std::thread::Builder::new()
                .name("warehouse-optimizer".into())
                .spawn(move || {
                    let ticker = channel::tick(interval);
                    loop {
                        crossbeam::select! {
                            recv(ticker) -> _ => storage.optimize_all(),
                            recv(token.cancelled()) -> _ => break,
                        }
                    }
                })
                .ok();
            *self.optimizer.lock() = handle;
        }

        erg_log::info!(workers = self.workers.lock().len(), "warehouse started");
    }

    /// One-shot fan-out: run a single fetch on every worker, in parallel,
    /// and wait for all of them.
    pub fn fetch_once(&self, token: &CancelToken) {
        self.fetch_once_inner(token, None);
    }

    /// Like [`Warehouse::fetch_once`], but tees every stored block to
    /// `on_block`, synchronously, as it is stored.
    pub fn fetch_once_streaming(&self, token: &CancelToken, on_block: &(dyn Fn(&dyn Block) + Sync)) {
        self.fetch_once_inner(token, Some(on_block));
    }

    fn fetch_once_inner(&self, token: &CancelToken, on_block: Option<&(dyn Fn(&dyn Block) + Sync)>) {
        let contexts: Vec<Arc<WorkerContext>> = self
            .workers
            .lock()
            .values()
            .map(|worker| worker.ctx.clone())
            .collect();

        std::thread::scope(|scope| {
            for ctx in &contexts {
                scope.spawn(move || run_fetch(ctx, token, on_block));
            }
        });
    }

    /// Current status of every worker, by instance name.
    pub fn status(&self) -> BTreeMap<String, FetchStatus> {
        self.workers
            .lock()
            .iter()
            .map(|(name, worker)| (name.clone(), worker.ctx.status()))
            .collect()
    }

    pub fn worker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cooperative shutdown: cancel every worker and wait (up to the soft
    /// deadline) for in-flight fetches to reach a suspension point and exit.
    pub fn stop(&self) {
        self.token.cancel();

        let mut workers = self.workers.lock();
        for worker in workers.values_mut() {
            worker.token.cancel();
        }
        for worker in workers.values_mut() {
            if let Some(handle) = worker.handle.take() {
                join_with_deadline(handle, self.config.shutdown_deadline, &worker.ctx.name);
            }
        }
        drop(workers);

        if let Some(handle) = self.optimizer.lock().take() {
            let _ = handle.join();
        }
        self.started.store(false, Ordering::SeqCst);
        erg_log::info!("warehouse stopped");
    }

    /// Stop and drop all workers.
    pub fn close(&self) {
        self.stop();
        self.workers.lock().clear();
    }
}

impl Drop for Warehouse {
    fn drop(&mut self) {
        if self.started.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

fn spawn_worker(worker: &mut Worker) {
    let ctx = worker.ctx.clone();
    let token = worker.token.clone();
    let handle = std::thread::Builder::new()
        .name(format!("warehouse-{}", ctx.name))
        .spawn(move || run_worker_loop(&ctx, &token));
    match handle {
        Ok(handle) => worker.handle = Some(handle),
        Err(err) => {
            erg_log::error!(datasource = %worker.ctx.name, %err, "failed to spawn worker");
        }
    }
}

fn run_worker_loop(ctx: &Arc<WorkerContext>, token: &CancelToken) {
    // Initial fetch on startup, then one per tick until cancelled.
    run_fetch(ctx, token, None);

    let ticker = channel::tick(ctx.interval);
    loop {
        crossbeam::select! {
            recv(ticker) -> _ => {
                if token.is_cancelled() {
                    break;
                }
                run_fetch(ctx, token, None);
            }
            recv(token.cancelled()) -> _ => break,
        }
    }
}

/// Join `handle`, but never for longer than `deadline` — a stuck worker is
/// logged and abandoned so shutdown cannot hang.
fn join_with_deadline(handle: std::thread::JoinHandle<()>, deadline: Duration, name: &str) {
    let end = Instant::now() + deadline;
    while !handle.is_finished() {
        if Instant::now() >= end {
            erg_log::warn!(datasource = %name, "worker did not stop within deadline; abandoning");
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let _ = handle.join();
}
