//! OS-thread implementation of `WorkerPool`.
//!
//! # Design Principles
//!
//! - **No polling**: core workers block on `recv`, burst workers on `recv_timeout`
//! - **Short fast path**: submission takes the sender lock for one `try_send`, then
//!   updates atomic counters
//! - **Clean shutdown**: dropping the sender lets workers drain the queue and exit

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::engine::{EngineCounters, EngineRejection, EngineStats, ExecutionEngine};
use crate::core::submitter::AdmittedWork;

use super::PoolError;

/// State shared between the pool handle and its workers.
struct PoolShared {
    config: WorkerPoolConfig,
    task_rx: Receiver<AdmittedWork>,
    counters: EngineCounters,
    /// Workers alive, busy or idle.
    live: AtomicUsize,
    /// Workers blocked waiting for work.
    idle: AtomicUsize,
    next_worker_id: AtomicUsize,
}

/// Worker pool with dedicated OS threads for admitted work.
///
/// # Design
///
/// - **Elastic**: `core_workers` permanent threads plus burst threads up to `max_workers`
/// - **Bounded**: at most `max_queue_depth` items wait for a worker
/// - **Clean shutdown**: [`shutdown`](Self::shutdown) drains the queue and joins workers;
///   dropping the pool only signals them
pub struct WorkerPool {
    shared: Arc<PoolShared>,

    /// Task sender (to workers). Option allows clean shutdown by dropping.
    task_tx: Mutex<Option<Sender<AdmittedWork>>>,

    /// Shutdown flag (lock-free atomic).
    shutdown: AtomicBool,

    /// Worker thread handles; finished burst workers are pruned on spawn.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("live", &self.shared.live.load(Ordering::Relaxed))
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Create a pool and start its core workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid, or
    /// `PoolError::Internal` if a core worker thread cannot be spawned.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = bounded::<AdmittedWork>(config.max_queue_depth);
        let shared = Arc::new(PoolShared {
            config,
            task_rx,
            counters: EngineCounters::default(),
            live: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(0),
        });

        let mut workers = Vec::with_capacity(shared.config.core_workers);
        for _ in 0..shared.config.core_workers {
            shared.live.fetch_add(1, Ordering::AcqRel);
            match spawn_worker(&shared, WorkerKind::Core) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shared.live.fetch_sub(1, Ordering::AcqRel);
                    // dropping the sender releases the workers already started
                    drop(task_tx);
                    return Err(PoolError::Internal(format!("failed to spawn worker: {e}")));
                }
            }
        }

        info!(
            core_workers = shared.config.core_workers,
            max_workers = shared.config.max_workers,
            max_queue_depth = shared.config.max_queue_depth,
            "WorkerPool initialized with dedicated OS threads"
        );

        Ok(Self {
            shared,
            task_tx: Mutex::new(Some(task_tx)),
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue admitted work.
    ///
    /// # Errors
    ///
    /// Hands the work back with `PoolError::QueueFull` if the queue is full or
    /// `PoolError::PoolShutdown` if the pool has been shut down.
    pub fn submit(&self, work: AdmittedWork) -> Result<(), EngineRejection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(self.refuse(work, PoolError::PoolShutdown));
        }

        let task_tx_guard = self.task_tx.lock();
        let Some(task_tx) = task_tx_guard.as_ref() else {
            return Err(self.refuse(work, PoolError::PoolShutdown));
        };

        match task_tx.try_send(work) {
            Ok(()) => {
                drop(task_tx_guard);
                self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
                self.maybe_spawn_burst();
                Ok(())
            }
            Err(TrySendError::Full(work)) => {
                drop(task_tx_guard);
                warn!(
                    category = %work.category(),
                    queue_depth = self.shared.task_rx.len(),
                    "Worker pool queue is full"
                );
                Err(self.refuse(work, PoolError::QueueFull))
            }
            Err(TrySendError::Disconnected(work)) => {
                drop(task_tx_guard);
                Err(self.refuse(work, PoolError::PoolShutdown))
            }
        }
    }

    fn refuse(&self, work: AdmittedWork, error: PoolError) -> EngineRejection {
        self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
        EngineRejection::new(work, error)
    }

    /// Start a burst worker if nobody is idle and the pool is below `max_workers`.
    fn maybe_spawn_burst(&self) {
        if self.shared.idle.load(Ordering::Acquire) > 0 {
            return;
        }
        let max = self.shared.config.max_workers;
        let reserved = self
            .shared
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| (live < max).then_some(live + 1));
        if reserved.is_err() {
            return;
        }

        match spawn_worker(&self.shared, WorkerKind::Burst) {
            Ok(handle) => {
                let mut workers = self.workers.lock();
                workers.retain(|w| !w.is_finished());
                workers.push(handle);
            }
            Err(e) => {
                self.shared.live.fetch_sub(1, Ordering::AcqRel);
                error!(error = %e, "Failed to spawn burst worker");
            }
        }
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            queue_depth: self.shared.task_rx.len(),
            queue_capacity: self.shared.config.max_queue_depth,
            live_workers: self.shared.live.load(Ordering::Relaxed),
            core_workers: self.shared.config.core_workers,
            max_workers: self.shared.config.max_workers,
            ..EngineStats::default()
        };
        self.shared.counters.fill(&mut stats);
        stats
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }

    /// Shut down the pool gracefully with timeout.
    ///
    /// This drops the task sender so workers drain the queue and exit, then attempts
    /// to join all workers with a reasonable timeout (2 seconds per worker).
    ///
    /// Workers that don't exit within the timeout are detached to prevent hangs.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(queued = self.shared.task_rx.len(), "Shutting down worker pool");

        {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }

        let mut workers = self.workers.lock();
        let worker_count = workers.len();

        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = bounded::<bool>(1);
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => {
                    debug!(worker_id = idx, "Worker joined successfully");
                    let _ = join_thread.join();
                }
                Ok(false) => {
                    warn!(worker_id = idx, "Worker panicked");
                    let _ = join_thread.join();
                }
                Err(_) => {
                    warn!(worker_id = idx, "Worker did not exit within timeout - detaching");
                }
            }
        }

        info!(worker_count = worker_count, "Worker pool shut down complete");
    }
}

impl ExecutionEngine for WorkerPool {
    fn execute(&self, work: AdmittedWork) -> Result<(), EngineRejection> {
        self.submit(work)
    }

    fn stats(&self) -> EngineStats {
        Self::stats(self)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join workers in Drop; explicit shutdown() joins.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerKind {
    Core,
    Burst,
}

/// Spawn a worker thread. The caller has already counted it in `live`.
fn spawn_worker(shared: &Arc<PoolShared>, kind: WorkerKind) -> std::io::Result<JoinHandle<()>> {
    let worker_id = shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
    let shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("{}-{worker_id}", shared.config.thread_name_prefix))
        .stack_size(shared.config.thread_stack_size)
        .spawn(move || worker_loop(&shared, worker_id, kind))
}

fn worker_loop(shared: &PoolShared, worker_id: usize, kind: WorkerKind) {
    debug!(worker_id = worker_id, kind = ?kind, "Worker thread started");
    let keep_alive = shared.config.keep_alive();

    loop {
        shared.idle.fetch_add(1, Ordering::AcqRel);
        let next = match kind {
            WorkerKind::Core => shared
                .task_rx
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
            WorkerKind::Burst => shared.task_rx.recv_timeout(keep_alive),
        };
        shared.idle.fetch_sub(1, Ordering::AcqRel);

        match next {
            Ok(work) => {
                debug!(
                    worker_id = worker_id,
                    category = %work.category(),
                    lease_id = work.lease_id(),
                    "Worker executing task"
                );
                shared.counters.run(work);
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!(worker_id = worker_id, "Burst worker idle past keep-alive, exiting");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(worker_id = worker_id, "Worker channel closed, exiting");
                break;
            }
        }
    }

    shared.live.fetch_sub(1, Ordering::AcqRel);
}
