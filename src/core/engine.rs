//! Execution engines that run admitted work.
//!
//! Admission decides *whether* work may start; an [`ExecutionEngine`] decides *where*
//! and *when* it runs. Engines have their own bounded capacity and may refuse work that
//! was already admitted, in which case they hand it back inside an [`EngineRejection`]
//! so the caller can fail it and return its slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::core::submitter::AdmittedWork;
use crate::core::worker_pool::PoolError;
use crate::core::WorkOutcome;

/// Work an engine refused, returned to the submitter untouched.
#[derive(Debug)]
pub struct EngineRejection {
    /// The refused work; its lease is still held.
    pub work: AdmittedWork,
    /// Why the engine refused it.
    pub error: PoolError,
}

impl EngineRejection {
    /// Pair refused work with its cause.
    #[must_use]
    pub const fn new(work: AdmittedWork, error: PoolError) -> Self {
        Self { work, error }
    }
}

/// Schedules and runs admitted work.
pub trait ExecutionEngine: Send + Sync {
    /// Accept `work` for execution.
    ///
    /// # Errors
    ///
    /// Returns the work back with the cause when the engine cannot take it.
    fn execute(&self, work: AdmittedWork) -> Result<(), EngineRejection>;

    /// Current utilization.
    fn stats(&self) -> EngineStats;
}

impl<E: ExecutionEngine + ?Sized> ExecutionEngine for Arc<E> {
    fn execute(&self, work: AdmittedWork) -> Result<(), EngineRejection> {
        (**self).execute(work)
    }

    fn stats(&self) -> EngineStats {
        (**self).stats()
    }
}

/// Point-in-time engine utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Work waiting in the run queue.
    pub queue_depth: usize,
    /// Run queue capacity.
    pub queue_capacity: usize,
    /// Workers currently running work.
    pub active_workers: usize,
    /// Workers alive, busy or idle.
    pub live_workers: usize,
    /// Workers kept alive while idle.
    pub core_workers: usize,
    /// Upper bound on live workers.
    pub max_workers: usize,
    /// Work accepted.
    pub submitted: u64,
    /// Work that ran to completion.
    pub completed: u64,
    /// Work that panicked.
    pub panicked: u64,
    /// Work refused by the engine.
    pub rejected: u64,
}

/// Lock-free counters shared by engine implementations.
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub panicked: AtomicU64,
    pub rejected: AtomicU64,
    pub active: AtomicU64,
}

impl EngineCounters {
    /// Run `work` on the current thread and account for its outcome.
    pub fn run(&self, work: AdmittedWork) {
        self.active.fetch_add(1, Ordering::Relaxed);
        let outcome = work.run();
        self.active.fetch_sub(1, Ordering::Relaxed);
        match outcome {
            WorkOutcome::Completed => self.completed.fetch_add(1, Ordering::Relaxed),
            WorkOutcome::Failed(_) => self.panicked.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Fill the counter fields of `stats`.
    pub fn fill(&self, stats: &mut EngineStats) {
        stats.active_workers = usize::try_from(self.active.load(Ordering::Relaxed)).unwrap_or(usize::MAX);
        stats.submitted = self.submitted.load(Ordering::Relaxed);
        stats.completed = self.completed.load(Ordering::Relaxed);
        stats.panicked = self.panicked.load(Ordering::Relaxed);
        stats.rejected = self.rejected.load(Ordering::Relaxed);
    }
}

/// Runs work synchronously on the submitting thread. Never rejects.
#[derive(Debug, Default)]
pub struct InlineEngine {
    counters: EngineCounters,
}

impl InlineEngine {
    /// Create an inline engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionEngine for InlineEngine {
    fn execute(&self, work: AdmittedWork) -> Result<(), EngineRejection> {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.counters.run(work);
        Ok(())
    }

    fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            core_workers: 1,
            max_workers: 1,
            live_workers: 1,
            ..EngineStats::default()
        };
        self.counters.fill(&mut stats);
        stats
    }
}
