//! Tokio-backed execution engine.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::warn;

use crate::core::engine::{EngineCounters, EngineRejection, EngineStats, ExecutionEngine};
use crate::core::{AdmittedWork, PoolError};

/// Engine that runs admitted work on a tokio runtime's blocking pool.
///
/// At most `max_in_flight` items run at once; further work is refused with
/// [`PoolError::QueueFull`] rather than queued behind tokio's blocking pool.
#[derive(Clone)]
pub struct TokioEngine {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    counters: Arc<EngineCounters>,
}

impl std::fmt::Debug for TokioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioEngine")
            .field("max_in_flight", &self.max_in_flight)
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl TokioEngine {
    /// Create an engine on the runtime behind `handle`.
    #[must_use]
    pub fn new(handle: Handle, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            counters: Arc::new(EngineCounters::default()),
        }
    }

    /// Create an engine on the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Internal` when called outside a tokio runtime.
    pub fn current(max_in_flight: usize) -> Result<Self, PoolError> {
        let handle = Handle::try_current().map_err(|e| PoolError::Internal(e.to_string()))?;
        Ok(Self::new(handle, max_in_flight))
    }

    /// Stop accepting work. Running work finishes normally.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl ExecutionEngine for TokioEngine {
    fn execute(&self, work: AdmittedWork) -> Result<(), EngineRejection> {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    category = %work.category(),
                    max_in_flight = self.max_in_flight,
                    "tokio engine at capacity"
                );
                return Err(EngineRejection::new(work, PoolError::QueueFull));
            }
            Err(TryAcquireError::Closed) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(EngineRejection::new(work, PoolError::PoolShutdown));
            }
        };

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let counters = Arc::clone(&self.counters);
        self.handle.spawn_blocking(move || {
            let _permit = permit;
            counters.run(work);
        });
        Ok(())
    }

    fn stats(&self) -> EngineStats {
        let in_flight = self.max_in_flight - self.permits.available_permits().min(self.max_in_flight);
        let mut stats = EngineStats {
            queue_capacity: self.max_in_flight,
            live_workers: in_flight,
            max_workers: self.max_in_flight,
            ..EngineStats::default()
        };
        self.counters.fill(&mut stats);
        stats
    }
}
