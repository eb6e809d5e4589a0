//! Submission façade: admit, wrap, and hand work to an engine.
//!
//! [`Submitter::submit`] is the entry point callers use. Admission is fail-fast: a
//! rejected work item is marked failed and completed on the caller's thread and
//! never runs. Admitted work is wrapped in an [`AdmittedWork`] whose
//! [`run`](AdmittedWork::run) releases the lease exactly once, whatever the work
//! does, before completing it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::core::engine::{EngineRejection, ExecutionEngine};
use crate::core::watchdog::Watchdog;
use crate::core::{AdmissionError, Controller, SlotLease, Work, WorkFailure, WorkOutcome};
use crate::util::telemetry::ADMISSION_TARGET;

/// Admitted work holding its lease, ready for an engine.
pub struct AdmittedWork {
    work: Box<dyn Work>,
    lease: SlotLease,
    label: Option<String>,
    submitted_at_ms: u64,
    timeout: Option<std::time::Duration>,
    watchdog: Option<Arc<dyn Watchdog>>,
}

impl std::fmt::Debug for AdmittedWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmittedWork")
            .field("category", &self.category())
            .field("name", &self.label)
            .field("lease_id", &self.lease.id())
            .field("submitted_at_ms", &self.submitted_at_ms)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AdmittedWork {
    /// Category the work was admitted against.
    #[must_use]
    pub fn category(&self) -> &str {
        self.lease.category().name()
    }

    /// Diagnostic name of the work, if it has one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Identifier of the lease backing this work.
    #[must_use]
    pub fn lease_id(&self) -> u64 {
        self.lease.id()
    }

    /// Admission timestamp in milliseconds.
    #[must_use]
    pub const fn submitted_at_ms(&self) -> u64 {
        self.submitted_at_ms
    }

    /// Run the work on the current thread.
    ///
    /// The lease is released once the work returns or panics, then the work's
    /// completion contract fires. Panics are contained and reported as
    /// [`WorkFailure::Panicked`].
    pub fn run(self) -> WorkOutcome {
        let Self {
            mut work,
            mut lease,
            label,
            timeout,
            watchdog,
            ..
        } = self;

        let watch = match (timeout, watchdog.as_deref()) {
            (Some(timeout), Some(watchdog)) => {
                let task = label.as_deref().unwrap_or_else(|| lease.category().name());
                Some(watchdog.monitor(task, timeout))
            }
            _ => None,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| work.run()));

        if let Some(watch) = watch {
            watch.cancel();
            if watch.is_expired() {
                warn!(
                    target: ADMISSION_TARGET,
                    category = %lease.category().name(),
                    lease_id = lease.id(),
                    elapsed = ?lease.elapsed(),
                    "work finished after its timeout expired"
                );
            }
        }

        release_lease(&mut lease);

        match result {
            Ok(()) => {
                settle(&mut *work, None, lease.category().name());
                WorkOutcome::Completed
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(
                    category = %lease.category().name(),
                    lease_id = lease.id(),
                    name = label.as_deref().unwrap_or(""),
                    panic = %message,
                    "work panicked"
                );
                let failure = WorkFailure::Panicked(message);
                settle(&mut *work, Some(failure.clone()), lease.category().name());
                WorkOutcome::Failed(failure)
            }
        }
    }

    /// Release the lease without running, then fail and complete the work.
    pub(crate) fn fail(self, cause: WorkFailure) {
        let Self {
            mut work, mut lease, ..
        } = self;
        release_lease(&mut lease);
        settle(&mut *work, Some(cause), lease.category().name());
    }
}

fn release_lease(lease: &mut SlotLease) {
    if let Err(e) = lease.release() {
        error!(error = %e, "failed to release lease for admitted work");
    }
}

/// Fire the completion contract. Panics in user callbacks are logged and dropped.
fn settle(work: &mut dyn Work, failure: Option<WorkFailure>, category: &str) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Some(failure) = failure {
            work.mark_failed(failure);
        }
        work.complete();
    }));
    if let Err(payload) = outcome {
        error!(
            category = category,
            name = work.name().unwrap_or(""),
            panic = %panic_message(&*payload),
            "work completion callback panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Admission-controlled entry point for work.
pub struct Submitter<E: ExecutionEngine> {
    controller: Controller,
    engine: E,
    watchdog: Option<Arc<dyn Watchdog>>,
}

impl<E: ExecutionEngine> std::fmt::Debug for Submitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("controller", &self.controller.id())
            .field("engine", &self.engine.stats())
            .field("watchdog", &self.watchdog.is_some())
            .finish()
    }
}

impl<E: ExecutionEngine> Submitter<E> {
    /// Submitter admitting through `controller` and running on `engine`.
    pub const fn new(controller: Controller, engine: E) -> Self {
        Self {
            controller,
            engine,
            watchdog: None,
        }
    }

    /// Supervise work that declares a timeout.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: Arc<dyn Watchdog>) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Controller used for admission.
    pub const fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Engine running admitted work.
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Admit `work` and hand it to the engine. Returns the lease id on success.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Rejected`] when the category is at its limit; the work is
    ///   marked failed and completed without running
    /// - [`AdmissionError::EngineRejected`] when the engine refuses the admitted work;
    ///   the lease is released and the work is marked failed and completed
    pub fn submit<W: Work>(&self, work: W) -> Result<u64, AdmissionError> {
        self.submit_boxed(Box::new(work))
    }

    /// [`submit`](Self::submit) for already boxed work.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn submit_boxed(&self, mut work: Box<dyn Work>) -> Result<u64, AdmissionError> {
        let category = self.controller.get_category(work.category());

        let lease = match category.try_admit() {
            Ok(lease) => lease,
            Err(err) => {
                settle(&mut *work, Some(WorkFailure::Rejected(err.to_string())), category.name());
                return Err(err);
            }
        };
        // released by `AdmittedWork::run`/`fail`, or by the drop path if the engine loses it
        lease.supervise();

        let lease_id = lease.id();
        let admitted = AdmittedWork {
            label: work.name().map(str::to_owned),
            timeout: work.timeout(),
            submitted_at_ms: lease.granted_at_ms(),
            watchdog: self.watchdog.clone(),
            work,
            lease,
        };

        match self.engine.execute(admitted) {
            Ok(()) => {
                debug!(
                    controller = %self.controller.id(),
                    category = %category.name(),
                    lease_id = lease_id,
                    "work handed to engine"
                );
                Ok(lease_id)
            }
            Err(EngineRejection { work, error }) => {
                warn!(
                    controller = %self.controller.id(),
                    category = %category.name(),
                    lease_id = lease_id,
                    error = %error,
                    "engine rejected admitted work"
                );
                work.fail(WorkFailure::EngineRejected(error.to_string()));
                Err(AdmissionError::EngineRejected {
                    category: category.name().to_string(),
                    source: error,
                })
            }
        }
    }
}
