//! Work items accepted by the submission façade.
//!
//! Anything submitted implements [`Work`]. Only [`category`](Work::category) and
//! [`run`](Work::run) are required; the completion contract
//! ([`mark_failed`](Work::mark_failed), [`complete`](Work::complete)) and the
//! diagnostics accessors have no-op defaults.
//!
//! ```rust,ignore
//! use prometheus_fair_share::core::{FnWork, WorkOutcome};
//!
//! let (work, done) = FnWork::new("thumbnails", move || render(image)).with_completion();
//! submitter.submit(work)?;
//! assert_eq!(done.wait(), Some(WorkOutcome::Completed));
//! ```

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::core::WorkFailure;

/// A unit of work routed to a category.
pub trait Work: Send + 'static {
    /// Name of the category this work is admitted against.
    fn category(&self) -> &str;

    /// Execute the work. Called at most once, on an engine worker.
    fn run(&mut self);

    /// Human-readable name for diagnostics.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Upper bound on execution time, enforced by the watchdog if one is configured.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Record why the work did not run to completion.
    fn mark_failed(&mut self, cause: WorkFailure) {
        let _ = cause;
    }

    /// Signal that the work is finished, successfully or not. Called exactly once.
    fn complete(&mut self) {}
}

impl Work for Box<dyn Work> {
    fn category(&self) -> &str {
        (**self).category()
    }

    fn run(&mut self) {
        (**self).run();
    }

    fn name(&self) -> Option<&str> {
        (**self).name()
    }

    fn timeout(&self) -> Option<Duration> {
        (**self).timeout()
    }

    fn mark_failed(&mut self, cause: WorkFailure) {
        (**self).mark_failed(cause);
    }

    fn complete(&mut self) {
        (**self).complete();
    }
}

/// Final state of a work item as seen by its completion contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The work ran to completion.
    Completed,
    /// The work was refused or failed.
    Failed(WorkFailure),
}

/// Receiver side of a work item's completion contract.
#[derive(Debug)]
pub struct CompletionHandle {
    rx: Receiver<WorkOutcome>,
}

impl CompletionHandle {
    /// Block until the work completes. `None` if it was dropped without completing.
    #[must_use]
    pub fn wait(&self) -> Option<WorkOutcome> {
        self.rx.recv().ok()
    }

    /// Block up to `timeout` for completion.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<WorkOutcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Outcome if already available.
    #[must_use]
    pub fn try_outcome(&self) -> Option<WorkOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

/// Closure-backed [`Work`].
pub struct FnWork<F> {
    category: String,
    name: Option<String>,
    timeout: Option<Duration>,
    func: Option<F>,
    failure: Option<WorkFailure>,
    completion: Option<Sender<WorkOutcome>>,
}

impl<F> FnWork<F>
where
    F: FnOnce() + Send + 'static,
{
    /// Work in `category` that runs `func`.
    pub fn new(category: impl Into<String>, func: F) -> Self {
        Self {
            category: category.into(),
            name: None,
            timeout: None,
            func: Some(func),
            failure: None,
            completion: None,
        }
    }

    /// Attach a diagnostic name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach an execution timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a completion contract and return its receiver.
    #[must_use]
    pub fn with_completion(mut self) -> (Self, CompletionHandle) {
        let (tx, rx) = bounded(1);
        self.completion = Some(tx);
        (self, CompletionHandle { rx })
    }
}

impl<F> Work for FnWork<F>
where
    F: FnOnce() + Send + 'static,
{
    fn category(&self) -> &str {
        &self.category
    }

    fn run(&mut self) {
        if let Some(func) = self.func.take() {
            func();
        }
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn mark_failed(&mut self, cause: WorkFailure) {
        self.failure.get_or_insert(cause);
    }

    fn complete(&mut self) {
        if let Some(tx) = self.completion.take() {
            let outcome = self
                .failure
                .take()
                .map_or(WorkOutcome::Completed, WorkOutcome::Failed);
            let _ = tx.send(outcome);
        }
    }
}
