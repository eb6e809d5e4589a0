//! Admission control, leases, and the execution path for admitted work.

pub mod alert;
pub mod category;
pub mod controller;
pub mod engine;
pub mod error;
pub mod lease;
pub mod registry;
pub mod submitter;
pub mod watchdog;
pub mod work;
pub mod worker_pool;

pub use alert::{InMemoryOverloadSink, LogOverloadSink, OverloadEvent, OverloadSink, OverloadTransition};
pub use category::{Category, CategorySnapshot};
pub use controller::{Controller, ControllerSnapshot};
pub use engine::{EngineRejection, EngineStats, ExecutionEngine, InlineEngine};
pub use error::{AdmissionError, AppResult, WorkFailure};
pub use lease::SlotLease;
pub use registry::{ControllerRegistry, SupervisorHandle};
pub use submitter::{AdmittedWork, Submitter};
pub use watchdog::{NoopWatchdog, ThreadWatchdog, TimeoutHook, WatchHandle, Watchdog};
pub use work::{CompletionHandle, FnWork, Work, WorkOutcome};
pub use worker_pool::{PoolError, WorkerPool};
