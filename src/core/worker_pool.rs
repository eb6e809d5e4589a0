//! Bounded worker-thread execution engine.
//!
//! `WorkerPool` runs admitted work on dedicated OS threads so that slow or blocking
//! work never runs on the caller's thread.
//!
//! # Key Features
//!
//! - **Core workers**: `core_workers` threads live for the lifetime of the pool
//! - **Burst workers**: extra threads up to `max_workers` are started when work arrives
//!   and nobody is idle; they exit after `keep_alive_ms` without work
//! - **Bounded queue**: submissions beyond `max_queue_depth` are refused with
//!   [`PoolError::QueueFull`] and handed back to the submitter
//! - **Graceful shutdown**: queued work is drained before workers exit
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_fair_share::config::WorkerPoolConfig;
//! use prometheus_fair_share::core::{Submitter, WorkerPool};
//!
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new()
//!         .with_core_workers(4)
//!         .with_max_workers(8)
//!         .with_max_queue_depth(500),
//! )?;
//! let submitter = Submitter::new(controller, pool);
//! ```

mod native;

use std::fmt;

pub use native::WorkerPool;

/// Reason an [`ExecutionEngine`](crate::core::ExecutionEngine) refused admitted work.
///
/// Shared by every engine, not only `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// No queue room or in-flight permit left.
    QueueFull,
    /// The engine was shut down or closed.
    PoolShutdown,
    /// Engine configuration is invalid.
    InvalidConfig(String),
    /// Worker spawn failed or no runtime was available.
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "task queue is full"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}
