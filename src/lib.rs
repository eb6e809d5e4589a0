//! # Prometheus Fair Share
//!
//! Adaptive weighted fair-share admission control for shared worker capacity.
//!
//! A [`Controller`](core::Controller) owns a global concurrency ceiling and splits it
//! among named categories of work. Each category's share follows its adjusted weight:
//! a configured base weight, throttled when the category runs slower than its own
//! history and boosted when it submits more often than its peers. Admission is
//! fail-fast; no caller ever waits for a slot.
//!
//! ## Core Problem Solved
//!
//! A single noisy or slow class of work must not starve everything else sharing the
//! same pool of threads:
//!
//! - **Proportional shares**: the ceiling is divided by weight among categories with work in flight
//! - **Speed throttling**: a category running slower than its own history loses up to 60% of its weight
//! - **Popularity boost**: frequently submitted categories gain up to 2.5× weight
//! - **Overload alerts**: two-band hysteresis reports categories stuck at their limit
//!
//! ## Key Features
//!
//! - **Slot leases**: exactly-once release, with a reconciliation sweep for leaked leases
//! - **Submission façade**: [`Submitter`](core::Submitter) admits, runs, and releases in one call
//! - **Execution engines**: bounded [`WorkerPool`](core::WorkerPool), inline, or tokio-backed
//! - **Typed configuration**: versioned settings polled from a [`ConfigSource`](config::ConfigSource)
//! - **Explicit registry**: [`ControllerRegistry`](core::ControllerRegistry) for diagnostics
//!
//! ```rust,ignore
//! use prometheus_fair_share::config::{ControllerSettings, StaticConfigSource, WorkerPoolConfig};
//! use prometheus_fair_share::core::{Controller, FnWork, Submitter, WorkerPool};
//! use std::sync::Arc;
//!
//! let source = Arc::new(StaticConfigSource::single("search", ControllerSettings::with_threshold(32)));
//! let controller = Controller::builder("search").with_config_source(source).build();
//! let pool = WorkerPool::new(WorkerPoolConfig::new().with_core_workers(8))?;
//! let submitter = Submitter::new(controller, pool);
//!
//! submitter.submit(FnWork::new("reindex", move || reindex(shard)))?;
//! ```
//!
//! For lower-level use, admit and release directly:
//!
//! ```rust,ignore
//! let category = controller.get_category("reindex");
//! let mut lease = category.try_admit()?;
//! reindex(shard);
//! lease.release()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Admission control, leases, and execution engines.
pub mod core;
/// Configuration models for controllers, timings, and worker pools.
pub mod config;
/// Builders to construct controllers and registries from configuration.
pub mod builders;
/// Runtime adapters and admin API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
