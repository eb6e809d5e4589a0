//! Worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the bounded worker-thread execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Workers kept alive for the lifetime of the pool.
    pub core_workers: usize,
    /// Upper bound on workers, including burst workers.
    pub max_workers: usize,
    /// Capacity of the run queue; submissions beyond it are rejected.
    pub max_queue_depth: usize,
    /// Idle time after which a burst worker exits, in milliseconds.
    pub keep_alive_ms: u64,
    /// Stack size for worker threads in bytes.
    pub thread_stack_size: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            core_workers: cpus,
            max_workers: cpus * 2,
            max_queue_depth: 1024,
            keep_alive_ms: 60_000,
            thread_stack_size: 2 * 1024 * 1024,
            thread_name_prefix: "fs-worker".into(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with defaults sized to the host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of core workers (raises `max_workers` if needed).
    #[must_use]
    pub fn with_core_workers(mut self, count: usize) -> Self {
        self.core_workers = count;
        self.max_workers = self.max_workers.max(count);
        self
    }

    /// Set the maximum number of workers.
    #[must_use]
    pub const fn with_max_workers(mut self, count: usize) -> Self {
        self.max_workers = count;
        self
    }

    /// Set the run queue capacity.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the burst worker keep-alive.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_ms = u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Burst worker keep-alive as a [`Duration`].
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.core_workers == 0 {
            return Err("core_workers must be greater than 0".into());
        }
        if self.max_workers < self.core_workers {
            return Err(format!(
                "max_workers ({}) must be at least core_workers ({})",
                self.max_workers, self.core_workers
            ));
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_max_at_least_core() {
        let cfg = WorkerPoolConfig::new()
            .with_max_workers(1)
            .with_core_workers(4);
        assert_eq!(cfg.core_workers, 4);
        assert_eq!(cfg.max_workers, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_queue_rejected() {
        let cfg = WorkerPoolConfig::new().with_max_queue_depth(0);
        assert!(cfg.validate().is_err());
    }
}
