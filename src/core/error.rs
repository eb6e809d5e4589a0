//! Error types for admission and execution.

use thiserror::Error;

use crate::core::worker_pool::PoolError;

/// Errors produced by admission, release, and submission.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Category or global capacity is exhausted.
    #[error("admission rejected for category `{category}`: {active} active, limit {limit}")]
    Rejected {
        /// Category that refused the request.
        category: String,
        /// Active leases at decision time.
        active: u32,
        /// Limit computed for the request.
        limit: u32,
    },
    /// A lease was released more than once.
    #[error("lease {lease_id} in category `{category}` released twice")]
    DoubleRelease {
        /// Category owning the lease.
        category: String,
        /// Lease identifier.
        lease_id: u64,
    },
    /// The execution engine refused an already admitted work item.
    #[error("execution engine rejected work for category `{category}`: {source}")]
    EngineRejected {
        /// Category of the refused work.
        category: String,
        /// Engine-level cause.
        #[source]
        source: PoolError,
    },
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AdmissionError {
    /// True for capacity rejections at either the admission or engine level.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::EngineRejected { .. })
    }
}

/// Cause delivered to a work item's completion contract when it did not run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkFailure {
    /// Admission refused the work.
    #[error("rejected by admission control: {0}")]
    Rejected(String),
    /// The execution engine refused the work after admission.
    #[error("rejected by execution engine: {0}")]
    EngineRejected(String),
    /// The work panicked while running.
    #[error("work panicked: {0}")]
    Panicked(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
