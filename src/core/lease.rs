//! Slot leases and the abandoned-lease liveness protocol.
//!
//! A [`SlotLease`] is the right to occupy one slot of a controller's ceiling. The
//! contract is exactly one [`release`](SlotLease::release) per lease. Leases that
//! escape that contract are reclaimed by the controller's reconciliation sweep:
//!
//! - dropping an unreleased lease flags its token *abandoned* and posts the lease id
//!   on the controller's abandonment channel;
//! - a lease whose heartbeat is older than the configured `abandon_after_ms` is
//!   reclaimed even if it was never dropped (e.g. `mem::forget`).
//!
//! The token state machine makes every path settle exactly once:
//!
//! ```text
//! Active ──release──▶ Released
//!   │ ──drop────────▶ Abandoned   (reclaimed on next sweep)
//!   └ ──stale sweep─▶ Reconciled ──late release──▶ Released
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::core::category::Category;
use crate::core::AdmissionError;
use crate::util::telemetry::ADMISSION_TARGET;

pub(crate) const ACTIVE: u8 = 0;
pub(crate) const RELEASED: u8 = 1;
pub(crate) const ABANDONED: u8 = 2;
pub(crate) const RECONCILED: u8 = 3;

/// Shared liveness record of one lease, tracked by the controller.
#[derive(Debug)]
pub(crate) struct LeaseToken {
    pub(crate) id: u64,
    pub(crate) category: usize,
    pub(crate) granted_at_ms: u64,
    heartbeat_ms: AtomicU64,
    supervised: AtomicBool,
    state: AtomicU8,
}

impl LeaseToken {
    pub(crate) const fn new(id: u64, category: usize, granted_at_ms: u64) -> Self {
        Self {
            id,
            category,
            granted_at_ms,
            heartbeat_ms: AtomicU64::new(granted_at_ms),
            supervised: AtomicBool::new(false),
            state: AtomicU8::new(ACTIVE),
        }
    }

    pub(crate) fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// CAS the state; on failure returns the observed state.
    pub(crate) fn transition(&self, from: u8, to: u8) -> Result<(), u8> {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    pub(crate) fn last_heartbeat_ms(&self) -> u64 {
        self.heartbeat_ms.load(Ordering::Acquire)
    }

    /// Held by the submission wrapper, which always settles it; exempt from staleness.
    pub(crate) fn is_supervised(&self) -> bool {
        self.supervised.load(Ordering::Acquire)
    }

    fn touch(&self, now: u64) {
        self.heartbeat_ms.fetch_max(now, Ordering::AcqRel);
    }
}

/// One admitted unit of work occupying a slot.
///
/// Obtained from [`Category::try_admit`]. Call [`release`](Self::release) exactly once
/// when the work finishes. Dropping an unreleased lease is treated as a leak: the slot
/// is reclaimed by the next reconciliation sweep and a warning is logged.
pub struct SlotLease {
    category: Category,
    token: Arc<LeaseToken>,
}

impl std::fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLease")
            .field("id", &self.token.id)
            .field("category", &self.category.name())
            .field("granted_at_ms", &self.token.granted_at_ms)
            .field("state", &self.token.state())
            .finish()
    }
}

impl SlotLease {
    pub(crate) const fn new(category: Category, token: Arc<LeaseToken>) -> Self {
        Self { category, token }
    }

    pub(crate) fn category_index(&self) -> usize {
        self.token.category
    }

    /// Lease identifier, unique within its controller.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.token.id
    }

    /// Category that granted this lease.
    #[must_use]
    pub const fn category(&self) -> &Category {
        &self.category
    }

    /// Grant timestamp in milliseconds.
    #[must_use]
    pub fn granted_at_ms(&self) -> u64 {
        self.token.granted_at_ms
    }

    /// Time since the lease was granted, by the controller's clock.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let now = self.category.controller_inner().now_ms();
        Duration::from_millis(now.saturating_sub(self.token.granted_at_ms))
    }

    /// Whether the lease has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.token.state() == RELEASED
    }

    /// Exempt this lease from the heartbeat staleness rule. Dropping it is still
    /// reclaimed by the sweep.
    pub(crate) fn supervise(&self) {
        self.token.supervised.store(true, Ordering::Release);
    }

    /// Prove liveness so the stale-lease sweep leaves this lease alone.
    pub fn heartbeat(&self) {
        let now = self.category.controller_inner().now_ms();
        self.token.touch(now);
    }

    /// Return the slot. Returns how long the lease was held.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::DoubleRelease`] on every call after the first; the
    /// category's counters are left untouched in that case.
    pub fn release(&mut self) -> Result<Duration, AdmissionError> {
        match self.token.transition(ACTIVE, RELEASED) {
            Ok(()) => {
                let inner = self.category.controller_inner();
                Ok(inner.finish(&self.token))
            }
            Err(RECONCILED) if self.token.transition(RECONCILED, RELEASED).is_ok() => {
                warn!(
                    target: ADMISSION_TARGET,
                    controller = %self.category.controller_id(),
                    category = %self.category.name(),
                    lease_id = self.token.id,
                    "lease released after the sweep already reclaimed it"
                );
                Ok(self.elapsed())
            }
            Err(_) => {
                error!(
                    controller = %self.category.controller_id(),
                    category = %self.category.name(),
                    lease_id = self.token.id,
                    "lease released twice"
                );
                Err(AdmissionError::DoubleRelease {
                    category: self.category.name().to_string(),
                    lease_id: self.token.id,
                })
            }
        }
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if self.token.transition(ACTIVE, ABANDONED).is_ok() {
            warn!(
                target: ADMISSION_TARGET,
                controller = %self.category.controller_id(),
                category = %self.category.name(),
                lease_id = self.token.id,
                "lease dropped without release; slot will be reclaimed"
            );
            self.category.controller_inner().notify_abandoned(self.token.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_transitions() {
        let token = LeaseToken::new(1, 0, 100);
        assert_eq!(token.state(), ACTIVE);
        assert!(token.transition(ACTIVE, RELEASED).is_ok());
        assert_eq!(token.transition(ACTIVE, ABANDONED), Err(RELEASED));
    }

    #[test]
    fn test_heartbeat_is_monotonic() {
        let token = LeaseToken::new(1, 0, 100);
        token.touch(500);
        token.touch(300);
        assert_eq!(token.last_heartbeat_ms(), 500);
    }
}
