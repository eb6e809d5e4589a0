//! Overload alert sinks.
//!
//! Categories flip between normal and overloaded using two bands (warning and
//! release percentages of their current limit). Each flip produces an
//! [`OverloadEvent`] that is delivered to an [`OverloadSink`] after the controller
//! lock has been dropped. Delivery is fire-and-forget: a panicking sink is contained
//! and logged, and never affects admission.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Direction of a hysteresis transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverloadTransition {
    /// Active count rose above the warning band.
    Entered,
    /// Active count fell below the release band.
    Cleared,
}

/// Overload state change for one category.
#[derive(Debug, Clone, Serialize)]
pub struct OverloadEvent {
    /// Correlation identifier.
    pub event_id: Uuid,
    /// Controller owning the category.
    pub controller: String,
    /// Category name.
    pub category: String,
    /// Transition direction.
    pub transition: OverloadTransition,
    /// Active leases when the transition was detected.
    pub active: u32,
    /// Limit computed for the triggering admission.
    pub limit: u32,
    /// Timestamp of the previous transition (or category creation).
    pub since_ms: u64,
    /// Timestamp of this transition.
    pub at_ms: u64,
}

/// Receiver of overload notifications.
pub trait OverloadSink: Send + Sync {
    /// A category entered overload.
    fn on_overload_entered(&self, event: &OverloadEvent);
    /// A category left overload.
    fn on_overload_cleared(&self, event: &OverloadEvent);
}

/// Sink that writes transitions to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOverloadSink;

impl OverloadSink for LogOverloadSink {
    fn on_overload_entered(&self, event: &OverloadEvent) {
        warn!(
            controller = %event.controller,
            category = %event.category,
            active = event.active,
            limit = event.limit,
            normal_for_ms = event.at_ms.saturating_sub(event.since_ms),
            "category entered overload"
        );
    }

    fn on_overload_cleared(&self, event: &OverloadEvent) {
        info!(
            controller = %event.controller,
            category = %event.category,
            active = event.active,
            limit = event.limit,
            overloaded_for_ms = event.at_ms.saturating_sub(event.since_ms),
            "category overload cleared"
        );
    }
}

/// In-memory sink with a bounded buffer, for tests and diagnostics.
#[derive(Debug)]
pub struct InMemoryOverloadSink {
    events: Mutex<VecDeque<OverloadEvent>>,
    max_events: usize,
}

impl InMemoryOverloadSink {
    /// Create a sink keeping at most `max_events` events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<OverloadEvent> {
        self.events.lock().iter().cloned().collect()
    }

    fn push(&self, event: &OverloadEvent) {
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

impl OverloadSink for InMemoryOverloadSink {
    fn on_overload_entered(&self, event: &OverloadEvent) {
        self.push(event);
    }

    fn on_overload_cleared(&self, event: &OverloadEvent) {
        self.push(event);
    }
}

/// Deliver `event` to `sink`, containing panics.
pub(crate) fn deliver(sink: &dyn OverloadSink, event: &OverloadEvent) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event.transition {
        OverloadTransition::Entered => sink.on_overload_entered(event),
        OverloadTransition::Cleared => sink.on_overload_cleared(event),
    }));
    if outcome.is_err() {
        error!(
            category = %event.category,
            transition = ?event.transition,
            "overload sink panicked; notification dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(category: &str, transition: OverloadTransition) -> OverloadEvent {
        OverloadEvent {
            event_id: Uuid::new_v4(),
            controller: "ctl".into(),
            category: category.into(),
            transition,
            active: 9,
            limit: 10,
            since_ms: 0,
            at_ms: 10,
        }
    }

    struct PanickingSink;

    impl OverloadSink for PanickingSink {
        fn on_overload_entered(&self, _event: &OverloadEvent) {
            panic!("sink down");
        }
        fn on_overload_cleared(&self, _event: &OverloadEvent) {}
    }

    #[test]
    fn test_in_memory_sink_overflow() {
        let sink = InMemoryOverloadSink::new(2);
        deliver(&sink, &event("a", OverloadTransition::Entered));
        deliver(&sink, &event("b", OverloadTransition::Entered));
        deliver(&sink, &event("c", OverloadTransition::Cleared));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].category, "b");
        assert_eq!(events[1].transition, OverloadTransition::Cleared);
    }

    #[test]
    fn test_zero_capacity_sink_keeps_nothing() {
        let sink = InMemoryOverloadSink::new(0);
        deliver(&sink, &event("a", OverloadTransition::Entered));
        deliver(&sink, &event("a", OverloadTransition::Cleared));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        deliver(&PanickingSink, &event("a", OverloadTransition::Entered));
    }
}
