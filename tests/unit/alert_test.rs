//! Tests for overload alert delivery

use prometheus_fair_share::config::{ControllerSettings, StaticConfigSource};
use prometheus_fair_share::core::{
    Controller, InMemoryOverloadSink, OverloadEvent, OverloadSink, OverloadTransition, SlotLease,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct PanickingSink {
    calls: AtomicU32,
}

impl OverloadSink for PanickingSink {
    fn on_overload_entered(&self, _event: &OverloadEvent) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("pager unreachable");
    }

    fn on_overload_cleared(&self, _event: &OverloadEvent) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn controller_with_sink(sink: Arc<dyn OverloadSink>) -> Controller {
    let source = StaticConfigSource::single("alerts", ControllerSettings::with_threshold(10));
    Controller::builder("alerts")
        .with_config_source(Arc::new(source))
        .with_overload_sink(sink)
        .build()
}

#[test]
fn test_panicking_sink_does_not_affect_admission() {
    let sink = Arc::new(PanickingSink {
        calls: AtomicU32::new(0),
    });
    let controller = controller_with_sink(sink.clone());
    let cat = controller.get_category("reports");

    let mut held: Vec<SlotLease> = Vec::new();
    while let Ok(lease) = cat.try_admit() {
        held.push(lease);
    }
    assert_eq!(held.len(), 10);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    assert!(cat.snapshot().overloaded);

    for lease in &mut held {
        lease.release().unwrap();
    }
    assert_eq!(controller.total_active(), 0);
}

#[test]
fn test_in_memory_sink_records_transitions() {
    let sink = Arc::new(InMemoryOverloadSink::new(8));
    let controller = controller_with_sink(sink.clone());
    let cat = controller.get_category("reports");

    let mut held: Vec<SlotLease> = Vec::new();
    while let Ok(lease) = cat.try_admit() {
        held.push(lease);
    }
    for lease in &mut held {
        lease.release().unwrap();
    }
    let _next = cat.try_admit().unwrap();

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].controller, "alerts");
    assert_eq!(events[0].category, "reports");
    assert_eq!(events[0].transition, OverloadTransition::Entered);
    assert_eq!(events[1].transition, OverloadTransition::Cleared);
    assert_ne!(events[0].event_id, events[1].event_id);

    let json = serde_json::to_value(&events[1]).unwrap();
    assert_eq!(json["transition"], "cleared");
}
