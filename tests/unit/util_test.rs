//! Tests for clocks and telemetry helpers

use prometheus_fair_share::util::clock::{now_ms, Clock, ManualClock, SystemClock};
use prometheus_fair_share::util::telemetry::{init_tracing, init_tracing_with};
use std::time::Duration;

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(500);
    assert_eq!(clock.now_ms(), 500);
    clock.advance(Duration::from_millis(250));
    clock.advance_ms(50);
    assert_eq!(clock.now_ms(), 800);
    clock.set_ms(10);
    assert_eq!(clock.now_ms(), 10);
}

#[test]
fn test_system_clock_tracks_wall_time() {
    let before = now_ms();
    let sampled = SystemClock.now_ms();
    assert!(sampled >= before);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing_with("debug");
}
