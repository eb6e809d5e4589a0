//! Tests for controller builders and the registry

use prometheus_fair_share::builders::build_registry;
use prometheus_fair_share::config::{AdmissionConfig, ControllerSettings};
use prometheus_fair_share::core::{AdmissionError, Controller, ControllerRegistry, LogOverloadSink};
use prometheus_fair_share::util::clock::{ManualClock, SystemClock};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn config(ids: &[(&str, u32)]) -> AdmissionConfig {
    let mut cfg = AdmissionConfig::default();
    for (id, threshold) in ids {
        cfg.controllers
            .insert((*id).to_string(), ControllerSettings::with_threshold(*threshold));
    }
    cfg
}

#[test]
fn test_build_registry_sorted_ids() {
    let cfg = config(&[("web", 16), ("batch", 4)]);
    let (registry, source) = build_registry(
        &cfg,
        Arc::new(ManualClock::new(1_000)),
        Arc::new(LogOverloadSink),
    )
    .unwrap();

    assert_eq!(registry.ids(), vec!["batch".to_string(), "web".to_string()]);
    assert_eq!(registry.get("batch").map(|c| c.threshold()), Some(4));
    assert_eq!(source.config(), cfg);
}

#[test]
fn test_build_registry_rejects_invalid_config() {
    let cfg = config(&[("web", 0)]);
    let result = build_registry(&cfg, Arc::new(SystemClock), Arc::new(LogOverloadSink));
    assert!(matches!(result, Err(AdmissionError::InvalidConfig(_))));
}

#[test]
fn test_registry_duplicate_and_lazy_insert() {
    let registry = ControllerRegistry::new();
    registry.register(Controller::builder("api").build()).unwrap();
    assert!(matches!(
        registry.register(Controller::builder("api").build()),
        Err(AdmissionError::InvalidConfig(_))
    ));

    let lazy = registry.get_or_insert_with("jobs", || Controller::builder("jobs").build());
    assert_eq!(lazy.id(), "jobs");
    let again = registry.get_or_insert_with("jobs", || unreachable!());
    assert_eq!(again.id(), "jobs");
    assert_eq!(registry.controllers().len(), 2);
}

#[test]
fn test_supervisor_reclaims_dropped_lease() {
    let registry = Arc::new(ControllerRegistry::new());
    registry.register(Controller::builder("api").build()).unwrap();
    let controller = registry.get("api").unwrap();

    let lease = controller.get_category("upload").try_admit().unwrap();
    drop(lease);
    assert_eq!(controller.total_active(), 1);

    let supervisor = registry.spawn_supervisor(Duration::from_millis(10)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.total_active() != 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    supervisor.stop();

    assert_eq!(controller.total_active(), 0);
    assert_eq!(controller.get_category("upload").snapshot().abandoned, 1);
}
