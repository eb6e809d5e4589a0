//! Tests for admin reports and health

use prometheus_fair_share::config::{ControllerSettings, StaticConfigSource};
use prometheus_fair_share::core::{Controller, ControllerRegistry, SlotLease};
use prometheus_fair_share::runtime::{admin_report, health, report_json, Health};
use std::sync::Arc;

#[test]
fn test_health_lists_overloaded_categories() {
    let source = StaticConfigSource::single("svc", ControllerSettings::with_threshold(4));
    let registry = ControllerRegistry::new();
    registry
        .register(
            Controller::builder("svc")
                .with_config_source(Arc::new(source))
                .build(),
        )
        .unwrap();
    registry.register(Controller::builder("idle").build()).unwrap();

    let cat = registry.get("svc").unwrap().get_category("render");
    let mut held: Vec<SlotLease> = Vec::new();
    while let Ok(lease) = cat.try_admit() {
        held.push(lease);
    }

    let report = health(&registry);
    assert_eq!(
        report,
        Health {
            ok: false,
            controllers: 2,
            overloaded: vec!["svc/render".to_string()],
        }
    );

    for lease in &mut held {
        lease.release().unwrap();
    }
}

#[test]
fn test_report_json_without_engine() {
    let registry = ControllerRegistry::new();
    let controller = Controller::builder("api").build();
    registry.register(controller.clone()).unwrap();
    let mut lease = controller.get_category("search").try_admit().unwrap();

    let report = admin_report(&registry, None);
    assert!(report.engine.is_none());
    let value: serde_json::Value = serde_json::from_str(&report_json(&report).unwrap()).unwrap();
    assert_eq!(value["controllers"][0]["total_active"], 1);
    assert_eq!(value["controllers"][0]["categories"][0]["name"], "search");

    lease.release().unwrap();
}
