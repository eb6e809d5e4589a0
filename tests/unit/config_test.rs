//! Tests for configuration models and sources

use prometheus_fair_share::config::{
    AdmissionConfig, AdmissionTimings, ConfigSource, ControllerSettings, StaticConfigSource,
    WorkerPoolConfig,
};
use std::time::Duration;

#[test]
fn test_json_config_with_defaults() {
    let cfg = AdmissionConfig::from_json_str(
        r#"{
            "controllers": {
                "inference": {
                    "threshold": 32,
                    "share_unused": true,
                    "category_weights": { "premium": 3000 }
                }
            },
            "timings": { "abandon_after_ms": null }
        }"#,
    )
    .unwrap();

    let settings = &cfg.controllers["inference"];
    assert_eq!(settings.threshold, 32);
    assert!(settings.share_unused);
    assert!(settings.enabled);
    assert_eq!(settings.warning_threshold_percent, 90);
    assert_eq!(settings.weight_for("premium"), 3000);
    assert_eq!(settings.weight_for("free"), 1000);
    assert_eq!(cfg.timings.abandon_after_ms, None);
    assert_eq!(cfg.timings.settings_refresh_ms, 5_000);
}

#[test]
fn test_json_parse_error() {
    let err = AdmissionConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error: "));
}

#[test]
fn test_invalid_controller_named_in_error() {
    let err = AdmissionConfig::from_json_str(r#"{ "controllers": { "web": { "threshold": 0 } } }"#)
        .unwrap_err();
    assert!(err.contains("controller `web` invalid"));
}

#[test]
fn test_settings_validation() {
    assert!(ControllerSettings::default().validate().is_ok());

    let inverted = ControllerSettings {
        warning_threshold_percent: 50,
        release_threshold_percent: 80,
        ..ControllerSettings::default()
    };
    assert!(inverted.validate().is_err());

    let mut zero_weight = ControllerSettings::default();
    zero_weight.category_weights.insert("batch".into(), 0);
    let err = zero_weight.validate().unwrap_err();
    assert!(err.contains("batch"));
}

#[test]
fn test_timings_validation() {
    assert!(AdmissionTimings::default().validate().is_ok());
    let zero_window = AdmissionTimings {
        popularity_window_ms: 0,
        ..AdmissionTimings::default()
    };
    assert!(zero_window.validate().is_err());
    let zero_abandon = AdmissionTimings {
        abandon_after_ms: Some(0),
        ..AdmissionTimings::default()
    };
    assert!(zero_abandon.validate().is_err());
}

#[test]
fn test_config_file_round_trip() {
    let mut cfg = AdmissionConfig::default();
    cfg.controllers
        .insert("jobs".into(), ControllerSettings::with_threshold(8));
    let path = std::env::temp_dir().join(format!("fair-share-config-{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_string(&cfg).unwrap()).unwrap();

    let loaded = AdmissionConfig::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, cfg);
}

#[test]
fn test_missing_config_file() {
    let err = AdmissionConfig::from_json_file("/nonexistent/fair-share.json").unwrap_err();
    assert!(format!("{err:#}").contains("reading admission config"));
}

#[test]
fn test_static_source_versions() {
    let source = StaticConfigSource::single("svc", ControllerSettings::with_threshold(10));
    let first = source.controller_settings("svc");
    assert_eq!(first.settings.threshold, 10);

    source.set_category_weight("svc", "gold", 2500);
    let second = source.controller_settings("svc");
    assert!(second.version > first.version);
    assert_eq!(source.category_weight("svc", "gold"), Some(2500));
    assert_eq!(source.category_weight("svc", "silver"), None);

    // unknown controllers fall back to defaults
    assert_eq!(source.controller_settings("other").settings, ControllerSettings::default());
}

#[test]
fn test_worker_pool_config_validation() {
    let cfg = WorkerPoolConfig::new()
        .with_core_workers(2)
        .with_max_workers(4)
        .with_keep_alive(Duration::from_secs(5));
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.keep_alive(), Duration::from_secs(5));

    let tiny_stack = WorkerPoolConfig::new().with_thread_stack_size(1024);
    assert!(tiny_stack.validate().is_err());
}
