//! Tests for error types

use prometheus_fair_share::core::{AdmissionError, PoolError, WorkFailure};
use std::error::Error;

#[test]
fn test_rejected_error() {
    let err = AdmissionError::Rejected {
        category: "search".to_string(),
        active: 4,
        limit: 4,
    };
    assert_eq!(
        format!("{}", err),
        "admission rejected for category `search`: 4 active, limit 4"
    );
    assert!(err.is_rejection());
}

#[test]
fn test_double_release_error() {
    let err = AdmissionError::DoubleRelease {
        category: "search".to_string(),
        lease_id: 7,
    };
    assert_eq!(format!("{}", err), "lease 7 in category `search` released twice");
    assert!(!err.is_rejection());
}

#[test]
fn test_engine_rejected_keeps_source() {
    let err = AdmissionError::EngineRejected {
        category: "ingest".to_string(),
        source: PoolError::QueueFull,
    };
    assert_eq!(
        format!("{}", err),
        "execution engine rejected work for category `ingest`: task queue is full"
    );
    assert!(err.is_rejection());
    assert_eq!(err.source().map(|e| e.to_string()), Some("task queue is full".to_string()));
}

#[test]
fn test_invalid_config_error() {
    let err = AdmissionError::InvalidConfig("threshold must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: threshold must be greater than 0"
    );
}

#[test]
fn test_pool_errors() {
    assert_eq!(PoolError::PoolShutdown.to_string(), "pool has been shut down");
    assert_eq!(
        PoolError::InvalidConfig("bad".into()).to_string(),
        "invalid configuration: bad"
    );
    assert_eq!(PoolError::Internal("boom".into()).to_string(), "internal error: boom");
}

#[test]
fn test_work_failure_messages() {
    assert_eq!(
        WorkFailure::Panicked("oops".into()).to_string(),
        "work panicked: oops"
    );
    assert_eq!(
        WorkFailure::EngineRejected("task queue is full".into()).to_string(),
        "rejected by execution engine: task queue is full"
    );
}
