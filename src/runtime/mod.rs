//! Runtime adapters and admin API surface.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_engine;

pub use api::{admin_report, health, report_json, AdminReport, Health};
#[cfg(feature = "tokio-runtime")]
pub use tokio_engine::TokioEngine;
