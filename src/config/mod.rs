//! Configuration models for controllers, timing knobs, and worker pools.

pub mod admission;
pub mod source;
pub mod worker_pool;

pub use admission::{AdmissionConfig, AdmissionTimings, ControllerSettings, CONFIG_ENV_VAR};
pub use source::{ConfigSource, SettingsSnapshot, StaticConfigSource};
pub use worker_pool::WorkerPoolConfig;
