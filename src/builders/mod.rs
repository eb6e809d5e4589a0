//! Builders to construct controllers and registries from configuration.

pub mod controller_builder;

pub use controller_builder::{build_registry, ControllerBuilder};
