//! Builders to construct controllers from configuration.

use std::sync::Arc;

use crate::config::{AdmissionConfig, AdmissionTimings, ConfigSource, StaticConfigSource};
use crate::core::alert::{LogOverloadSink, OverloadSink};
use crate::core::{AdmissionError, Controller, ControllerRegistry};
use crate::util::clock::{Clock, SystemClock};

/// Step-by-step construction of a [`Controller`].
///
/// Defaults: a [`StaticConfigSource`] with default settings, the system clock, a
/// logging overload sink, and default timings.
pub struct ControllerBuilder {
    id: String,
    source: Option<Arc<dyn ConfigSource>>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn OverloadSink>,
    timings: AdmissionTimings,
}

impl ControllerBuilder {
    /// Start a builder for controller `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: None,
            clock: Arc::new(SystemClock),
            sink: Arc::new(LogOverloadSink),
            timings: AdmissionTimings::default(),
        }
    }

    /// Configuration source polled for settings and weights.
    #[must_use]
    pub fn with_config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Clock used for all timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receiver of overload transitions.
    #[must_use]
    pub fn with_overload_sink(mut self, sink: Arc<dyn OverloadSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Refresh and sampling intervals.
    #[must_use]
    pub fn with_timings(mut self, timings: AdmissionTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Build the controller.
    #[must_use]
    pub fn build(self) -> Controller {
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(StaticConfigSource::default()));
        Controller::from_parts(self.id, source, self.clock, self.sink, self.timings)
    }
}

/// Build one controller per configured id and register them.
///
/// Returns the registry together with the config source backing it, so callers can
/// apply later updates.
pub fn build_registry(
    cfg: &AdmissionConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn OverloadSink>,
) -> Result<(ControllerRegistry, Arc<StaticConfigSource>), AdmissionError> {
    cfg.validate().map_err(AdmissionError::InvalidConfig)?;

    let source = Arc::new(StaticConfigSource::new(cfg.clone()));
    let registry = ControllerRegistry::new();
    let mut ids: Vec<&String> = cfg.controllers.keys().collect();
    ids.sort();
    for id in ids {
        let controller = ControllerBuilder::new(id.clone())
            .with_config_source(source.clone())
            .with_clock(Arc::clone(&clock))
            .with_overload_sink(Arc::clone(&sink))
            .with_timings(cfg.timings.clone())
            .build();
        registry.register(controller)?;
    }
    Ok((registry, source))
}
