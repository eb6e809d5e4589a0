//! Polled configuration sources.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::admission::{AdmissionConfig, ControllerSettings};

/// Controller settings tagged with the source version they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsSnapshot {
    /// Monotonic version of the source at read time.
    pub version: u64,
    /// Settings values.
    pub settings: ControllerSettings,
}

/// Dynamic configuration consulted by controllers.
///
/// Implementations are polled, never pushed: controllers call
/// [`controller_settings`](Self::controller_settings) at most once per settings refresh
/// interval and [`category_weight`](Self::category_weight) at most once per weight refresh
/// interval per category. Both calls happen on the admission path and should be cheap.
pub trait ConfigSource: Send + Sync {
    /// Current settings for `controller`.
    fn controller_settings(&self, controller: &str) -> SettingsSnapshot;

    /// Base weight override for `category` in `controller`, if any.
    fn category_weight(&self, controller: &str, category: &str) -> Option<u32>;
}

/// In-process configuration source over an [`AdmissionConfig`].
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    config: RwLock<AdmissionConfig>,
    version: AtomicU64,
}

impl StaticConfigSource {
    /// Create a source serving `config`.
    #[must_use]
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config: RwLock::new(config),
            version: AtomicU64::new(1),
        }
    }

    /// Create a source with a single controller.
    #[must_use]
    pub fn single(controller: impl Into<String>, settings: ControllerSettings) -> Self {
        let mut config = AdmissionConfig::default();
        config.controllers.insert(controller.into(), settings);
        Self::new(config)
    }

    /// Mutate the configuration and bump the version.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut AdmissionConfig),
    {
        let mut config = self.config.write();
        f(&mut config);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Replace one controller's settings.
    pub fn set_controller(&self, controller: impl Into<String>, settings: ControllerSettings) {
        let controller = controller.into();
        self.update(|cfg| {
            cfg.controllers.insert(controller, settings);
        });
    }

    /// Set a base weight override for one category.
    pub fn set_category_weight(&self, controller: &str, category: impl Into<String>, weight: u32) {
        let category = category.into();
        self.update(|cfg| {
            cfg.controllers
                .entry(controller.to_string())
                .or_default()
                .category_weights
                .insert(category, weight);
        });
    }

    /// Current version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Clone of the current configuration.
    #[must_use]
    pub fn config(&self) -> AdmissionConfig {
        self.config.read().clone()
    }
}

impl ConfigSource for StaticConfigSource {
    fn controller_settings(&self, controller: &str) -> SettingsSnapshot {
        let config = self.config.read();
        SettingsSnapshot {
            version: self.version.load(Ordering::Acquire),
            settings: config
                .controllers
                .get(controller)
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn category_weight(&self, controller: &str, category: &str) -> Option<u32> {
        self.config
            .read()
            .controllers
            .get(controller)
            .and_then(|settings| settings.category_weights.get(category).copied())
    }
}
