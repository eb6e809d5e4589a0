//! Controller and timing configuration structures.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Environment variable naming a JSON file read by [`AdmissionConfig::from_env`].
pub const CONFIG_ENV_VAR: &str = "FAIR_SHARE_CONFIG";

/// Base weight assigned to categories without an override.
pub const DEFAULT_CATEGORY_WEIGHT: u32 = 1000;

/// Tunable values for one controller.
///
/// These are the values a [`ConfigSource`](crate::config::ConfigSource) serves; a
/// controller re-reads them at most once per
/// [`AdmissionTimings::settings_refresh_ms`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Global slot ceiling shared by all categories.
    pub threshold: u32,
    /// Percentage of a category's limit above which it enters overload.
    pub warning_threshold_percent: u32,
    /// Percentage of a category's limit below which overload is cleared.
    pub release_threshold_percent: u32,
    /// When false every admission request is granted.
    pub enabled: bool,
    /// Skip the speed factor when computing adjusted weights.
    pub ignore_speed: bool,
    /// Skip the popularity factor when computing adjusted weights.
    pub ignore_popularity: bool,
    /// Let categories borrow global capacity left idle by others.
    pub share_unused: bool,
    /// Base weight used for categories without an explicit override.
    pub default_weight: u32,
    /// Per-category base weight overrides.
    pub category_weights: HashMap<String, u32>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            threshold: 100,
            warning_threshold_percent: 90,
            release_threshold_percent: 70,
            enabled: true,
            ignore_speed: false,
            ignore_popularity: false,
            share_unused: false,
            default_weight: DEFAULT_CATEGORY_WEIGHT,
            category_weights: HashMap::new(),
        }
    }
}

impl ControllerSettings {
    /// Settings with the given ceiling and defaults elsewhere.
    #[must_use]
    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Base weight for `category`, falling back to the default weight.
    #[must_use]
    pub fn weight_for(&self, category: &str) -> u32 {
        self.category_weights
            .get(category)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Validate settings values.
    pub fn validate(&self) -> Result<(), String> {
        if self.threshold == 0 {
            return Err("threshold must be greater than 0".into());
        }
        if self.warning_threshold_percent == 0 {
            return Err("warning_threshold_percent must be greater than 0".into());
        }
        if self.release_threshold_percent > self.warning_threshold_percent {
            return Err(format!(
                "release_threshold_percent ({}) must not exceed warning_threshold_percent ({})",
                self.release_threshold_percent, self.warning_threshold_percent
            ));
        }
        if self.default_weight == 0 {
            return Err("default_weight must be greater than 0".into());
        }
        if let Some((name, _)) = self.category_weights.iter().find(|(_, w)| **w == 0) {
            return Err(format!("weight for category `{name}` must be greater than 0"));
        }
        Ok(())
    }
}

/// Refresh and sampling intervals. These are fixed at controller construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionTimings {
    /// Minimum interval between controller settings refreshes.
    pub settings_refresh_ms: u64,
    /// Minimum interval between per-category base weight refreshes.
    pub weight_refresh_ms: u64,
    /// Minimum interval between throttled leak reconciliation sweeps.
    pub reconcile_interval_ms: u64,
    /// Interval at which peak active counts are sampled and reset.
    pub peak_sample_interval_ms: u64,
    /// Width of one popularity sample.
    pub popularity_window_ms: u64,
    /// Leases without a heartbeat for this long are treated as abandoned.
    ///
    /// Applies to leases taken directly through `Category::try_admit`; callers holding
    /// one longer than this must call `SlotLease::heartbeat`. Leases held by a
    /// `Submitter` are exempt, since the wrapper releases them when the work returns.
    /// `None` disables the rule.
    pub abandon_after_ms: Option<u64>,
}

impl Default for AdmissionTimings {
    fn default() -> Self {
        Self {
            settings_refresh_ms: 5_000,
            weight_refresh_ms: 1_000,
            reconcile_interval_ms: 300,
            peak_sample_interval_ms: 1_000,
            popularity_window_ms: 1_000,
            abandon_after_ms: Some(3_600_000),
        }
    }
}

impl AdmissionTimings {
    /// Validate interval values.
    pub fn validate(&self) -> Result<(), String> {
        if self.popularity_window_ms == 0 {
            return Err("popularity_window_ms must be greater than 0".into());
        }
        if self.abandon_after_ms == Some(0) {
            return Err("abandon_after_ms must be greater than 0 when set".into());
        }
        Ok(())
    }
}

/// Root admission configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Map of controller id to settings.
    pub controllers: HashMap<String, ControllerSettings>,
    /// Intervals shared by every controller.
    pub timings: AdmissionTimings,
}

impl AdmissionConfig {
    /// Validate timings and every controller.
    pub fn validate(&self) -> Result<(), String> {
        self.timings
            .validate()
            .map_err(|e| format!("timings invalid: {e}"))?;
        for (name, settings) in &self.controllers {
            settings
                .validate()
                .map_err(|e| format!("controller `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse admission configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading admission config {}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading admission config {}", path.display()))
    }

    /// Load configuration named by `FAIR_SHARE_CONFIG`, reading `.env` first.
    ///
    /// Returns the default configuration when the variable is unset.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::from_json_file(path),
            Err(_) => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(ControllerSettings::default().validate().is_ok());
        assert!(AdmissionTimings::default().validate().is_ok());
    }

    #[test]
    fn test_weight_for_falls_back_to_default() {
        let mut settings = ControllerSettings::with_threshold(10);
        settings.category_weights.insert("search".into(), 3000);
        assert_eq!(settings.weight_for("search"), 3000);
        assert_eq!(settings.weight_for("other"), DEFAULT_CATEGORY_WEIGHT);
    }

    #[test]
    fn test_release_above_warning_rejected() {
        let settings = ControllerSettings {
            warning_threshold_percent: 50,
            release_threshold_percent: 60,
            ..ControllerSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
