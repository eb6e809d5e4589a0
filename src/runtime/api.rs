//! Admin-facing report and health models.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, ControllerRegistry, ControllerSnapshot, EngineStats, ExecutionEngine};
use crate::util::clock::now_ms;

/// Full diagnostic dump of every registered controller.
#[derive(Debug, Clone, Serialize)]
pub struct AdminReport {
    /// When the report was taken (ms since epoch).
    pub generated_at_ms: u64,
    /// Controller snapshots, ordered by id.
    pub controllers: Vec<ControllerSnapshot>,
    /// Execution engine utilization, if an engine was supplied.
    pub engine: Option<EngineStats>,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// False while any category is overloaded.
    pub ok: bool,
    /// Registered controllers.
    pub controllers: usize,
    /// Overloaded categories as `controller/category`.
    pub overloaded: Vec<String>,
}

/// Build a report for `registry`, optionally including engine stats.
#[must_use]
pub fn admin_report(registry: &ControllerRegistry, engine: Option<&dyn ExecutionEngine>) -> AdminReport {
    AdminReport {
        generated_at_ms: now_ms(),
        controllers: registry.snapshots(),
        engine: engine.map(|e| e.stats()),
    }
}

/// Return a health payload.
#[must_use]
pub fn health(registry: &ControllerRegistry) -> Health {
    let snapshots = registry.snapshots();
    let overloaded: Vec<String> = snapshots
        .iter()
        .flat_map(|c| {
            c.categories
                .iter()
                .filter(|cat| cat.overloaded)
                .map(move |cat| format!("{}/{}", c.id, cat.name))
        })
        .collect();
    Health {
        ok: overloaded.is_empty(),
        controllers: snapshots.len(),
        overloaded,
    }
}

/// Render a report as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn report_json(report: &AdminReport) -> AppResult<String> {
    serde_json::to_string_pretty(report).context("failed to serialize admin report")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Controller, InlineEngine};

    #[test]
    fn test_empty_registry_is_healthy() {
        let registry = ControllerRegistry::new();
        let health = health(&registry);
        assert!(health.ok);
        assert_eq!(health.controllers, 0);
    }

    #[test]
    fn test_report_includes_engine_stats() {
        let registry = ControllerRegistry::new();
        registry.register(Controller::builder("api").build()).unwrap();
        let engine = InlineEngine::new();
        let report = admin_report(&registry, Some(&engine as &dyn ExecutionEngine));
        assert_eq!(report.controllers.len(), 1);
        assert_eq!(report.engine.as_ref().map(|e| e.max_workers), Some(1));

        let json = report_json(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["controllers"][0]["id"], "api");
    }
}
