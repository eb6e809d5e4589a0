//! Explicit registry of controllers for diagnostics and supervision.
//!
//! Construct one registry at startup and pass it to whatever needs to enumerate
//! controllers (admin endpoints, the reconciliation supervisor).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core::{AdmissionError, Controller, ControllerSnapshot};

/// Set of controllers keyed by id.
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: RwLock<BTreeMap<String, Controller>>,
}

impl ControllerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a controller.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidConfig`] if the id is already registered.
    pub fn register(&self, controller: Controller) -> Result<(), AdmissionError> {
        let mut controllers = self.controllers.write();
        if controllers.contains_key(controller.id()) {
            return Err(AdmissionError::InvalidConfig(format!(
                "controller `{}` already registered",
                controller.id()
            )));
        }
        controllers.insert(controller.id().to_string(), controller);
        Ok(())
    }

    /// Return the controller `id`, creating it with `make` if absent.
    pub fn get_or_insert_with<F>(&self, id: &str, make: F) -> Controller
    where
        F: FnOnce() -> Controller,
    {
        if let Some(controller) = self.controllers.read().get(id) {
            return controller.clone();
        }
        self.controllers
            .write()
            .entry(id.to_string())
            .or_insert_with(make)
            .clone()
    }

    /// Look up a controller.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Controller> {
        self.controllers.read().get(id).cloned()
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.controllers.read().keys().cloned().collect()
    }

    /// All controllers, sorted by id.
    #[must_use]
    pub fn controllers(&self) -> Vec<Controller> {
        self.controllers.read().values().cloned().collect()
    }

    /// Snapshots of every controller.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ControllerSnapshot> {
        self.controllers()
            .iter()
            .map(Controller::snapshot)
            .collect()
    }

    /// Force a leak sweep on every controller. Returns leases reclaimed.
    pub fn reconcile_all(&self) -> usize {
        self.controllers()
            .iter()
            .map(Controller::reconcile_now)
            .sum()
    }

    /// Spawn a thread that sweeps every controller each `interval`.
    ///
    /// Admission already runs throttled sweeps; the supervisor covers controllers
    /// that have gone quiet while holding abandoned leases.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn_supervisor(
        self: &Arc<Self>,
        interval: Duration,
    ) -> std::io::Result<SupervisorHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let registry = Arc::clone(self);
        let join = thread::Builder::new()
            .name("fs-reconciler".into())
            .spawn(move || {
                info!(interval = ?interval, "reconciliation supervisor started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let reclaimed = registry.reconcile_all();
                            if reclaimed > 0 {
                                warn!(reclaimed, "supervisor reclaimed abandoned leases");
                            } else {
                                debug!("supervisor sweep clean");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("reconciliation supervisor stopped");
            })?;
        Ok(SupervisorHandle {
            stop_tx,
            join: Mutex::new(Some(join)),
        })
    }
}

/// Handle to a running reconciliation supervisor. Stops the thread on drop.
#[derive(Debug)]
pub struct SupervisorHandle {
    stop_tx: Sender<()>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisorHandle {
    /// Stop the supervisor and wait for it to exit.
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
        if let Some(join) = self.join.lock().take() {
            if join.join().is_err() {
                warn!("reconciliation supervisor panicked");
            }
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdmissionTimings, ControllerSettings, StaticConfigSource};

    fn controller(id: &str) -> Controller {
        Controller::builder(id)
            .with_config_source(Arc::new(StaticConfigSource::single(
                id,
                ControllerSettings::with_threshold(4),
            )))
            .with_timings(AdmissionTimings::default())
            .build()
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ControllerRegistry::new();
        registry.register(controller("a")).unwrap();
        assert!(registry.register(controller("a")).is_err());
        assert_eq!(registry.ids(), vec!["a".to_string()]);
    }

    #[test]
    fn test_get_or_insert_with_creates_once() {
        let registry = ControllerRegistry::new();
        let first = registry.get_or_insert_with("a", || controller("a"));
        first.get_category("x");
        let second = registry.get_or_insert_with("a", || controller("other"));
        assert_eq!(second.id(), "a");
        assert!(second.category("x").is_some());
    }

    #[test]
    fn test_supervisor_reclaims_dropped_lease() {
        let registry = Arc::new(ControllerRegistry::new());
        let ctl = controller("a");
        registry.register(ctl.clone()).unwrap();
        let cat = ctl.get_category("x");
        drop(cat.try_admit().unwrap());
        assert_eq!(cat.active(), 1);

        let supervisor = registry.spawn_supervisor(Duration::from_millis(10)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cat.active() != 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        supervisor.stop();
        assert_eq!(cat.active(), 0);
    }
}
