//! Controller: category registry, global ceiling, and aggregate accounting.
//!
//! One controller per administrative domain. It owns:
//!
//! - the category index (`RwLock`): read-mostly, write-locked only when a new name
//!   is first seen;
//! - the coarse state lock (`Mutex`): every category's mutable fields, the aggregate
//!   sums, and the outstanding lease table. Critical sections are O(1) apart from
//!   the throttled leak sweep;
//! - a settings cache refreshed from the [`ConfigSource`] at most once per
//!   `settings_refresh_ms`.
//!
//! Lock order is index → state. The admission path only takes the state lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builders::ControllerBuilder;
use crate::config::{AdmissionTimings, ConfigSource, ControllerSettings, SettingsSnapshot};
use crate::core::alert::{self, OverloadEvent, OverloadSink};
use crate::core::category::{Aggregates, Category, CategorySnapshot, CategoryState};
use crate::core::lease::{LeaseToken, SlotLease, ABANDONED, ACTIVE, RECONCILED};
use crate::core::AdmissionError;
use crate::util::clock::Clock;
use crate::util::telemetry::ADMISSION_TARGET;

/// State guarded by the controller's coarse lock.
#[derive(Debug, Default)]
pub(crate) struct ControllerState {
    categories: Vec<CategoryState>,
    totals: Aggregates,
    leases: HashMap<u64, Arc<LeaseToken>>,
    last_reconcile_ms: u64,
}

#[derive(Debug)]
struct CachedSettings {
    snapshot: Arc<SettingsSnapshot>,
    fetched_at_ms: u64,
}

pub(crate) struct ControllerInner {
    id: String,
    source: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn OverloadSink>,
    timings: AdmissionTimings,
    settings: RwLock<CachedSettings>,
    index: RwLock<HashMap<Arc<str>, usize>>,
    state: Mutex<ControllerState>,
    abandoned_tx: Sender<u64>,
    abandoned_rx: Receiver<u64>,
    next_lease_id: AtomicU64,
}

impl ControllerInner {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn notify_abandoned(&self, lease_id: u64) {
        // the receiver lives as long as `self`, so this cannot fail
        let _ = self.abandoned_tx.send(lease_id);
    }

    /// Cached settings, refreshed if older than the refresh interval.
    fn settings_at(&self, now: u64) -> Arc<SettingsSnapshot> {
        {
            let cached = self.settings.read();
            if now.saturating_sub(cached.fetched_at_ms) < self.timings.settings_refresh_ms {
                return Arc::clone(&cached.snapshot);
            }
        }
        let mut cached = self.settings.write();
        if now.saturating_sub(cached.fetched_at_ms) < self.timings.settings_refresh_ms {
            return Arc::clone(&cached.snapshot);
        }
        self.store_settings(&mut cached, now);
        Arc::clone(&cached.snapshot)
    }

    fn store_settings(&self, cached: &mut CachedSettings, now: u64) {
        let fresh = self.source.controller_settings(&self.id);
        if fresh.version != cached.snapshot.version {
            if let Err(e) = fresh.settings.validate() {
                warn!(controller = %self.id, version = fresh.version, error = %e, "applying invalid controller settings");
            }
            info!(
                controller = %self.id,
                version = fresh.version,
                threshold = fresh.settings.threshold,
                enabled = fresh.settings.enabled,
                share_unused = fresh.settings.share_unused,
                "controller settings refreshed"
            );
        }
        cached.snapshot = Arc::new(fresh);
        cached.fetched_at_ms = now;
    }

    fn base_weight(&self, settings: &ControllerSettings, category: &str) -> u32 {
        self.source
            .category_weight(&self.id, category)
            .unwrap_or_else(|| settings.weight_for(category))
    }

    /// The admission decision for one request.
    pub(crate) fn admit(this: &Arc<Self>, category: &Category) -> Result<SlotLease, AdmissionError> {
        let now = this.clock.now_ms();
        let snapshot = this.settings_at(now);
        let settings = &snapshot.settings;
        let idx = category.index();

        let mut guard = this.state.lock();
        let state = &mut *guard;
        state.categories[idx].record_submission(
            now,
            this.timings.popularity_window_ms,
            &mut state.totals,
        );
        this.reconcile_locked(state, now, settings, false);

        let cat = &mut state.categories[idx];
        if cat.weight_refresh_due(now, this.timings.weight_refresh_ms) {
            let weight = this.base_weight(settings, cat.name());
            cat.set_base_weight(weight, now);
        }
        cat.recompute_weight(now, settings, &mut state.totals);
        cat.sample_peak(now, this.timings.peak_sample_interval_ms);

        let limit = cat.compute_limit(settings.threshold, &state.totals);
        let active = cat.active();
        let transition = cat.check_overload(now, limit, settings);
        let granted = !settings.enabled
            || active < limit
            || (settings.share_unused && state.totals.total_active < settings.threshold);

        let outcome = if granted {
            cat.grant(now, &mut state.totals);
            let token = Arc::new(LeaseToken::new(
                this.next_lease_id.fetch_add(1, Ordering::Relaxed),
                idx,
                now,
            ));
            state.leases.insert(token.id, Arc::clone(&token));
            Ok(token)
        } else {
            cat.reject();
            Err(AdmissionError::Rejected {
                category: category.name().to_string(),
                active,
                limit,
            })
        };
        let total_active = state.totals.total_active;
        drop(guard);

        if let Some((transition, since_ms)) = transition {
            let event = OverloadEvent {
                event_id: Uuid::new_v4(),
                controller: this.id.clone(),
                category: category.name().to_string(),
                transition,
                active,
                limit,
                since_ms,
                at_ms: now,
            };
            alert::deliver(this.sink.as_ref(), &event);
        }

        match outcome {
            Ok(token) => {
                debug!(
                    controller = %this.id,
                    category = %category.name(),
                    lease_id = token.id,
                    active = active + 1,
                    limit,
                    total_active,
                    "lease granted"
                );
                Ok(SlotLease::new(category.clone(), token))
            }
            Err(e) => {
                debug!(
                    controller = %this.id,
                    category = %category.name(),
                    active,
                    limit,
                    total_active,
                    "admission rejected"
                );
                Err(e)
            }
        }
    }

    /// Settle an explicit release. Caller has already won the token CAS.
    pub(crate) fn finish(&self, token: &LeaseToken) -> Duration {
        let now = self.clock.now_ms();
        let snapshot = self.settings_at(now);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.leases.remove(&token.id);
        let held = state.categories[token.category].finish(
            token.granted_at_ms,
            now,
            &snapshot.settings,
            &mut state.totals,
        );
        Duration::from_millis(held)
    }

    /// Leak sweep. Throttled to `reconcile_interval_ms` unless `force` is set.
    fn reconcile_locked(
        &self,
        state: &mut ControllerState,
        now: u64,
        settings: &ControllerSettings,
        force: bool,
    ) -> usize {
        if !force && now.saturating_sub(state.last_reconcile_ms) < self.timings.reconcile_interval_ms {
            return 0;
        }
        state.last_reconcile_ms = now;

        let mut reclaimed = Vec::new();
        while let Ok(lease_id) = self.abandoned_rx.try_recv() {
            if let Some(token) = state.leases.remove(&lease_id) {
                reclaimed.push((token, "dropped without release"));
            }
        }

        if let Some(bound) = self.timings.abandon_after_ms {
            let stale: Vec<u64> = state
                .leases
                .values()
                .filter(|t| {
                    t.state() == ACTIVE
                        && !t.is_supervised()
                        && now.saturating_sub(t.last_heartbeat_ms()) >= bound
                })
                .map(|t| t.id)
                .collect();
            for lease_id in stale {
                let Some(token) = state.leases.get(&lease_id) else {
                    continue;
                };
                match token.transition(ACTIVE, RECONCILED) {
                    Ok(()) => {}
                    // dropped concurrently; its channel message will find nothing
                    Err(ABANDONED) => {}
                    // a releaser owns it and will settle under this lock
                    Err(_) => continue,
                }
                if let Some(token) = state.leases.remove(&lease_id) {
                    reclaimed.push((token, "heartbeat expired"));
                }
            }
        }

        for (token, reason) in &reclaimed {
            state.categories[token.category].abandon(
                token.granted_at_ms,
                now,
                settings,
                &mut state.totals,
            );
            warn!(
                target: ADMISSION_TARGET,
                controller = %self.id,
                category = %state.categories[token.category].name(),
                lease_id = token.id,
                held_ms = now.saturating_sub(token.granted_at_ms),
                reason,
                "reclaimed abandoned lease"
            );
        }
        reclaimed.len()
    }

    pub(crate) fn category_snapshot(&self, index: usize) -> CategorySnapshot {
        self.state.lock().categories[index].snapshot()
    }
}

/// Aggregate view of a controller and all its categories.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    /// Controller identifier.
    pub id: String,
    /// Settings version in use.
    pub settings_version: u64,
    /// Global ceiling.
    pub threshold: u32,
    /// Whether admission control is enforced.
    pub enabled: bool,
    /// Sum of adjusted weights of active categories.
    pub active_weight_sum: f64,
    /// Number of categories holding at least one lease.
    pub active_categories: u32,
    /// Sum of popularity of active categories.
    pub popularity_sum: f64,
    /// Leases held across all categories.
    pub total_active: u32,
    /// Leases tracked by the leak sweep.
    pub outstanding_leases: usize,
    /// Per-category state, in creation order.
    pub categories: Vec<CategorySnapshot>,
}

/// Admission controller for one administrative domain.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.inner.id)
            .field("timings", &self.inner.timings)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Start building a controller.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> ControllerBuilder {
        ControllerBuilder::new(id)
    }

    pub(crate) fn from_parts(
        id: String,
        source: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn OverloadSink>,
        timings: AdmissionTimings,
    ) -> Self {
        let now = clock.now_ms();
        let snapshot = source.controller_settings(&id);
        info!(
            controller = %id,
            version = snapshot.version,
            threshold = snapshot.settings.threshold,
            enabled = snapshot.settings.enabled,
            "controller created"
        );
        let (abandoned_tx, abandoned_rx) = unbounded();
        let inner = ControllerInner {
            id,
            source,
            clock,
            sink,
            timings,
            settings: RwLock::new(CachedSettings {
                snapshot: Arc::new(snapshot),
                fetched_at_ms: now,
            }),
            index: RwLock::new(HashMap::new()),
            state: Mutex::new(ControllerState {
                last_reconcile_ms: now,
                ..ControllerState::default()
            }),
            abandoned_tx,
            abandoned_rx,
            next_lease_id: AtomicU64::new(1),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Controller identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Get or create the category called `name`.
    pub fn get_category(&self, name: &str) -> Category {
        if let Some((key, &idx)) = self.inner.index.read().get_key_value(name) {
            return Category::new(Arc::clone(&self.inner), idx, Arc::clone(key));
        }

        let mut index = self.inner.index.write();
        if let Some((key, &idx)) = index.get_key_value(name) {
            return Category::new(Arc::clone(&self.inner), idx, Arc::clone(key));
        }
        let now = self.inner.now_ms();
        let snapshot = self.inner.settings_at(now);
        let weight = self.inner.base_weight(&snapshot.settings, name);
        let key: Arc<str> = Arc::from(name);
        let idx = {
            let mut state = self.inner.state.lock();
            state
                .categories
                .push(CategoryState::new(Arc::clone(&key), weight, now));
            state.categories.len() - 1
        };
        index.insert(Arc::clone(&key), idx);
        debug!(controller = %self.inner.id, category = name, weight, "category created");
        Category::new(Arc::clone(&self.inner), idx, key)
    }

    /// Look up an existing category without creating it.
    #[must_use]
    pub fn category(&self, name: &str) -> Option<Category> {
        self.inner
            .index
            .read()
            .get_key_value(name)
            .map(|(key, &idx)| Category::new(Arc::clone(&self.inner), idx, Arc::clone(key)))
    }

    /// All categories, in creation order.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        let index = self.inner.index.read();
        let mut all: Vec<Category> = index
            .iter()
            .map(|(key, &idx)| Category::new(Arc::clone(&self.inner), idx, Arc::clone(key)))
            .collect();
        all.sort_by_key(Category::index);
        all
    }

    fn settings(&self) -> Arc<SettingsSnapshot> {
        self.inner.settings_at(self.inner.now_ms())
    }

    /// Global slot ceiling.
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.settings().settings.threshold
    }

    /// Whether admission control is enforced.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.settings().settings.enabled
    }

    /// Warning band, percent of a category's limit.
    #[must_use]
    pub fn warning_threshold(&self) -> u32 {
        self.settings().settings.warning_threshold_percent
    }

    /// Release band, percent of a category's limit.
    #[must_use]
    pub fn release_threshold(&self) -> u32 {
        self.settings().settings.release_threshold_percent
    }

    /// Re-read settings from the configuration source now.
    pub fn refresh_settings(&self) {
        let now = self.inner.now_ms();
        let mut cached = self.inner.settings.write();
        self.inner.store_settings(&mut cached, now);
    }

    /// Run the leak sweep immediately. Returns the number of reclaimed leases.
    pub fn reconcile_now(&self) -> usize {
        let now = self.inner.now_ms();
        let snapshot = self.inner.settings_at(now);
        let mut state = self.inner.state.lock();
        self.inner
            .reconcile_locked(&mut state, now, &snapshot.settings, true)
    }

    /// Leases held across all categories.
    #[must_use]
    pub fn total_active(&self) -> u32 {
        self.inner.state.lock().totals.total_active
    }

    /// Full snapshot of aggregates and categories.
    #[must_use]
    pub fn snapshot(&self) -> ControllerSnapshot {
        let settings = self.settings();
        let state = self.inner.state.lock();
        ControllerSnapshot {
            id: self.inner.id.clone(),
            settings_version: settings.version,
            threshold: settings.settings.threshold,
            enabled: settings.settings.enabled,
            active_weight_sum: state.totals.active_weight_sum,
            active_categories: state.totals.active_categories,
            popularity_sum: state.totals.popularity_sum,
            total_active: state.totals.total_active,
            outstanding_leases: state.leases.len(),
            categories: state.categories.iter().map(CategoryState::snapshot).collect(),
        }
    }
}
