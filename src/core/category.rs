//! Per-category admission state and the weight adaptation algorithm.
//!
//! A category is a named class of work. Its share of the controller's global
//! ceiling is proportional to its *adjusted weight*:
//!
//! ```text
//! adjusted = base_weight × speed_factor × popularity_factor
//! limit    = max(1, round(threshold × adjusted / Σ adjusted of active categories))
//! ```
//!
//! - The **speed factor** (0.4..=1.0) compares the all-time average task duration
//!   with a moment estimate blending running leases and the last 50 completions. A
//!   category currently slower than its history is throttled; it is never boosted for
//!   being faster.
//! - The **popularity factor** (1.0..=2.5) compares the category's submissions per
//!   second with the average over active categories. Busy categories are boosted and
//!   never penalized.
//!
//! All mutable state lives in [`CategoryState`], which is owned by the controller and
//! only touched while the controller lock is held. [`Category`] is a cheap handle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::config::ControllerSettings;
use crate::core::alert::OverloadTransition;
use crate::core::controller::ControllerInner;
use crate::core::lease::SlotLease;
use crate::core::AdmissionError;
use crate::util::telemetry::ADMISSION_TARGET;

/// Length of the popularity and duration histories.
pub const HISTORY_LEN: usize = 50;
/// Lower bound of the speed factor.
pub const MIN_SPEED_FACTOR: f64 = 0.4;
/// Upper bound of the speed factor.
pub const MAX_SPEED_FACTOR: f64 = 1.0;
/// Lower bound of the popularity factor.
pub const MIN_POPULARITY_FACTOR: f64 = 1.0;
/// Upper bound of the popularity factor.
pub const MAX_POPULARITY_FACTOR: f64 = 2.5;

/// Controller-wide sums over categories with at least one active lease.
#[derive(Debug, Clone, Default)]
pub(crate) struct Aggregates {
    pub(crate) active_weight_sum: f64,
    pub(crate) active_categories: u32,
    pub(crate) popularity_sum: f64,
    pub(crate) total_active: u32,
}

/// Mutable admission state of one category. Guarded by the controller lock.
#[derive(Debug)]
pub(crate) struct CategoryState {
    name: Arc<str>,
    base_weight: u32,
    weight_checked_ms: u64,
    adjusted_weight: f64,
    speed_factor: f64,
    popularity_factor: f64,
    popularity: f64,
    popularity_history: VecDeque<u32>,
    popularity_history_sum: u64,
    window_submissions: u32,
    window_started_ms: u64,
    recent_durations: VecDeque<u64>,
    recent_duration_sum: u64,
    finished_count: u64,
    finished_duration_sum: u128,
    active: u32,
    active_offset_sum: u128,
    limit: u32,
    peak_active: u32,
    peak_sampled_ms: u64,
    admitted: u64,
    rejected: u64,
    abandoned: u64,
    overloaded: bool,
    overload_changed_ms: u64,
}

impl CategoryState {
    pub(crate) fn new(name: Arc<str>, base_weight: u32, now: u64) -> Self {
        Self {
            name,
            base_weight,
            weight_checked_ms: now,
            adjusted_weight: f64::from(base_weight),
            speed_factor: MAX_SPEED_FACTOR,
            popularity_factor: MIN_POPULARITY_FACTOR,
            popularity: 0.0,
            popularity_history: VecDeque::with_capacity(HISTORY_LEN + 1),
            popularity_history_sum: 0,
            window_submissions: 0,
            window_started_ms: now,
            recent_durations: VecDeque::with_capacity(HISTORY_LEN + 1),
            recent_duration_sum: 0,
            finished_count: 0,
            finished_duration_sum: 0,
            active: 0,
            active_offset_sum: 0,
            limit: 1,
            peak_active: 0,
            peak_sampled_ms: now,
            admitted: 0,
            rejected: 0,
            abandoned: 0,
            overloaded: false,
            overload_changed_ms: now,
        }
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) const fn active(&self) -> u32 {
        self.active
    }

    const fn is_active(&self) -> bool {
        self.active > 0
    }

    pub(crate) const fn weight_refresh_due(&self, now: u64, interval_ms: u64) -> bool {
        now.saturating_sub(self.weight_checked_ms) >= interval_ms
    }

    pub(crate) fn set_base_weight(&mut self, weight: u32, now: u64) {
        if weight != self.base_weight {
            debug!(category = %self.name, from = self.base_weight, to = weight, "base weight changed");
        }
        self.base_weight = weight;
        self.weight_checked_ms = now;
    }

    /// Count one submission and fold finished popularity windows into the history.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn record_submission(&mut self, now: u64, window_ms: u64, totals: &mut Aggregates) {
        self.window_submissions = self.window_submissions.saturating_add(1);
        let elapsed = now.saturating_sub(self.window_started_ms);
        if elapsed < window_ms.max(1) {
            return;
        }

        // Whole windows without any submission count as zero samples.
        let silent = usize::try_from(elapsed / window_ms.max(1) - 1)
            .unwrap_or(usize::MAX)
            .min(HISTORY_LEN);
        for _ in 0..silent {
            self.push_popularity_sample(0);
        }
        self.push_popularity_sample(self.window_submissions);
        self.window_submissions = 0;
        self.window_started_ms = now;

        let previous = self.popularity;
        self.popularity = self.popularity_history_sum as f64 / self.popularity_history.len() as f64;
        if self.is_active() {
            totals.popularity_sum += self.popularity - previous;
        }
    }

    fn push_popularity_sample(&mut self, sample: u32) {
        self.popularity_history.push_back(sample);
        self.popularity_history_sum += u64::from(sample);
        if self.popularity_history.len() > HISTORY_LEN {
            if let Some(old) = self.popularity_history.pop_front() {
                self.popularity_history_sum -= u64::from(old);
            }
        }
    }

    fn push_duration(&mut self, duration_ms: u64) {
        self.recent_durations.push_back(duration_ms);
        self.recent_duration_sum += duration_ms;
        if self.recent_durations.len() > HISTORY_LEN {
            if let Some(old) = self.recent_durations.pop_front() {
                self.recent_duration_sum -= old;
            }
        }
        self.finished_count += 1;
        self.finished_duration_sum += u128::from(duration_ms);
    }

    /// Recompute speed/popularity factors and the adjusted weight.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn recompute_weight(
        &mut self,
        now: u64,
        settings: &ControllerSettings,
        totals: &mut Aggregates,
    ) {
        let samples = u128::from(self.active) + self.recent_durations.len() as u128;
        if samples > 0 {
            let running = (u128::from(now) * u128::from(self.active))
                .saturating_sub(self.active_offset_sum);
            let moment =
                (running + u128::from(self.recent_duration_sum)) as f64 / samples as f64;
            let total = if self.finished_count > 0 {
                self.finished_duration_sum as f64 / self.finished_count as f64
            } else {
                moment
            };
            self.speed_factor = if moment > 0.0 {
                (total / moment).clamp(MIN_SPEED_FACTOR, MAX_SPEED_FACTOR)
            } else {
                MAX_SPEED_FACTOR
            };
        }
        self.popularity_factor = popularity_factor(self.popularity, totals);

        let mut weight = f64::from(self.base_weight);
        if !settings.ignore_speed {
            weight *= self.speed_factor;
        }
        if !settings.ignore_popularity {
            weight *= self.popularity_factor;
        }
        let previous = self.adjusted_weight;
        self.adjusted_weight = weight;
        if self.is_active() {
            totals.active_weight_sum += weight - previous;
        }
        self.peak_active = self.peak_active.max(self.active);
    }

    /// Emit and reset the peak active count once per `interval_ms`.
    pub(crate) fn sample_peak(&mut self, now: u64, interval_ms: u64) {
        if now.saturating_sub(self.peak_sampled_ms) < interval_ms {
            return;
        }
        debug!(
            target: ADMISSION_TARGET,
            category = %self.name,
            peak_active = self.peak_active,
            limit = self.limit,
            adjusted_weight = self.adjusted_weight,
            "peak active sample"
        );
        self.peak_active = 0;
        self.peak_sampled_ms = now;
    }

    /// Provisional fair share of `threshold` for this category.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn compute_limit(&mut self, threshold: u32, totals: &Aggregates) -> u32 {
        let all_weight = if self.is_active() {
            totals.active_weight_sum
        } else {
            totals.active_weight_sum + self.adjusted_weight
        };
        let share = if all_weight > 0.0 {
            (f64::from(threshold) * self.adjusted_weight / all_weight).round()
        } else {
            0.0
        };
        self.limit = if share.is_finite() && share >= 1.0 {
            share.min(f64::from(u32::MAX)) as u32
        } else {
            1
        };
        self.limit
    }

    /// Two-band hysteresis. Returns the transition and the previous transition time.
    pub(crate) fn check_overload(
        &mut self,
        now: u64,
        limit: u32,
        settings: &ControllerSettings,
    ) -> Option<(OverloadTransition, u64)> {
        let active = f64::from(self.active);
        let limit = f64::from(limit);
        let warning = limit * f64::from(settings.warning_threshold_percent) / 100.0;
        let release = limit * f64::from(settings.release_threshold_percent) / 100.0;

        let transition = if !self.overloaded && active > warning {
            OverloadTransition::Entered
        } else if self.overloaded && active < release {
            OverloadTransition::Cleared
        } else {
            return None;
        };
        let since = self.overload_changed_ms;
        self.overloaded = transition == OverloadTransition::Entered;
        self.overload_changed_ms = now;
        Some((transition, since))
    }

    /// Account for a newly granted lease.
    pub(crate) fn grant(&mut self, now: u64, totals: &mut Aggregates) {
        if self.active == 0 {
            totals.active_weight_sum += self.adjusted_weight;
            totals.active_categories += 1;
            totals.popularity_sum += self.popularity;
        }
        self.active += 1;
        self.active_offset_sum += u128::from(now);
        self.admitted += 1;
        self.peak_active = self.peak_active.max(self.active);
        totals.total_active += 1;
    }

    pub(crate) fn reject(&mut self) {
        self.rejected += 1;
    }

    /// Account for an explicit release. Returns the held duration in milliseconds.
    pub(crate) fn finish(
        &mut self,
        granted_at: u64,
        now: u64,
        settings: &ControllerSettings,
        totals: &mut Aggregates,
    ) -> u64 {
        let duration = now.saturating_sub(granted_at);
        self.push_duration(duration);
        self.deactivate_one(granted_at, totals);
        self.recompute_weight(now, settings, totals);
        duration
    }

    /// Account for a lease reclaimed by the leak sweep. Its duration is not recorded.
    pub(crate) fn abandon(
        &mut self,
        granted_at: u64,
        now: u64,
        settings: &ControllerSettings,
        totals: &mut Aggregates,
    ) {
        self.abandoned += 1;
        self.deactivate_one(granted_at, totals);
        self.recompute_weight(now, settings, totals);
    }

    fn deactivate_one(&mut self, granted_at: u64, totals: &mut Aggregates) {
        debug_assert!(self.active > 0, "deactivating idle category {}", self.name);
        if self.active == 0 {
            return;
        }
        self.active -= 1;
        self.active_offset_sum = self.active_offset_sum.saturating_sub(u128::from(granted_at));
        totals.total_active = totals.total_active.saturating_sub(1);
        if self.active == 0 {
            totals.active_weight_sum -= self.adjusted_weight;
            totals.popularity_sum -= self.popularity;
            totals.active_categories = totals.active_categories.saturating_sub(1);
            if totals.active_categories == 0 {
                // drop accumulated float drift
                totals.active_weight_sum = 0.0;
                totals.popularity_sum = 0.0;
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn snapshot(&self) -> CategorySnapshot {
        let recent_avg_ms = if self.recent_durations.is_empty() {
            0.0
        } else {
            self.recent_duration_sum as f64 / self.recent_durations.len() as f64
        };
        let total_avg_ms = if self.finished_count == 0 {
            0.0
        } else {
            self.finished_duration_sum as f64 / self.finished_count as f64
        };
        CategorySnapshot {
            name: self.name.to_string(),
            base_weight: self.base_weight,
            adjusted_weight: self.adjusted_weight,
            speed_factor: self.speed_factor,
            popularity_factor: self.popularity_factor,
            popularity: self.popularity,
            active: self.active,
            limit: self.limit,
            peak_active: self.peak_active,
            admitted: self.admitted,
            rejected: self.rejected,
            abandoned: self.abandoned,
            finished: self.finished_count,
            recent_avg_ms,
            total_avg_ms,
            overloaded: self.overloaded,
            overload_changed_ms: self.overload_changed_ms,
        }
    }
}

fn popularity_factor(popularity: f64, totals: &Aggregates) -> f64 {
    if totals.active_categories == 0 {
        return MIN_POPULARITY_FACTOR;
    }
    let average = totals.popularity_sum / f64::from(totals.active_categories);
    if average <= 0.0 {
        return MIN_POPULARITY_FACTOR;
    }
    (popularity / average).clamp(MIN_POPULARITY_FACTOR, MAX_POPULARITY_FACTOR)
}

/// Point-in-time view of one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySnapshot {
    /// Category name.
    pub name: String,
    /// Externally configured base weight.
    pub base_weight: u32,
    /// Base weight scaled by the enabled factors.
    pub adjusted_weight: f64,
    /// Latest speed factor.
    pub speed_factor: f64,
    /// Latest popularity factor.
    pub popularity_factor: f64,
    /// Mean submissions per popularity window.
    pub popularity: f64,
    /// Leases currently held.
    pub active: u32,
    /// Most recently computed limit.
    pub limit: u32,
    /// Peak active count since the last sample.
    pub peak_active: u32,
    /// Leases granted.
    pub admitted: u64,
    /// Requests refused.
    pub rejected: u64,
    /// Leases reclaimed by the leak sweep.
    pub abandoned: u64,
    /// Leases released explicitly.
    pub finished: u64,
    /// Mean of the recent duration history.
    pub recent_avg_ms: f64,
    /// Mean duration over all releases.
    pub total_avg_ms: f64,
    /// Whether the category is flagged as overloaded.
    pub overloaded: bool,
    /// Timestamp of the last overload transition.
    pub overload_changed_ms: u64,
}

/// Handle to a category registered in a [`Controller`](crate::core::Controller).
///
/// Handles are cheap to clone; every clone refers to the same state.
#[derive(Clone)]
pub struct Category {
    controller: Arc<ControllerInner>,
    index: usize,
    name: Arc<str>,
}

impl std::fmt::Debug for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Category")
            .field("controller", &self.controller.id())
            .field("name", &self.name)
            .finish()
    }
}

impl Category {
    pub(crate) const fn new(controller: Arc<ControllerInner>, index: usize, name: Arc<str>) -> Self {
        Self {
            controller,
            index,
            name,
        }
    }

    pub(crate) const fn index(&self) -> usize {
        self.index
    }

    pub(crate) const fn controller_inner(&self) -> &Arc<ControllerInner> {
        &self.controller
    }

    /// Category name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the owning controller.
    #[must_use]
    pub fn controller_id(&self) -> &str {
        self.controller.id()
    }

    /// Ask for a slot. Never blocks waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Rejected`] when neither the category limit nor
    /// (with `share_unused`) idle global capacity allows another lease.
    pub fn try_admit(&self) -> Result<SlotLease, AdmissionError> {
        ControllerInner::admit(&self.controller, self)
    }

    /// Release a lease obtained from this category.
    ///
    /// Equivalent to [`SlotLease::release`].
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::DoubleRelease`] if the lease was already released.
    pub fn release(&self, lease: &mut SlotLease) -> Result<Duration, AdmissionError> {
        debug_assert_eq!(lease.category_index(), self.index, "lease from another category");
        lease.release()
    }

    /// Current state of this category.
    #[must_use]
    pub fn snapshot(&self) -> CategorySnapshot {
        self.controller.category_snapshot(self.index)
    }

    /// Leases currently held.
    #[must_use]
    pub fn active(&self) -> u32 {
        self.snapshot().active
    }

    /// Most recently computed limit.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.snapshot().limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(name: &str, weight: u32) -> CategoryState {
        CategoryState::new(Arc::from(name), weight, 0)
    }

    #[test]
    fn test_limit_is_share_of_active_weight() {
        let settings = ControllerSettings::with_threshold(10);
        let mut totals = Aggregates::default();
        let mut a = state("a", 1000);
        let mut b = state("b", 1000);

        a.recompute_weight(0, &settings, &mut totals);
        assert_eq!(a.compute_limit(10, &totals), 10);
        a.grant(0, &mut totals);

        b.recompute_weight(0, &settings, &mut totals);
        assert_eq!(b.compute_limit(10, &totals), 5);
        b.grant(0, &mut totals);

        a.recompute_weight(0, &settings, &mut totals);
        assert_eq!(a.compute_limit(10, &totals), 5);
        assert_eq!(totals.active_categories, 2);
        assert_eq!(totals.total_active, 2);
    }

    #[test]
    fn test_peak_resets_after_sample_interval() {
        let mut totals = Aggregates::default();
        let mut cat = state("bursty", 1000);
        for _ in 0..3 {
            cat.grant(0, &mut totals);
        }
        cat.sample_peak(500, 1_000);
        assert_eq!(cat.snapshot().peak_active, 3);

        cat.sample_peak(1_000, 1_000);
        assert_eq!(cat.snapshot().peak_active, 0);
        assert_eq!(cat.snapshot().active, 3);
    }

    #[test]
    fn test_limit_never_below_one() {
        let settings = ControllerSettings::with_threshold(1);
        let mut totals = Aggregates::default();
        let mut heavy = state("heavy", 100_000);
        heavy.recompute_weight(0, &settings, &mut totals);
        heavy.grant(0, &mut totals);

        let mut light = state("light", 1);
        light.recompute_weight(0, &settings, &mut totals);
        assert_eq!(light.compute_limit(1, &totals), 1);
    }

    #[test]
    fn test_speed_factor_clamps_to_floor() {
        let settings = ControllerSettings::with_threshold(10);
        let mut totals = Aggregates::default();
        let mut cat = state("slow", 1000);

        // long history of 100 ms tasks, then a recent window of 1 s tasks
        let mut now = 0;
        for _ in 0..500 {
            cat.grant(now, &mut totals);
            now += 100;
            cat.finish(now - 100, now, &settings, &mut totals);
        }
        assert!((cat.speed_factor - 1.0).abs() < f64::EPSILON);
        for _ in 0..HISTORY_LEN {
            cat.grant(now, &mut totals);
            now += 1000;
            cat.finish(now - 1000, now, &settings, &mut totals);
        }
        assert!((cat.speed_factor - MIN_SPEED_FACTOR).abs() < 1e-9);
        assert!((cat.adjusted_weight - 400.0).abs() < 1e-6);
    }

    #[test]
    fn test_speed_factor_never_above_one() {
        let settings = ControllerSettings::with_threshold(10);
        let mut totals = Aggregates::default();
        let mut cat = state("fast", 1000);
        let mut now = 0;
        for _ in 0..100 {
            cat.grant(now, &mut totals);
            now += 1000;
            cat.finish(now - 1000, now, &settings, &mut totals);
        }
        for _ in 0..HISTORY_LEN {
            cat.grant(now, &mut totals);
            now += 10;
            cat.finish(now - 10, now, &settings, &mut totals);
        }
        assert!((cat.speed_factor - MAX_SPEED_FACTOR).abs() < f64::EPSILON);
    }

    #[test]
    fn test_popularity_folds_silent_windows() {
        let mut totals = Aggregates::default();
        let mut cat = state("p", 1000);
        for _ in 0..9 {
            cat.record_submission(500, 1000, &mut totals);
        }
        // 10th submission closes the first window
        cat.record_submission(1000, 1000, &mut totals);
        assert_eq!(cat.popularity_history.len(), 1);
        assert!((cat.popularity - 10.0).abs() < f64::EPSILON);

        // three seconds later: two silent windows plus one sample of 1
        cat.record_submission(4000, 1000, &mut totals);
        assert_eq!(cat.popularity_history.len(), 4);
        assert!((cat.popularity - 11.0 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_popularity_history_is_bounded() {
        let mut totals = Aggregates::default();
        let mut cat = state("p", 1000);
        let mut now = 0;
        for _ in 0..(HISTORY_LEN * 3) {
            now += 1000;
            cat.record_submission(now, 1000, &mut totals);
        }
        assert_eq!(cat.popularity_history.len(), HISTORY_LEN);
        assert!((cat.popularity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_popularity_factor_bounds() {
        let totals = Aggregates {
            active_weight_sum: 0.0,
            active_categories: 2,
            popularity_sum: 10.0,
            total_active: 2,
        };
        assert!((popularity_factor(1000.0, &totals) - MAX_POPULARITY_FACTOR).abs() < f64::EPSILON);
        assert!((popularity_factor(0.1, &totals) - MIN_POPULARITY_FACTOR).abs() < f64::EPSILON);
        assert!((popularity_factor(10.0, &totals) - 2.0).abs() < f64::EPSILON);
        assert!(
            (popularity_factor(5.0, &Aggregates::default()) - MIN_POPULARITY_FACTOR).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn test_hysteresis_bands() {
        let settings = ControllerSettings {
            warning_threshold_percent: 80,
            release_threshold_percent: 50,
            ..ControllerSettings::with_threshold(10)
        };
        let mut totals = Aggregates::default();
        let mut cat = state("h", 1000);
        for _ in 0..8 {
            cat.grant(0, &mut totals);
        }
        assert_eq!(cat.check_overload(1, 10, &settings), None);
        cat.grant(0, &mut totals);
        assert_eq!(
            cat.check_overload(2, 10, &settings),
            Some((OverloadTransition::Entered, 0))
        );
        // inside the band: no flapping
        for _ in 0..3 {
            cat.finish(0, 3, &settings, &mut totals);
        }
        assert_eq!(cat.check_overload(3, 10, &settings), None);
        for _ in 0..2 {
            cat.finish(0, 4, &settings, &mut totals);
        }
        assert_eq!(
            cat.check_overload(5, 10, &settings),
            Some((OverloadTransition::Cleared, 2))
        );
    }

    #[test]
    fn test_last_release_clears_aggregates() {
        let settings = ControllerSettings::with_threshold(10);
        let mut totals = Aggregates::default();
        let mut cat = state("a", 1000);
        cat.recompute_weight(0, &settings, &mut totals);
        cat.grant(0, &mut totals);
        cat.grant(0, &mut totals);
        assert!((totals.active_weight_sum - 1000.0).abs() < f64::EPSILON);

        cat.finish(0, 10, &settings, &mut totals);
        assert_eq!(totals.active_categories, 1);
        cat.abandon(0, 20, &settings, &mut totals);
        assert_eq!(totals.active_categories, 0);
        assert_eq!(totals.total_active, 0);
        assert!(totals.active_weight_sum.abs() < f64::EPSILON);
        assert_eq!(cat.snapshot().abandoned, 1);
        assert_eq!(cat.snapshot().finished, 1);
    }

    #[test]
    fn test_ignore_toggles_use_base_weight() {
        let settings = ControllerSettings {
            ignore_speed: true,
            ignore_popularity: true,
            ..ControllerSettings::with_threshold(10)
        };
        let mut totals = Aggregates::default();
        let mut cat = state("a", 700);
        cat.speed_factor = 0.5;
        cat.recompute_weight(0, &settings, &mut totals);
        assert!((cat.adjusted_weight - 700.0).abs() < f64::EPSILON);
    }
}
