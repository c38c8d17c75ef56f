use crate::clock::Clock;
use crate::config::Pricing;
use crate::models::{BackendKind, DailyReport};
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Spend counters for one local calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetState {
    pub day: NaiveDate,
    pub daily_limit: f64,
    pub spent_today: f64,
    pub request_count: u64,
    pub cache_hit_count: u64,
}

impl BudgetState {
    fn fresh(day: NaiveDate, daily_limit: f64) -> Self {
        Self {
            day,
            daily_limit,
            spent_today: 0.0,
            request_count: 0,
            cache_hit_count: 0,
        }
    }
}

/// Tracks paid-backend spend against a daily ceiling.
///
/// `can_afford` followed by `record` is a check-then-act sequence: two
/// concurrent callers can both pass the check. Overrun is bounded by the
/// number of in-flight requests times their cost; budget enforcement is
/// advisory cost control.
pub struct CostMonitor {
    state: Mutex<BudgetState>,
    pricing: HashMap<BackendKind, Pricing>,
    clock: Arc<dyn Clock>,
}

impl CostMonitor {
    pub fn new(
        daily_limit: f64,
        pricing: HashMap<BackendKind, Pricing>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let today = clock.today();
        Self {
            state: Mutex::new(BudgetState::fresh(today, daily_limit)),
            pricing,
            clock,
        }
    }

    /// Lock the state, resetting counters first if the local date changed.
    fn current(&self) -> parking_lot::MutexGuard<'_, BudgetState> {
        let today = self.clock.today();
        let mut state = self.state.lock();
        if state.day != today {
            info!(
                previous_day = %state.day,
                spent = state.spent_today,
                requests = state.request_count,
                "budget day rolled over"
            );
            let limit = state.daily_limit;
            *state = BudgetState::fresh(today, limit);
        }
        state
    }

    /// Estimated cost of sending `text` to `backend`: characters in fixed-size
    /// units, rounded up, with a per-request minimum.
    pub fn estimate_cost(&self, text: &str, backend: BackendKind) -> f64 {
        self.estimate_request_cost(text, backend, false)
    }

    /// Like `estimate_cost`, adding key phrase extraction when `key_phrases`
    /// is set. Backends bill it as its own call over the same units.
    pub fn estimate_request_cost(&self, text: &str, backend: BackendKind, key_phrases: bool) -> f64 {
        let Some(pricing) = self.pricing.get(&backend) else {
            return 0.0;
        };
        let chars = text.chars().count() as u64;
        let unit = u64::from(pricing.unit_chars.max(1));
        let units = chars.div_ceil(unit).max(u64::from(pricing.min_units)) as f64;
        let mut cost = units * pricing.price_per_unit;
        if key_phrases {
            cost += units * pricing.key_phrase_price_per_unit;
        }
        cost
    }

    /// True iff `spent_today + estimated_cost <= daily_limit`.
    pub fn can_afford(&self, estimated_cost: f64) -> bool {
        let state = self.current();
        state.spent_today + estimated_cost <= state.daily_limit
    }

    /// Record one billed call. Must be called exactly once per billed call.
    pub fn record(&self, actual_cost: f64) {
        let mut state = self.current();
        state.spent_today += actual_cost.max(0.0);
        state.request_count += 1;
    }

    pub fn record_cache_hit(&self) {
        let mut state = self.current();
        state.cache_hit_count += 1;
    }

    pub fn daily_report(&self) -> DailyReport {
        let state = self.current();
        DailyReport {
            day: state.day,
            spent_today: state.spent_today,
            daily_limit: state.daily_limit,
            request_count: state.request_count,
            cache_hit_count: state.cache_hit_count,
            remaining: (state.daily_limit - state.spent_today).max(0.0),
        }
    }

    /// The limit is configuration and may change between (or within) days.
    pub fn set_daily_limit(&self, daily_limit: f64) {
        let mut state = self.current();
        state.daily_limit = daily_limit;
    }

    pub fn snapshot(&self) -> BudgetState {
        self.current().clone()
    }

    /// Restore persisted counters. Only a snapshot from today is applied;
    /// the configured limit is kept.
    pub fn restore(&self, saved: &BudgetState) -> bool {
        let mut state = self.current();
        if saved.day != state.day {
            return false;
        }
        state.spent_today = saved.spent_today;
        state.request_count = saved.request_count;
        state.cache_hit_count = saved.cache_hit_count;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    fn pricing() -> HashMap<BackendKind, Pricing> {
        let mut map = HashMap::new();
        map.insert(BackendKind::Comprehend, Pricing::default());
        map.insert(
            BackendKind::Command,
            Pricing {
                unit_chars: 1000,
                price_per_unit: 0.002,
                min_units: 1,
                key_phrase_price_per_unit: 0.0,
            },
        );
        map
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 22, 0, 0).unwrap()))
    }

    #[test]
    fn test_estimate_cost_units_and_minimum() {
        let monitor = CostMonitor::new(1.0, pricing(), clock());
        // 10 chars -> 1 unit, raised to the 3-unit minimum.
        let short = monitor.estimate_cost("0123456789", BackendKind::Comprehend);
        assert!((short - 0.0003).abs() < 1e-12);
        // 450 chars -> 5 units.
        let long = monitor.estimate_cost(&"x".repeat(450), BackendKind::Comprehend);
        assert!((long - 0.0005).abs() < 1e-12);
        // Backend-specific pricing.
        let cmd = monitor.estimate_cost(&"x".repeat(1001), BackendKind::Command);
        assert!((cmd - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_key_phrases_billed_on_top() {
        let monitor = CostMonitor::new(1.0, pricing(), clock());
        let text = "x".repeat(450);
        let plain = monitor.estimate_cost(&text, BackendKind::Comprehend);
        let with_phrases = monitor.estimate_request_cost(&text, BackendKind::Comprehend, true);
        assert!((with_phrases - 2.0 * plain).abs() < 1e-12);
        assert_eq!(
            monitor.estimate_request_cost(&text, BackendKind::Comprehend, false),
            plain
        );
        // Priced at zero for the command backend.
        let cmd = monitor.estimate_cost(&text, BackendKind::Command);
        assert_eq!(monitor.estimate_request_cost(&text, BackendKind::Command, true), cmd);
    }

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        let monitor = CostMonitor::new(1.0, pricing(), clock());
        let ascii = monitor.estimate_cost(&"a".repeat(400), BackendKind::Comprehend);
        let accented = monitor.estimate_cost(&"é".repeat(400), BackendKind::Comprehend);
        assert_eq!(ascii, accented);
    }

    #[test]
    fn test_can_afford_is_inclusive() {
        let monitor = CostMonitor::new(0.5, pricing(), clock());
        assert!(monitor.can_afford(0.5));
        monitor.record(0.25);
        assert!(monitor.can_afford(0.25));
        assert!(!monitor.can_afford(0.2500001));
    }

    #[test]
    fn test_record_and_report() {
        let monitor = CostMonitor::new(1.0, pricing(), clock());
        monitor.record(0.1);
        monitor.record(0.2);
        monitor.record_cache_hit();
        let report = monitor.daily_report();
        assert!((report.spent_today - 0.3).abs() < 1e-12);
        assert_eq!(report.request_count, 2);
        assert_eq!(report.cache_hit_count, 1);
        assert!((report.remaining - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_cache_hit_does_not_spend() {
        let monitor = CostMonitor::new(1.0, pricing(), clock());
        monitor.record_cache_hit();
        assert_eq!(monitor.daily_report().spent_today, 0.0);
        assert_eq!(monitor.daily_report().request_count, 0);
    }

    #[test]
    fn test_spend_monotonic_then_resets_at_rollover() {
        let clock = clock();
        let monitor = CostMonitor::new(1.0, pricing(), clock.clone());
        let mut last = 0.0;
        for _ in 0..5 {
            monitor.record(0.05);
            let spent = monitor.daily_report().spent_today;
            assert!(spent >= last);
            last = spent;
        }
        monitor.record(-1.0); // negative costs never reduce spend
        assert!(monitor.daily_report().spent_today >= last);

        clock.advance(Duration::hours(1)); // 23:00, same day
        assert!(monitor.daily_report().spent_today > 0.0);

        clock.advance(Duration::hours(2)); // next day
        let report = monitor.daily_report();
        assert_eq!(report.spent_today, 0.0);
        assert_eq!(report.request_count, 0);
        assert_eq!(report.cache_hit_count, 0);
        assert_eq!(report.daily_limit, 1.0);
    }

    #[test]
    fn test_exhausted_budget_refuses_then_recovers_next_day() {
        let clock = clock();
        let monitor = CostMonitor::new(0.001, pricing(), clock.clone());
        monitor.record(0.001);
        assert!(!monitor.can_afford(0.0003));
        clock.advance(Duration::days(1));
        assert!(monitor.can_afford(0.0003));
    }

    #[test]
    fn test_set_daily_limit() {
        let monitor = CostMonitor::new(1.0, pricing(), clock());
        monitor.record(0.8);
        monitor.set_daily_limit(0.5);
        assert!(!monitor.can_afford(0.0));
        assert_eq!(monitor.daily_report().remaining, 0.0);
    }

    #[test]
    fn test_restore_only_same_day() {
        let clock = clock();
        let monitor = CostMonitor::new(2.0, pricing(), clock.clone());
        let mut saved = monitor.snapshot();
        saved.spent_today = 1.5;
        saved.request_count = 30;
        saved.daily_limit = 9.0;
        assert!(monitor.restore(&saved));
        let report = monitor.daily_report();
        assert_eq!(report.spent_today, 1.5);
        assert_eq!(report.request_count, 30);
        assert_eq!(report.daily_limit, 2.0); // config wins

        saved.day = saved.day.pred_opt().unwrap();
        let other = CostMonitor::new(2.0, pricing(), clock);
        assert!(!other.restore(&saved));
        assert_eq!(other.daily_report().spent_today, 0.0);
    }
}
