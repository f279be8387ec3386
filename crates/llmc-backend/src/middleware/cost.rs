//! Per-backend spend tracking with daily and monthly USD ceilings.
//!
//! Amounts are integer milli-dollars ($0.001 precision) to keep the
//! arithmetic exact. The ceiling is checked BEFORE a call is issued:
//! a call whose estimate would cross the cap fails fast with
//! `BudgetExceeded`, so a one-transaction overshoot cannot happen.
//! Daily counters roll over at 00:00 UTC.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{BackendError, Result};

/// Convert USD to milli-dollars.
pub fn usd_to_milli(usd: f64) -> i64 {
    (usd * 1000.0).round() as i64
}

/// Convert milli-dollars back to USD for display.
pub fn milli_to_usd(milli: i64) -> f64 {
    milli as f64 / 1000.0
}

#[derive(Debug, Clone, Copy)]
struct CostState {
    day: NaiveDate,
    month: (i32, u32),
    day_milli: i64,
    month_milli: i64,
}

/// Spend tracker for one backend. A cap of zero means uncapped.
pub struct CostTracker {
    backend: String,
    daily_cap_milli: i64,
    monthly_cap_milli: i64,
    state: Mutex<CostState>,
}

impl CostTracker {
    pub fn new(backend: impl Into<String>, daily_cap_usd: f64, monthly_cap_usd: f64) -> Self {
        let now = Utc::now();
        Self {
            backend: backend.into(),
            daily_cap_milli: usd_to_milli(daily_cap_usd),
            monthly_cap_milli: usd_to_milli(monthly_cap_usd),
            state: Mutex::new(CostState {
                day: now.date_naive(),
                month: (now.year(), now.month()),
                day_milli: 0,
                month_milli: 0,
            }),
        }
    }

    /// Fail fast when `estimated_milli` would cross either ceiling.
    pub fn check(&self, estimated_milli: i64) -> Result<()> {
        self.check_at(estimated_milli, Utc::now())
    }

    /// Record actual spend after a successful call.
    pub fn record(&self, milli: i64) {
        self.record_at(milli, Utc::now());
    }

    pub fn spent_today_milli(&self) -> i64 {
        let mut state = self.state.lock();
        rollover(&mut state, Utc::now());
        state.day_milli
    }

    pub(crate) fn check_at(&self, estimated_milli: i64, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        rollover(&mut state, now);

        if self.daily_cap_milli > 0 && state.day_milli + estimated_milli > self.daily_cap_milli {
            return Err(BackendError::BudgetExceeded {
                backend: self.backend.clone(),
                spent_usd: milli_to_usd(state.day_milli),
                cap_usd: milli_to_usd(self.daily_cap_milli),
            });
        }
        if self.monthly_cap_milli > 0
            && state.month_milli + estimated_milli > self.monthly_cap_milli
        {
            return Err(BackendError::BudgetExceeded {
                backend: self.backend.clone(),
                spent_usd: milli_to_usd(state.month_milli),
                cap_usd: milli_to_usd(self.monthly_cap_milli),
            });
        }
        Ok(())
    }

    pub(crate) fn record_at(&self, milli: i64, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        rollover(&mut state, now);
        state.day_milli += milli;
        state.month_milli += milli;
        debug!(
            backend = %self.backend,
            day_usd = milli_to_usd(state.day_milli),
            "cost recorded"
        );
    }
}

fn rollover(state: &mut CostState, now: DateTime<Utc>) {
    let today = now.date_naive();
    if state.day != today {
        state.day = today;
        state.day_milli = 0;
    }
    let month = (now.year(), now.month());
    if state.month != month {
        state.month = month;
        state.month_milli = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_milli_precision() {
        assert_eq!(usd_to_milli(0.001), 1);
        assert_eq!(usd_to_milli(1.2345), 1235);
        assert_eq!(milli_to_usd(1500), 1.5);
    }

    #[test]
    fn test_cap_checked_before_call() {
        let tracker = CostTracker::new("b", 0.010, 0.0);
        tracker.check(5).unwrap();
        tracker.record(5);
        tracker.check(5).unwrap();
        tracker.record(5);
        // Spent exactly the cap; the next estimated call must fail fast.
        let err = tracker.check(1).unwrap_err();
        assert!(matches!(err, BackendError::BudgetExceeded { .. }));
    }

    #[test]
    fn test_zero_cap_is_uncapped() {
        let tracker = CostTracker::new("b", 0.0, 0.0);
        tracker.record(1_000_000);
        tracker.check(1_000_000).unwrap();
    }

    #[test]
    fn test_daily_rollover_at_utc_midnight() {
        let tracker = CostTracker::new("b", 0.010, 0.0);
        let day1 = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 1).unwrap();

        tracker.record_at(10, day1);
        assert!(tracker.check_at(1, day1).is_err());
        // New UTC day: the daily counter is fresh.
        tracker.check_at(10, day2).unwrap();
    }

    #[test]
    fn test_monthly_cap_survives_daily_rollover() {
        let tracker = CostTracker::new("b", 0.0, 0.010);
        let day1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let next_month = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();

        tracker.record_at(10, day1);
        assert!(tracker.check_at(1, day2).is_err());
        tracker.check_at(10, next_month).unwrap();
    }
}
