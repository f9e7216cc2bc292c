//! Per-symbol fetch window computation.
//!
//! ```text
//! latest       = freshness(symbol) or 1970-01-01
//! target_end   = today(source offset) - freshness_days
//! target_start = latest + 1 day - lookback_days
//! ```
//!
//! A symbol is current (no fetch) when `lookback_days == 0` and
//! `latest >= target_end`, or whenever the window would be empty.

use serde::Serialize;
use time::Date;

use crate::domain::calendar::{iso_date, shift_days, EPOCH_FLOOR};
use crate::ValidationError;

pub const DEFAULT_FRESHNESS_DAYS: u32 = 1;
pub const DEFAULT_LOOKBACK_DAYS: u32 = 0;
pub const DEFAULT_CONCURRENCY: usize = 1;
/// Roughly one hundred years; reaches past any listing date on the exchange.
pub const BACKFILL_LOOKBACK_DAYS: u32 = 36_500;

/// Inclusive date range to request from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetchWindow {
    #[serde(with = "iso_date")]
    pub start: Date,
    #[serde(with = "iso_date")]
    pub end: Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    Current,
    Fetch(FetchWindow),
}

/// Knobs for one scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncParams {
    pub lookback_days: u32,
    pub freshness_days: u32,
    pub concurrency: usize,
}

impl SyncParams {
    pub fn new(
        lookback_days: u32,
        freshness_days: u32,
        concurrency: usize,
    ) -> Result<Self, ValidationError> {
        if concurrency == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }
        Ok(Self {
            lookback_days,
            freshness_days,
            concurrency,
        })
    }

    /// Same params with the backfill lookback.
    pub fn into_backfill(self) -> Self {
        Self {
            lookback_days: BACKFILL_LOOKBACK_DAYS,
            ..self
        }
    }
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            freshness_days: DEFAULT_FRESHNESS_DAYS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

pub fn plan_window(latest: Option<Date>, today: Date, lookback_days: u32, freshness_days: u32) -> FetchPlan {
    let latest = latest.unwrap_or(EPOCH_FLOOR);
    let target_end = shift_days(today, -i64::from(freshness_days));

    if lookback_days == 0 && latest >= target_end {
        return FetchPlan::Current;
    }

    let target_start = shift_days(shift_days(latest, 1), -i64::from(lookback_days));
    if target_start > target_end {
        return FetchPlan::Current;
    }

    FetchPlan::Fetch(FetchWindow {
        start: target_start,
        end: target_end,
    })
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn fetches_the_single_missing_day() {
        let plan = plan_window(Some(date!(2024 - 01 - 10)), date!(2024 - 01 - 12), 0, 1);
        assert_eq!(
            plan,
            FetchPlan::Fetch(FetchWindow {
                start: date!(2024 - 01 - 11),
                end: date!(2024 - 01 - 11),
            })
        );
    }

    #[test]
    fn skips_when_latest_reaches_target_end() {
        let plan = plan_window(Some(date!(2024 - 01 - 11)), date!(2024 - 01 - 12), 0, 1);
        assert_eq!(plan, FetchPlan::Current);

        let ahead = plan_window(Some(date!(2024 - 01 - 12)), date!(2024 - 01 - 12), 0, 1);
        assert_eq!(ahead, FetchPlan::Current);
    }

    #[test]
    fn lookback_refetches_recent_days_even_when_current() {
        let plan = plan_window(Some(date!(2024 - 01 - 11)), date!(2024 - 01 - 12), 3, 1);
        assert_eq!(
            plan,
            FetchPlan::Fetch(FetchWindow {
                start: date!(2024 - 01 - 09),
                end: date!(2024 - 01 - 11),
            })
        );
    }

    #[test]
    fn never_synced_symbols_start_after_the_epoch_floor() {
        let plan = plan_window(None, date!(2024 - 01 - 12), 0, 1);
        assert_eq!(
            plan,
            FetchPlan::Fetch(FetchWindow {
                start: date!(1970 - 01 - 02),
                end: date!(2024 - 01 - 11),
            })
        );
    }

    #[test]
    fn empty_windows_are_not_fetched() {
        let plan = plan_window(Some(date!(2024 - 01 - 20)), date!(2024 - 01 - 12), 2, 1);
        assert_eq!(plan, FetchPlan::Current);
    }

    #[test]
    fn zero_freshness_includes_today() {
        let plan = plan_window(Some(date!(2024 - 01 - 11)), date!(2024 - 01 - 12), 0, 0);
        assert_eq!(
            plan,
            FetchPlan::Fetch(FetchWindow {
                start: date!(2024 - 01 - 12),
                end: date!(2024 - 01 - 12),
            })
        );
    }

    #[test]
    fn backfill_lookback_reaches_far_past() {
        let params = SyncParams::new(0, 1, 4).expect("params").into_backfill();
        assert_eq!(params.lookback_days, BACKFILL_LOOKBACK_DAYS);
        assert_eq!(params.concurrency, 4);

        match plan_window(Some(date!(2024 - 01 - 11)), date!(2024 - 01 - 12), params.lookback_days, 1) {
            FetchPlan::Fetch(window) => assert!(window.start < date!(1925 - 01 - 01)),
            FetchPlan::Current => panic!("backfill must fetch"),
        }
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert_eq!(
            SyncParams::new(0, 1, 0).expect_err("invalid"),
            ValidationError::InvalidConcurrency
        );
    }
}
