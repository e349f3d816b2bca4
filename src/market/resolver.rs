//! Market state resolution.
//!
//! Ladder, first match wins:
//! 1. weekend -> `WEEKEND`, last session on/before today
//! 2. not a session -> `HOLIDAY`, last session on/before today
//! 3. session day, by minute of the local day:
//!    `[0, pre_open)` -> `CLOSED` (pre-market, previous session),
//!    `[pre_open, open)` -> `PRE_OPEN`, `[open, close)` -> `OPEN`,
//!    `[close, post_close_end)` -> `POST_CLOSE`,
//!    `[post_close_end, 1440)` -> `CLOSED` (end of day, today).
//!
//! Nothing is stored between calls.

use chrono::{DateTime, Days, Timelike};
use chrono_tz::Tz;
use serde::Deserialize;
use std::sync::Arc;

use super::calendar::{CalendarError, TradingCalendar};
use super::clock::Clock;
use super::{MarketContext, MarketState};

/// Session boundaries in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionHours {
    pub pre_open: u32,
    pub open: u32,
    pub close: u32,
    pub post_close_end: u32,
}

impl Default for SessionHours {
    /// 09:00 pre-open, 09:15 open, 15:30 close, 16:00 post-close end.
    fn default() -> Self {
        Self {
            pre_open: 540,
            open: 555,
            close: 930,
            post_close_end: 960,
        }
    }
}

impl SessionHours {
    /// Boundaries must be strictly increasing and inside one day.
    pub fn is_valid(&self) -> bool {
        self.pre_open < self.open
            && self.open < self.close
            && self.close < self.post_close_end
            && self.post_close_end <= 24 * 60
    }
}

/// Resolves the current session state from an injected clock and calendar.
#[derive(Clone)]
pub struct MarketStateResolver {
    clock: Arc<dyn Clock>,
    calendar: Arc<dyn TradingCalendar>,
    hours: SessionHours,
}

impl MarketStateResolver {
    pub fn new(clock: Arc<dyn Clock>, calendar: Arc<dyn TradingCalendar>) -> Self {
        Self {
            clock,
            calendar,
            hours: SessionHours::default(),
        }
    }

    pub fn with_hours(mut self, hours: SessionHours) -> Self {
        self.hours = hours;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Resolve against the injected clock's "now".
    pub fn resolve(&self) -> Result<MarketContext, CalendarError> {
        self.resolve_at(self.clock.now())
    }

    /// Resolve for an explicit instant in the exchange zone.
    pub fn resolve_at(&self, now: DateTime<Tz>) -> Result<MarketContext, CalendarError> {
        let today = now.date_naive();
        let run_timestamp = now.fixed_offset();
        let cal = self.calendar.as_ref();

        let context = |state, effective_trade_date, description: String| MarketContext {
            state,
            effective_trade_date,
            run_timestamp,
            description,
        };

        if cal.is_weekend(today) {
            let last = cal.last_session_date(today)?;
            return Ok(context(
                MarketState::Weekend,
                last,
                format!("Weekend. Using last session: {last}"),
            ));
        }

        if !cal.is_trading_day(today)? {
            let last = cal.last_session_date(today)?;
            return Ok(context(
                MarketState::Holiday,
                last,
                format!("Exchange holiday. Using last session: {last}"),
            ));
        }

        let minute = now.hour() * 60 + now.minute();
        let h = &self.hours;

        let ctx = if minute < h.pre_open {
            // No session has opened yet today
            let yesterday = today
                .checked_sub_days(Days::new(1))
                .ok_or(CalendarError::NoSession { reference: today, days: 1 })?;
            let last = cal.last_session_date(yesterday)?;
            context(
                MarketState::Closed,
                last,
                format!("Pre-market. Using last session: {last}"),
            )
        } else if minute < h.open {
            context(MarketState::PreOpen, today, "Pre-open session".to_string())
        } else if minute < h.close {
            context(MarketState::Open, today, "Market open (live)".to_string())
        } else if minute < h.post_close_end {
            context(MarketState::PostClose, today, "Post-close session".to_string())
        } else {
            context(MarketState::Closed, today, "Market closed (end of day)".to_string())
        };

        Ok(ctx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::calendar::HolidayCalendar;
    use crate::market::clock::FixedClock;
    use chrono::{NaiveDate, NaiveDateTime};
    use chrono_tz::Asia::Kolkata;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn calendar() -> Arc<dyn TradingCalendar> {
        Arc::new(
            HolidayCalendar::new("XBOM", d(2025, 1, 1), d(2025, 12, 31))
                .with_holiday(d(2025, 3, 14), "Holi"),
        )
    }

    fn at(date: NaiveDate, minute: u32) -> NaiveDateTime {
        date.and_hms_opt(minute / 60, minute % 60, 0).unwrap()
    }

    fn resolve(date: NaiveDate, minute: u32) -> MarketContext {
        let clock = FixedClock::at_local(Kolkata, at(date, minute)).unwrap();
        MarketStateResolver::new(Arc::new(clock), calendar())
            .resolve()
            .unwrap()
    }

    // Wednesday 2025-03-12; previous session Tuesday 2025-03-11.
    const TRADING_DAY: (i32, u32, u32) = (2025, 3, 12);

    fn trading_day() -> NaiveDate {
        d(TRADING_DAY.0, TRADING_DAY.1, TRADING_DAY.2)
    }

    #[test]
    fn test_boundary_table() {
        let today = trading_day();
        let prior = d(2025, 3, 11);

        let ctx = resolve(today, 539);
        assert_eq!(ctx.state, MarketState::Closed);
        assert_eq!(ctx.effective_trade_date, prior);

        let ctx = resolve(today, 540);
        assert_eq!(ctx.state, MarketState::PreOpen);
        assert_eq!(ctx.effective_trade_date, today);

        assert_eq!(resolve(today, 554).state, MarketState::PreOpen);
        assert_eq!(resolve(today, 555).state, MarketState::Open);
        assert_eq!(resolve(today, 929).state, MarketState::Open);

        let ctx = resolve(today, 930);
        assert_eq!(ctx.state, MarketState::PostClose);
        assert_eq!(ctx.effective_trade_date, today);

        assert_eq!(resolve(today, 959).state, MarketState::PostClose);

        let ctx = resolve(today, 960);
        assert_eq!(ctx.state, MarketState::Closed);
        assert_eq!(ctx.effective_trade_date, today);
    }

    #[test]
    fn test_every_minute_maps_to_exactly_one_bucket() {
        let today = trading_day();
        let hours = SessionHours::default();
        for minute in 0..24 * 60 {
            let ctx = resolve(today, minute);
            let expected = if minute < hours.pre_open {
                MarketState::Closed
            } else if minute < hours.open {
                MarketState::PreOpen
            } else if minute < hours.close {
                MarketState::Open
            } else if minute < hours.post_close_end {
                MarketState::PostClose
            } else {
                MarketState::Closed
            };
            assert_eq!(ctx.state, expected, "minute {minute}");
            let expected_date = if minute < hours.pre_open { d(2025, 3, 11) } else { today };
            assert_eq!(ctx.effective_trade_date, expected_date, "minute {minute}");
        }
    }

    #[test]
    fn test_pre_market_monday_uses_friday() {
        let ctx = resolve(d(2025, 3, 10), 480);
        assert_eq!(ctx.state, MarketState::Closed);
        assert_eq!(ctx.effective_trade_date, d(2025, 3, 7));
    }

    #[test]
    fn test_saturday_is_weekend_at_any_time() {
        for minute in [0, 539, 600, 960, 1439] {
            let ctx = resolve(d(2025, 3, 8), minute);
            assert_eq!(ctx.state, MarketState::Weekend);
            assert_eq!(ctx.effective_trade_date, d(2025, 3, 7));
        }
    }

    #[test]
    fn test_holiday() {
        let ctx = resolve(d(2025, 3, 14), 600);
        assert_eq!(ctx.state, MarketState::Holiday);
        assert_eq!(ctx.effective_trade_date, d(2025, 3, 13));
        assert!(ctx.description.contains("2025-03-13"));
    }

    #[test]
    fn test_is_market_open_only_when_open() {
        assert!(resolve(trading_day(), 600).is_market_open());
        assert!(!resolve(trading_day(), 940).is_market_open());
    }

    #[test]
    fn test_run_timestamp_keeps_exchange_offset() {
        let ctx = resolve(trading_day(), 600);
        assert_eq!(ctx.run_timestamp.offset().local_minus_utc(), 5 * 3600 + 1800);
    }

    #[test]
    fn test_idempotent_for_same_instant() {
        let clock = FixedClock::at_local(Kolkata, at(trading_day(), 700)).unwrap();
        let resolver = MarketStateResolver::new(Arc::new(clock), calendar());
        assert_eq!(resolver.resolve().unwrap(), resolver.resolve().unwrap());
    }

    #[test]
    fn test_calendar_outside_coverage_is_error() {
        let clock = FixedClock::at_local(Kolkata, at(d(2026, 2, 2), 600)).unwrap();
        let resolver = MarketStateResolver::new(Arc::new(clock), calendar());
        assert!(resolver.resolve().is_err());
    }

    #[test]
    fn test_custom_hours() {
        let hours = SessionHours { pre_open: 480, open: 510, close: 900, post_close_end: 930 };
        assert!(hours.is_valid());
        let clock = FixedClock::at_local(Kolkata, at(trading_day(), 500)).unwrap();
        let ctx = MarketStateResolver::new(Arc::new(clock), calendar())
            .with_hours(hours)
            .resolve()
            .unwrap();
        assert_eq!(ctx.state, MarketState::PreOpen);
    }

    #[test]
    fn test_invalid_hours() {
        let hours = SessionHours { pre_open: 600, open: 555, ..SessionHours::default() };
        assert!(!hours.is_valid());
    }
}
