//! Market session awareness.
//!
//! Clock and calendar are injected services so tests can pin both; the
//! resolver turns `(now, calendar)` into a session state plus the trade
//! date a scan run should be attributed to.

pub mod calendar;
pub mod clock;
pub mod resolver;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use calendar::{CalendarError, HolidayCalendar, TradingCalendar};
pub use clock::{Clock, FixedClock, SystemClock};
pub use resolver::{MarketStateResolver, SessionHours};

/// Phase of the trading day/calendar the system considers itself in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketState {
    PreOpen,
    Open,
    PostClose,
    Closed,
    Weekend,
    Holiday,
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketState::PreOpen => "PRE_OPEN",
            MarketState::Open => "OPEN",
            MarketState::PostClose => "POST_CLOSE",
            MarketState::Closed => "CLOSED",
            MarketState::Weekend => "WEEKEND",
            MarketState::Holiday => "HOLIDAY",
        };
        write!(f, "{s}")
    }
}

/// Result of one state resolution. Never cached across calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub state: MarketState,
    pub effective_trade_date: NaiveDate,
    pub run_timestamp: DateTime<FixedOffset>,
    pub description: String,
}

impl MarketContext {
    pub fn is_market_open(&self) -> bool {
        self.state == MarketState::Open
    }
}

impl fmt::Display for MarketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} as of {} ({})",
            self.state, self.effective_trade_date, self.description
        )
    }
}
