//! Shared types for the breakout scanner.
//!
//! These types form the data model used across all modules: price bars
//! and series coming out of the cache, the roster that drives a scan,
//! the signals the calculator emits, and the errors that end a run.

use chrono::{DateTime, FixedOffset, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::MarketState;

// ---------------------------------------------------------------------------
// Price data
// ---------------------------------------------------------------------------

/// One trading day for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub exchange: String,
    pub symbol: String,
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Date the ingestion run fetched this bar (added by ingestion).
    #[serde(default)]
    pub data_source_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_last_trading_day: Option<bool>,
}

impl PriceBar {
    #[cfg(test)]
    pub fn sample(day: u32, close: f64) -> Self {
        PriceBar {
            exchange: "NSE".to_string(),
            symbol: "TEST".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + chrono::Days::new(day as u64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000,
            data_source_date: None,
            is_last_trading_day: None,
        }
    }
}

/// Ordered bars for one `(exchange, symbol)` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceSeries {
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(bars: Vec<PriceBar>) -> Self {
        Self { bars }
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn latest(&self) -> Option<&PriceBar> {
        self.bars.last()
    }

    pub fn is_sorted(&self) -> bool {
        self.bars.windows(2).all(|w| w[0].trade_date <= w[1].trade_date)
    }

    /// Sort ascending by trade date. Stable, so same-day bars keep their order.
    pub fn sort_by_date(&mut self) {
        if !self.is_sorted() {
            self.bars.sort_by_key(|b| b.trade_date);
        }
    }

    pub fn into_bars(self) -> Vec<PriceBar> {
        self.bars
    }
}

impl From<Vec<PriceBar>> for PriceSeries {
    fn from(bars: Vec<PriceBar>) -> Self {
        Self::new(bars)
    }
}

// ---------------------------------------------------------------------------
// Universe roster
// ---------------------------------------------------------------------------

/// One listed instrument in the universe roster.
///
/// Produced by the roster builder; the scanner only reads `exchange`
/// and `symbol`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub exchange: String,
    pub symbol: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub status: String,
}

impl RosterEntry {
    pub fn new(exchange: &str, symbol: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            company_name: String::new(),
            isin: String::new(),
            status: "Active".to_string(),
        }
    }

    /// The `EXCHANGE:SYMBOL` key used by the dismiss list.
    pub fn key(&self) -> String {
        instrument_key(&self.exchange, &self.symbol)
    }
}

impl fmt::Display for RosterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

pub fn instrument_key(exchange: &str, symbol: &str) -> String {
    format!("{exchange}:{symbol}")
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Which side of the window the close left through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

/// One detected breakout (or breakdown) on the latest bar of a series.
///
/// The calculator fills the price/volume fields; the scanner stamps
/// `detected_at`; the integrity tagger fills the session fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakoutSignal {
    pub exchange: String,
    pub symbol: String,
    pub trade_date: NaiveDate,
    /// Name of the lookback window that triggered, e.g. `D10` or `ALL_TIME`.
    pub breakout_type: String,
    /// Taken from the unrounded close/level comparison, so it holds even
    /// when `breakout_pct` rounds to zero.
    pub direction: Direction,
    pub breakout_level: Decimal,
    pub close_price: Decimal,
    /// Signed distance from the level in percent (negative for breakdowns).
    pub breakout_pct: Decimal,
    pub volume: u64,
    pub avg_volume_n: u64,
    pub volume_confirmation: bool,
    pub data_source_date: Option<NaiveDate>,
    pub detected_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub market_state: Option<MarketState>,
    #[serde(default)]
    pub run_timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub effective_trade_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_date_consistent: Option<bool>,
}

impl BreakoutSignal {
    pub fn is_bullish(&self) -> bool {
        self.direction == Direction::Bullish
    }

    pub fn key(&self) -> String {
        instrument_key(&self.exchange, &self.symbol)
    }
}

impl fmt::Display for BreakoutSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} {} close={} level={} ({}%){}",
            self.exchange,
            self.symbol,
            self.breakout_type,
            if self.is_bullish() { "breakout" } else { "breakdown" },
            self.close_price,
            self.breakout_level,
            self.breakout_pct,
            if self.volume_confirmation { " vol✓" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that end a scan run. Per-symbol faults never surface here;
/// they are reported as unit outcomes instead.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Roster unavailable: {0}")]
    Roster(String),

    #[error(transparent)]
    Calendar(#[from] crate::market::CalendarError),

    #[error("Failed to persist scan result to {path}: {message}")]
    Persistence { path: String, message: String },

    #[error("Scan cancelled after {completed} of {total} units")]
    Cancelled { completed: usize, total: usize },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
