//! Breakout calculator.
//!
//! Evaluates the latest bar of a series against every configured lookback
//! window. The comparison set for a window is the `N` bars strictly before
//! the latest one (the current bar never takes part in its own window);
//! the `ALL` window uses every earlier bar but caps its volume baseline.
//!
//! Short history is not an error here: it simply produces no signals.
//! [`check_series`] tells callers which case they hit. Bar values are not
//! screened; an odd bar only moves the levels of windows that contain it.

use rust_decimal::prelude::*;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::trace;

use crate::config::{BreakoutConfig, LookbackSpec, Window};
use crate::types::{BreakoutSignal, Direction, PriceBar, PriceSeries};

/// Fewest bars that can produce any signal: one to compare, one to judge.
pub const MIN_BARS: usize = 2;

/// Whether a series can be evaluated at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesCheck {
    Ready,
    TooShort(usize),
}

pub fn check_series(series: &PriceSeries) -> SeriesCheck {
    if series.len() < MIN_BARS {
        return SeriesCheck::TooShort(series.len());
    }
    SeriesCheck::Ready
}

/// Aggregates over one comparison set.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowStats {
    high: f64,
    low: f64,
    avg_volume: f64,
}

impl WindowStats {
    /// `bars` and `volume_bars` must be non-empty.
    fn compute(bars: &[PriceBar], volume_bars: &[PriceBar]) -> Self {
        let high = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let total: f64 = volume_bars.iter().map(|b| b.volume as f64).sum();
        Self {
            high,
            low,
            avg_volume: total / volume_bars.len() as f64,
        }
    }
}

pub struct BreakoutCalculator {
    config: Arc<BreakoutConfig>,
}

impl BreakoutCalculator {
    pub fn new(config: Arc<BreakoutConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BreakoutConfig {
        &self.config
    }

    /// Signals for the latest bar, one per triggered window, in the order
    /// the windows are configured.
    pub fn compute(&self, series: &PriceSeries) -> Vec<BreakoutSignal> {
        if check_series(series) != SeriesCheck::Ready {
            return Vec::new();
        }

        let series = if series.is_sorted() {
            Cow::Borrowed(series)
        } else {
            let mut sorted = series.clone();
            sorted.sort_by_date();
            Cow::Owned(sorted)
        };

        let bars = series.bars();
        let (history, current) = bars.split_at(bars.len() - 1);
        let current = &current[0];

        self.config
            .lookbacks
            .iter()
            .filter_map(|lookback| self.evaluate(lookback, history, current))
            .collect()
    }

    fn evaluate(
        &self,
        lookback: &LookbackSpec,
        history: &[PriceBar],
        current: &PriceBar,
    ) -> Option<BreakoutSignal> {
        let (window, volume_window) = match lookback.window {
            Window::Days(n) => {
                if history.len() < n {
                    return None;
                }
                let w = &history[history.len() - n..];
                (w, w)
            }
            Window::All => {
                if history.len() < self.config.min_history.max(1) {
                    return None;
                }
                let cap = history.len().min(self.config.all_window_volume_cap);
                (history, &history[history.len() - cap..])
            }
        };

        let stats = WindowStats::compute(window, volume_window);
        let close = current.close;

        let (direction, level) = if close > stats.high {
            (Direction::Bullish, stats.high)
        } else if close < stats.low {
            (Direction::Bearish, stats.low)
        } else {
            return None;
        };

        if level <= 0.0 {
            trace!(symbol = %current.symbol, window = %lookback.name, "Non-positive level, skipping");
            return None;
        }

        let pct = (close - level) / level * 100.0;
        let volume_confirmation = stats.avg_volume > 0.0
            && current.volume as f64 > stats.avg_volume * self.config.volume_multiplier;

        Some(BreakoutSignal {
            exchange: current.exchange.clone(),
            symbol: current.symbol.clone(),
            trade_date: current.trade_date,
            breakout_type: lookback.name.clone(),
            direction,
            breakout_level: round2(level)?,
            close_price: round2(close)?,
            breakout_pct: round2(pct)?,
            volume: current.volume,
            avg_volume_n: stats.avg_volume.trunc() as u64,
            volume_confirmation,
            data_source_date: current.data_source_date,
            detected_at: None,
            market_state: None,
            run_timestamp: None,
            effective_trade_date: None,
            is_date_consistent: None,
        })
    }
}

/// Round half-to-even at two decimal places.
fn round2(x: f64) -> Option<Decimal> {
    Decimal::from_f64(x).map(|d| d.round_dp(2))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
