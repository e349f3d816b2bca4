//! In-memory series source and series builders for integration testing.
//!
//! Deterministic and fully controllable from test code: series are
//! inserted per `(exchange, symbol)`, and individual keys can be made to
//! fail to exercise unit isolation.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use breakout_scanner::storage::SeriesSource;
use breakout_scanner::types::{instrument_key, PriceBar, PriceSeries};

#[derive(Default)]
pub struct MemorySource {
    series: Mutex<HashMap<String, PriceSeries>>,
    failing: Mutex<HashSet<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, exchange: &str, symbol: &str, series: PriceSeries) {
        self.series
            .lock()
            .unwrap()
            .insert(instrument_key(exchange, symbol), series);
    }

    /// Make every load of this key fail with an I/O-style error.
    pub fn fail(&self, exchange: &str, symbol: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(instrument_key(exchange, symbol));
    }
}

#[async_trait]
impl SeriesSource for MemorySource {
    async fn load(&self, exchange: &str, symbol: &str) -> Result<PriceSeries> {
        let key = instrument_key(exchange, symbol);
        if self.failing.lock().unwrap().contains(&key) {
            return Err(anyhow!("simulated read failure for {key}"));
        }
        Ok(self
            .series
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Series builders
// ---------------------------------------------------------------------------

fn bar(exchange: &str, symbol: &str, date: NaiveDate, high: f64, low: f64, close: f64, volume: u64) -> PriceBar {
    PriceBar {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        trade_date: date,
        open: close,
        high,
        low,
        close,
        volume,
        data_source_date: Some(date),
        is_last_trading_day: None,
    }
}

/// Sixty bars ending on `end`: 49 older bars ranging 100..120, ten bars
/// ranging 90..100, then a close of 105 on triple volume. Breaks out of
/// the 10-day range at exactly +5% but not out of the 30-day or all-time.
pub fn sixty_bar_breakout(exchange: &str, symbol: &str, end: NaiveDate) -> PriceSeries {
    let date = |i: u64| end - Days::new(59 - i);
    let mut bars = Vec::with_capacity(60);
    for i in 0..49 {
        bars.push(bar(exchange, symbol, date(i), 120.0, 100.0, 110.0, 1000));
    }
    for i in 49..59 {
        bars.push(bar(exchange, symbol, date(i), 100.0, 90.0, 95.0, 1000));
    }
    bars.push(bar(exchange, symbol, end, 106.0, 96.0, 105.0, 3000));
    PriceSeries::new(bars)
}

/// `n` flat bars (90..100) ending the day before `end`, then a close of
/// `close` on `end` with `volume`.
pub fn flat_then(exchange: &str, symbol: &str, end: NaiveDate, n: u64, close: f64, volume: u64) -> PriceSeries {
    let mut bars: Vec<PriceBar> = (1..=n)
        .rev()
        .map(|back| bar(exchange, symbol, end - Days::new(back), 100.0, 90.0, 95.0, 1000))
        .collect();
    bars.push(bar(exchange, symbol, end, close.max(95.0), close.min(95.0), close, volume));
    PriceSeries::new(bars)
}
