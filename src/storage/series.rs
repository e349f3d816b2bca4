//! Per-instrument price series cache.
//!
//! Layout: `{root}/{EXCHANGE}/{SYMBOL}.json`, one JSON array of bars per
//! file. Ingestion owns writing; the scanner only needs `load`, which
//! treats a missing file as an empty series.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use super::{clean_component, write_json_atomic};
use crate::types::PriceSeries;

/// Read side of the series store, as seen by the scanner.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SeriesSource: Send + Sync {
    /// Load the series for one instrument. Absent data is an empty series;
    /// an error means the data exists but could not be read or parsed.
    async fn load(&self, exchange: &str, symbol: &str) -> Result<PriceSeries>;
}

/// JSON-file series cache.
#[derive(Debug, Clone)]
pub struct JsonSeriesCache {
    root: PathBuf,
}

impl JsonSeriesCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, exchange: &str, symbol: &str) -> PathBuf {
        self.root
            .join(clean_component(exchange))
            .join(format!("{}.json", clean_component(symbol)))
    }

    pub fn exists(&self, exchange: &str, symbol: &str) -> bool {
        self.path_for(exchange, symbol).exists()
    }

    /// Replace the stored series for one instrument.
    pub fn save(&self, exchange: &str, symbol: &str, series: &PriceSeries) -> Result<()> {
        let path = self.path_for(exchange, symbol);
        write_json_atomic(&path, series)
            .with_context(|| format!("Failed to cache series for {exchange}:{symbol}"))
    }
}

#[async_trait]
impl SeriesSource for JsonSeriesCache {
    async fn load(&self, exchange: &str, symbol: &str) -> Result<PriceSeries> {
        let path = self.path_for(exchange, symbol);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(exchange, symbol, "No cached series");
                return Ok(PriceSeries::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let series: PriceSeries = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse series {}", path.display()))?;
        Ok(series)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
