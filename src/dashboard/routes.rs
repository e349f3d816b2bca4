//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.
//! The dismiss list is applied here, after the snapshot is read; the
//! scanner never sees it.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::engine::ScanSummary;
use crate::market::{MarketState, MarketStateResolver};
use crate::storage::{DismissStore, ScanStore, SeriesSource};
use crate::types::{instrument_key, BreakoutSignal, PriceSeries};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub resolver: MarketStateResolver,
    pub scans: ScanStore,
    pub dismissed: DismissStore,
    pub series: Arc<dyn SeriesSource>,
    /// Summary of the last scan run by this process.
    pub last_summary: RwLock<Option<ScanSummary>>,
}

impl DashboardState {
    pub fn new(
        resolver: MarketStateResolver,
        scans: ScanStore,
        dismissed: DismissStore,
        series: Arc<dyn SeriesSource>,
    ) -> Self {
        Self {
            resolver,
            scans,
            dismissed,
            series,
            last_summary: RwLock::new(None),
        }
    }

    pub async fn record_summary(&self, summary: ScanSummary) {
        *self.last_summary.write().await = Some(summary);
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = %e, "API request failed");
        ApiError::Internal(format!("{e:#}"))
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub system_time: DateTime<FixedOffset>,
    pub market_state: MarketState,
    pub trade_date: NaiveDate,
    pub is_market_open: bool,
    pub description: String,
}

/// Filters for `GET /api/v1/breakouts`. List values are comma separated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BreakoutQuery {
    pub exchange: Option<String>,
    pub timeframe: Option<String>,
    pub confirmed_only: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentRef {
    pub symbol: String,
    pub exchange: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DismissResponse {
    pub key: String,
    pub changed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_exchange")]
    pub exchange: String,
}

fn default_exchange() -> String {
    "NSE".to_string()
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

fn csv_set(raw: Option<&str>) -> Option<BTreeSet<String>> {
    let set: BTreeSet<String> = raw?
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    (!set.is_empty()).then_some(set)
}

/// Apply query filters and the dismiss list, keeping snapshot order.
pub fn filter_signals(
    signals: Vec<BreakoutSignal>,
    query: &BreakoutQuery,
    dismissed: &BTreeSet<String>,
) -> Vec<BreakoutSignal> {
    let exchanges = csv_set(query.exchange.as_deref());
    let timeframes = csv_set(query.timeframe.as_deref());
    let confirmed_only = query.confirmed_only.unwrap_or(true);

    signals
        .into_iter()
        .filter(|s| !dismissed.contains(&s.key()))
        .filter(|s| !confirmed_only || s.volume_confirmation)
        .filter(|s| {
            exchanges
                .as_ref()
                .map_or(true, |set| set.contains(&s.exchange.to_uppercase()))
        })
        .filter(|s| {
            timeframes
                .as_ref()
                .map_or(true, |set| set.contains(&s.breakout_type.to_uppercase()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/system/status
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let ctx = state.resolver.resolve().map_err(|e| {
        error!(error = %e, "Market state unavailable");
        ApiError::Internal(e.to_string())
    })?;

    Ok(Json(StatusResponse {
        system_time: ctx.run_timestamp,
        market_state: ctx.state,
        trade_date: ctx.effective_trade_date,
        is_market_open: ctx.is_market_open(),
        description: ctx.description,
    }))
}

/// GET /api/v1/breakouts
pub async fn get_breakouts(
    State(state): State<AppState>,
    Query(query): Query<BreakoutQuery>,
) -> Result<Json<Vec<BreakoutSignal>>, ApiError> {
    let signals = state
        .scans
        .load()?
        .ok_or_else(|| ApiError::NotFound("no scan data yet".to_string()))?;
    let dismissed = state.dismissed.keys();
    Ok(Json(filter_signals(signals, &query, &dismissed)))
}

/// GET /api/v1/scan/summary
pub async fn get_summary(State(state): State<AppState>) -> Result<Json<ScanSummary>, ApiError> {
    state
        .last_summary
        .read()
        .await
        .clone()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no scan has run in this process".to_string()))
}

fn key_of(body: &InstrumentRef) -> Result<String, ApiError> {
    let exchange = body.exchange.trim().to_uppercase();
    let symbol = body.symbol.trim().to_uppercase();
    if exchange.is_empty() || symbol.is_empty() {
        return Err(ApiError::BadRequest("symbol and exchange are required".to_string()));
    }
    Ok(instrument_key(&exchange, &symbol))
}

/// POST /api/v1/dismiss
pub async fn dismiss(
    State(state): State<AppState>,
    Json(body): Json<InstrumentRef>,
) -> Result<Json<DismissResponse>, ApiError> {
    let key = key_of(&body)?;
    let changed = state.dismissed.dismiss(&key).await?;
    info!(key = %key, changed, "Dismiss requested");
    Ok(Json(DismissResponse { key, changed }))
}

/// POST /api/v1/restore
pub async fn restore(
    State(state): State<AppState>,
    Json(body): Json<InstrumentRef>,
) -> Result<Json<DismissResponse>, ApiError> {
    let key = key_of(&body)?;
    let changed = state.dismissed.restore(&key).await?;
    info!(key = %key, changed, "Restore requested");
    Ok(Json(DismissResponse { key, changed }))
}

/// GET /api/v1/dismissed
pub async fn get_dismissed(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.dismissed.list())
}

/// GET /api/v1/history/:symbol
pub async fn get_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<PriceSeries>, ApiError> {
    let mut series = state.series.load(&query.exchange, &symbol).await?;
    if series.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no history for {}",
            instrument_key(&query.exchange, &symbol)
        )));
    }
    series.sort_by_date();
    Ok(Json(series))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
