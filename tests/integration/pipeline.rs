//! End-to-end scan runs.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Asia::Kolkata;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use breakout_scanner::config::AppConfig;
use breakout_scanner::dashboard::{build_router, DashboardState};
use breakout_scanner::engine::{Scanner, UnitOutcome};
use breakout_scanner::market::{FixedClock, HolidayCalendar, MarketState, MarketStateResolver};
use breakout_scanner::storage::universe::save_roster;
use breakout_scanner::storage::{DismissStore, JsonSeriesCache, ScanStore};
use breakout_scanner::types::{BreakoutSignal, RosterEntry, ScanError};

use crate::memory_source::{flat_then, sixty_bar_breakout, MemorySource};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(day: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    day.and_hms_opt(h, m, 0).unwrap()
}

/// Resolver over the shipped exchange calendar, pinned to a local time.
fn resolver_at(local: NaiveDateTime) -> MarketStateResolver {
    let calendar =
        HolidayCalendar::load(Path::new(env!("CARGO_MANIFEST_DIR")).join("calendar/xbom.toml"))
            .unwrap();
    MarketStateResolver::new(
        Arc::new(FixedClock::at_local(Kolkata, local).unwrap()),
        Arc::new(calendar),
    )
}

fn config_in(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.paths.data_dir = dir.to_path_buf();
    cfg
}

fn roster(symbols: &[&str]) -> Vec<RosterEntry> {
    symbols.iter().map(|s| RosterEntry::new("NSE", s)).collect()
}

fn load_artifact(cfg: &AppConfig) -> Vec<BreakoutSignal> {
    ScanStore::new(cfg.paths.scan_file()).load().unwrap().unwrap()
}

// ---------------------------------------------------------------------------
// Full run over files on disk
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_scan_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(dir.path());
    let session = date(2025, 3, 12);

    let cache = JsonSeriesCache::new(cfg.paths.historical_dir());
    cache
        .save("NSE", "RELIANCE", &sixty_bar_breakout("NSE", "RELIANCE", session))
        .unwrap();
    cache
        .save("NSE", "NEWCO", &flat_then("NSE", "NEWCO", session, 4, 110.0, 5000))
        .unwrap();
    std::fs::write(cfg.paths.historical_dir().join("NSE/BAD.json"), b"{").unwrap();
    save_roster(
        &cfg.paths.universe_file(),
        &roster(&["RELIANCE", "BAD", "MISSING", "NEWCO"]),
    )
    .unwrap();

    let scanner = Scanner::from_config(&cfg, Arc::new(cache), resolver_at(at(session, 16, 30)));
    let summary = scanner
        .run_from_file(&cfg.paths.universe_file(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.units, 4);
    assert_eq!(summary.with_signals, 2);
    assert_eq!(summary.no_data, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.total_signals, 5);
    assert_eq!(summary.market.state, MarketState::Closed);
    assert_eq!(summary.market.effective_trade_date, session);
    let bad = summary.reports.iter().find(|r| r.symbol == "BAD").unwrap();
    assert!(matches!(&bad.outcome, UnitOutcome::Failed(reason) if reason.contains("parse")));

    let signals = load_artifact(&cfg);
    let order: Vec<_> = signals
        .iter()
        .map(|s| (s.breakout_type.as_str(), s.symbol.as_str()))
        .collect();
    assert_eq!(
        order,
        [
            ("D10", "RELIANCE"),
            ("D2", "NEWCO"),
            ("D2", "RELIANCE"),
            ("TODAY", "NEWCO"),
            ("TODAY", "RELIANCE"),
        ]
    );

    let d10 = &signals[0];
    assert_eq!(d10.breakout_level, dec!(100.00));
    assert_eq!(d10.close_price, dec!(105.00));
    assert_eq!(d10.breakout_pct, dec!(5.00));
    assert!(d10.volume_confirmation);
    assert_eq!(d10.avg_volume_n, 1000);

    // Five bars are not enough history for the all-time window
    assert!(!signals.iter().any(|s| s.breakout_type == "ALL_TIME"));

    for s in &signals {
        assert_eq!(s.market_state, Some(MarketState::Closed));
        assert_eq!(s.effective_trade_date, Some(session));
        assert_eq!(s.is_date_consistent, Some(true));
        assert!(s.detected_at.is_some());
    }
}

#[tokio::test]
async fn test_api_serves_scan_output() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(dir.path());
    let session = date(2025, 3, 12);
    let resolver = resolver_at(at(session, 16, 30));

    let source = Arc::new(MemorySource::new());
    source.insert("NSE", "RELIANCE", sixty_bar_breakout("NSE", "RELIANCE", session));
    let scanner = Scanner::from_config(&cfg, source.clone(), resolver.clone());
    let summary = scanner
        .run(&roster(&["RELIANCE"]), &CancellationToken::new())
        .await
        .unwrap();

    let state = Arc::new(DashboardState::new(
        resolver,
        ScanStore::new(cfg.paths.scan_file()),
        DismissStore::new(cfg.paths.dismissed_file()),
        source,
    ));
    state.record_summary(summary).await;

    let resp = build_router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/v1/breakouts?timeframe=d10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["symbol"], "RELIANCE");
    assert_eq!(json[0]["breakout_pct"], 5.0);
    assert_eq!(json[0]["market_state"], "CLOSED");

    let resp = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/v1/scan/summary")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["units"], 1);
    assert_eq!(json["total_signals"], 3);
}

// ---------------------------------------------------------------------------
// Session attribution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_saturday_run_attributes_last_session() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(dir.path());
    // Saturday after Holi (Friday 2025-03-14): last session is Thursday.
    let thursday = date(2025, 3, 13);

    let source = MemorySource::new();
    source.insert("NSE", "FRESH", flat_then("NSE", "FRESH", thursday, 10, 110.0, 5000));
    source.insert("NSE", "STALE", flat_then("NSE", "STALE", date(2025, 3, 12), 10, 110.0, 5000));

    let scanner = Scanner::from_config(
        &cfg,
        Arc::new(source),
        resolver_at(at(date(2025, 3, 15), 10, 0)),
    );
    let summary = scanner
        .run(&roster(&["FRESH", "STALE"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.market.state, MarketState::Weekend);
    assert_eq!(summary.market.effective_trade_date, thursday);
    assert_eq!(summary.inconsistent_signals, 3);

    let signals = load_artifact(&cfg);
    assert_eq!(signals.len(), 6);
    for s in &signals {
        assert_eq!(s.market_state, Some(MarketState::Weekend));
        assert_eq!(s.is_date_consistent, Some(s.symbol == "FRESH"));
    }
}

#[tokio::test]
async fn test_calendar_out_of_coverage_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(dir.path());
    let scanner = Scanner::from_config(
        &cfg,
        Arc::new(MemorySource::new()),
        resolver_at(at(date(2027, 6, 2), 12, 0)),
    );

    let err = scanner
        .run(&roster(&["ANY"]), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Calendar(_)));
    assert!(!cfg.paths.scan_file().exists());
}

// ---------------------------------------------------------------------------
// Re-runs and snapshot safety
// ---------------------------------------------------------------------------

fn busy_source(session: NaiveDate, n: usize) -> (MemorySource, Vec<RosterEntry>) {
    let source = MemorySource::new();
    let mut entries = Vec::with_capacity(n);
    for i in 0..n {
        let symbol = format!("SYM{i:03}");
        let close = 101.0 + (i % 7) as f64;
        source.insert("NSE", &symbol, flat_then("NSE", &symbol, session, 60, close, 1000 + i as u64 * 100));
        entries.push(RosterEntry::new("NSE", &symbol));
    }
    (source, entries)
}

#[tokio::test]
async fn test_rerun_produces_identical_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(dir.path());
    let session = date(2025, 3, 12);
    let (source, roster) = busy_source(session, 40);
    source.fail("NSE", "SYM007");

    let scanner = Scanner::from_config(&cfg, Arc::new(source), resolver_at(at(session, 16, 30)));

    let first = scanner.run(&roster, &CancellationToken::new()).await.unwrap();
    let first_bytes = std::fs::read(cfg.paths.scan_file()).unwrap();
    let second = scanner.run(&roster, &CancellationToken::new()).await.unwrap();
    let second_bytes = std::fs::read(cfg.paths.scan_file()).unwrap();

    assert_eq!(first.failed, 1);
    assert_eq!(first.total_signals, second.total_signals);
    assert_eq!(first_bytes, second_bytes);
    assert!(!load_artifact(&cfg).iter().any(|s| s.symbol == "SYM007"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reader_never_sees_partial_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(dir.path());
    let session = date(2025, 3, 12);
    let (source, roster) = busy_source(session, 80);
    let scanner = Scanner::from_config(&cfg, Arc::new(source), resolver_at(at(session, 16, 30)));

    scanner.run(&roster, &CancellationToken::new()).await.unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));
    let reader = {
        let stop = stop.clone();
        let reads = reads.clone();
        let path = cfg.paths.scan_file();
        tokio::task::spawn_blocking(move || {
            let mut torn = 0usize;
            while !stop.load(Ordering::SeqCst) {
                let bytes = std::fs::read(&path).unwrap();
                if serde_json::from_slice::<Vec<BreakoutSignal>>(&bytes).is_err() {
                    torn += 1;
                }
                reads.fetch_add(1, Ordering::SeqCst);
            }
            torn
        })
    };

    for _ in 0..15 {
        scanner.run(&roster, &CancellationToken::new()).await.unwrap();
    }
    stop.store(true, Ordering::SeqCst);

    let torn = reader.await.unwrap();
    assert_eq!(torn, 0);
    assert!(reads.load(Ordering::SeqCst) > 0);
}
