//! Breakout scanner entry point.
//!
//! Loads configuration, initialises structured logging, wires the exchange
//! clock and calendar into the market state resolver, then either runs one
//! scan (`--mode scan`) or serves the API with a periodic scan loop
//! (`--mode serve`) until Ctrl+C.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use breakout_scanner::config::AppConfig;
use breakout_scanner::dashboard::{spawn_dashboard, DashboardState};
use breakout_scanner::engine::{ScanSummary, Scanner};
use breakout_scanner::market::{HolidayCalendar, MarketStateResolver, SystemClock};
use breakout_scanner::storage::{DismissStore, JsonSeriesCache, ScanStore, SeriesSource};
use breakout_scanner::types::ScanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run one scan and exit.
    Scan,
    /// Serve the API and rescan on an interval.
    Serve,
}

#[derive(Debug, Parser)]
#[command(name = "breakout-scanner", version, about = "Equity breakout scanner")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[arg(long, value_enum, default_value_t = Mode::Scan)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let args = Args::parse();
    let cfg = AppConfig::load(&args.config)?;
    init_logging();

    info!(
        config = %args.config,
        mode = ?args.mode,
        data_dir = %cfg.paths.data_dir.display(),
        timezone = %cfg.market.timezone,
        workers = cfg.scanner.max_workers,
        "Breakout scanner starting up"
    );

    // -- Market session services -----------------------------------------

    let clock = SystemClock::from_name(&cfg.market.timezone)?;
    debug!(timezone = %clock.timezone(), "Session clock ready");
    let calendar = HolidayCalendar::load(&cfg.market.calendar_file).with_context(|| {
        format!(
            "Trading calendar unavailable: {}",
            cfg.market.calendar_file.display()
        )
    })?;
    let resolver = MarketStateResolver::new(Arc::new(clock), Arc::new(calendar))
        .with_hours(cfg.market.session);

    let context = resolver.resolve()?;
    info!(
        market_state = %context.state,
        effective_trade_date = %context.effective_trade_date,
        "{}",
        context.description
    );

    // -- Scanner ---------------------------------------------------------

    let source: Arc<dyn SeriesSource> = Arc::new(JsonSeriesCache::new(cfg.paths.historical_dir()));
    let scanner = Scanner::from_config(&cfg, source.clone(), resolver.clone());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received.");
                shutdown.cancel();
            }
        });
    }

    match args.mode {
        Mode::Scan => {
            let summary = scanner
                .run_from_file(&cfg.paths.universe_file(), &shutdown)
                .await?;
            log_failures(&summary);
        }
        Mode::Serve => {
            let state = Arc::new(DashboardState::new(
                resolver,
                ScanStore::new(cfg.paths.scan_file()),
                DismissStore::new(cfg.paths.dismissed_file()),
                source,
            ));

            let server = if cfg.dashboard.enabled {
                Some(spawn_dashboard(state.clone(), cfg.dashboard.port, shutdown.clone()).await?)
            } else {
                None
            };

            let mut interval =
                tokio::time::interval(Duration::from_secs(cfg.scanner.scan_interval_secs));
            info!(
                interval_secs = cfg.scanner.scan_interval_secs,
                "Entering scan loop. Press Ctrl+C to stop."
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match scanner.run_from_file(&cfg.paths.universe_file(), &shutdown).await {
                            Ok(summary) => {
                                log_failures(&summary);
                                state.record_summary(summary).await;
                            }
                            Err(ScanError::Cancelled { .. }) => break,
                            Err(e @ ScanError::Calendar(_)) => return Err(e.into()),
                            Err(e) => error!(error = %e, "Scan failed, continuing to next"),
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }

            if let Some(server) = server {
                let _ = server.await;
            }
        }
    }

    info!("Breakout scanner shut down cleanly.");
    Ok(())
}

/// Log units that failed or timed out, one line each.
fn log_failures(summary: &ScanSummary) {
    for report in summary.failures() {
        warn!(
            exchange = %report.exchange,
            symbol = %report.symbol,
            outcome = ?report.outcome,
            "Scan unit did not complete"
        );
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("breakout_scanner=info"));

    let json_logging = std::env::var("BREAKOUT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
