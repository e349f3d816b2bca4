//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults so a partial file (or none of a section)
//! is valid; [`AppConfig::validate`] rejects values that would make a
//! scan meaningless.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::market::SessionHours;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub paths: PathsConfig,
    pub market: MarketConfig,
    pub breakout: BreakoutConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    /// Maximum symbols processed concurrently.
    pub max_workers: usize,
    /// Hard deadline for one symbol's load + compute.
    pub unit_timeout_secs: u64,
    /// Period of the scheduled scan in `serve` mode.
    pub scan_interval_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_workers: 20,
            unit_timeout_secs: 30,
            scan_interval_secs: 300,
        }
    }
}

impl ScannerConfig {
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl PathsConfig {
    /// `{data_dir}/historical`, root of the per-symbol series files.
    pub fn historical_dir(&self) -> PathBuf {
        self.data_dir.join("historical")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    pub fn universe_file(&self) -> PathBuf {
        self.processed_dir().join("universe.json")
    }

    pub fn scan_file(&self) -> PathBuf {
        self.processed_dir().join("breakout_scan.json")
    }

    pub fn dismissed_file(&self) -> PathBuf {
        self.processed_dir().join("dismissed.json")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    /// IANA zone of the exchange, e.g. `Asia/Kolkata`.
    pub timezone: String,
    /// TOML holiday calendar for the exchange.
    pub calendar_file: PathBuf,
    pub session: SessionHours,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Kolkata".to_string(),
            calendar_file: PathBuf::from("calendar/xbom.toml"),
            session: SessionHours::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8000,
        }
    }
}

// ---------------------------------------------------------------------------
// Breakout windows
// ---------------------------------------------------------------------------

/// Size of a lookback window: a fixed number of trading days, or every
/// bar before the one under evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WindowRepr", into = "WindowRepr")]
pub enum Window {
    Days(usize),
    All,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WindowRepr {
    Days(usize),
    Keyword(String),
}

impl TryFrom<WindowRepr> for Window {
    type Error = String;

    fn try_from(repr: WindowRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            WindowRepr::Days(0) => Err("window must be at least 1 day".to_string()),
            WindowRepr::Days(n) => Ok(Window::Days(n)),
            WindowRepr::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(Window::All),
            WindowRepr::Keyword(k) => Err(format!("unknown window {k:?}, expected a day count or \"ALL\"")),
        }
    }
}

impl From<Window> for WindowRepr {
    fn from(w: Window) -> Self {
        match w {
            Window::Days(n) => WindowRepr::Days(n),
            Window::All => WindowRepr::Keyword("ALL".to_string()),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Days(n) => write!(f, "{n}d"),
            Window::All => write!(f, "ALL"),
        }
    }
}

/// A named lookback window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackSpec {
    pub name: String,
    pub window: Window,
}

impl LookbackSpec {
    pub fn days(name: &str, n: usize) -> Self {
        Self { name: name.to_string(), window: Window::Days(n) }
    }

    pub fn all(name: &str) -> Self {
        Self { name: name.to_string(), window: Window::All }
    }
}

/// Process-wide breakout configuration, loaded once and shared read-only.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BreakoutConfig {
    pub lookbacks: Vec<LookbackSpec>,
    /// Current volume must exceed `avg * volume_multiplier` to confirm.
    pub volume_multiplier: f64,
    /// Breakout type names, most significant first.
    pub priority: Vec<String>,
    /// Volume baseline for the `ALL` window uses at most this many bars.
    pub all_window_volume_cap: usize,
    /// Preceding bars required before the `ALL` window is evaluated.
    pub min_history: usize,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            lookbacks: vec![
                LookbackSpec::days("TODAY", 1),
                LookbackSpec::days("D2", 2),
                LookbackSpec::days("D10", 10),
                LookbackSpec::days("D30", 30),
                LookbackSpec::days("D50", 50),
                LookbackSpec::days("D100", 100),
                LookbackSpec::days("W52", 252),
                LookbackSpec::all("ALL_TIME"),
            ],
            volume_multiplier: 1.5,
            priority: ["ALL_TIME", "W52", "D100", "D50", "D30", "D10", "D2", "TODAY"]
                .into_iter()
                .map(String::from)
                .collect(),
            all_window_volume_cap: 50,
            min_history: 50,
        }
    }
}

impl BreakoutConfig {
    /// Rank of a breakout type (lower sorts first). Unknown types sort last.
    pub fn priority_of(&self, breakout_type: &str) -> usize {
        self.priority
            .iter()
            .position(|p| p == breakout_type)
            .unwrap_or(usize::MAX)
    }

    pub fn lookback(&self, name: &str) -> Option<&LookbackSpec> {
        self.lookbacks.iter().find(|l| l.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lookbacks.is_empty() {
            bail!("breakout.lookbacks must not be empty");
        }
        let mut seen = HashSet::new();
        for lb in &self.lookbacks {
            if !seen.insert(lb.name.as_str()) {
                bail!("duplicate lookback name {}", lb.name);
            }
            if !self.priority.contains(&lb.name) {
                bail!("lookback {} has no entry in breakout.priority", lb.name);
            }
        }
        if !(self.volume_multiplier.is_finite() && self.volume_multiplier > 0.0) {
            bail!("breakout.volume_multiplier must be positive, got {}", self.volume_multiplier);
        }
        if self.all_window_volume_cap == 0 {
            bail!("breakout.all_window_volume_cap must be at least 1");
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scanner.max_workers == 0 {
            bail!("scanner.max_workers must be at least 1");
        }
        if self.scanner.unit_timeout_secs == 0 {
            bail!("scanner.unit_timeout_secs must be at least 1");
        }
        if self.scanner.scan_interval_secs == 0 {
            bail!("scanner.scan_interval_secs must be at least 1");
        }
        if !self.market.session.is_valid() {
            bail!("market.session boundaries must be strictly increasing within one day");
        }
        self.breakout.validate().context("Invalid [breakout] section")?;
        Ok(())
    }
}
