//! Trading calendar.
//!
//! A calendar answers two questions: is this date a session, and what was
//! the most recent session on or before a date. The file-backed
//! [`HolidayCalendar`] declares the range of dates it knows about; asking
//! about anything outside that range is an error rather than a guess, and
//! there is deliberately no fallback to some other exchange's calendar.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::debug;

/// How far back `last_session_date` searches before giving up.
/// Covers the longest holiday clusters (Diwali week plus a weekend).
pub const SESSION_LOOKBACK_DAYS: u64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Trading calendar unavailable: {0}")]
    Unavailable(String),

    #[error("{date} is outside the {exchange} calendar coverage ({from} to {to})")]
    OutOfCoverage {
        exchange: String,
        date: NaiveDate,
        from: NaiveDate,
        to: NaiveDate,
    },

    #[error("No trading session within {days} days on or before {reference}")]
    NoSession { reference: NaiveDate, days: u64 },
}

/// Session lookup for one exchange.
pub trait TradingCalendar: Send + Sync {
    /// Exchange identifier, for logs.
    fn exchange(&self) -> &str;

    fn is_weekend(&self, date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    fn is_trading_day(&self, date: NaiveDate) -> Result<bool, CalendarError>;

    /// Most recent session on or before `reference`, searching back
    /// [`SESSION_LOOKBACK_DAYS`] calendar days.
    fn last_session_date(&self, reference: NaiveDate) -> Result<NaiveDate, CalendarError> {
        for offset in 0..=SESSION_LOOKBACK_DAYS {
            let Some(date) = reference.checked_sub_days(Days::new(offset)) else {
                break;
            };
            if self.is_trading_day(date)? {
                return Ok(date);
            }
        }
        Err(CalendarError::NoSession {
            reference,
            days: SESSION_LOOKBACK_DAYS,
        })
    }
}

// ---------------------------------------------------------------------------
// File-backed calendar
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CalendarFile {
    exchange: String,
    valid_from: NaiveDate,
    valid_to: NaiveDate,
    #[serde(default = "default_weekend")]
    weekend: Vec<Weekday>,
    #[serde(default)]
    holidays: Vec<HolidayEntry>,
}

#[derive(Debug, Deserialize)]
struct HolidayEntry {
    date: NaiveDate,
    #[serde(default)]
    description: String,
}

fn default_weekend() -> Vec<Weekday> {
    vec![Weekday::Sat, Weekday::Sun]
}

/// Weekday calendar minus a declared holiday list, valid over a fixed range.
#[derive(Debug, Clone)]
pub struct HolidayCalendar {
    exchange: String,
    valid_from: NaiveDate,
    valid_to: NaiveDate,
    weekend: HashSet<Weekday>,
    holidays: BTreeMap<NaiveDate, String>,
}

impl HolidayCalendar {
    pub fn new(exchange: &str, valid_from: NaiveDate, valid_to: NaiveDate) -> Self {
        Self {
            exchange: exchange.to_string(),
            valid_from,
            valid_to,
            weekend: default_weekend().into_iter().collect(),
            holidays: BTreeMap::new(),
        }
    }

    pub fn with_holiday(mut self, date: NaiveDate, description: &str) -> Self {
        self.holidays.insert(date, description.to_string());
        self
    }

    /// Load a calendar from a TOML file. A missing or malformed file is
    /// [`CalendarError::Unavailable`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CalendarError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            CalendarError::Unavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let cal = Self::from_toml(&contents).map_err(|e| match e {
            CalendarError::Unavailable(msg) => {
                CalendarError::Unavailable(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        debug!(
            path = %path.display(),
            exchange = %cal.exchange,
            holidays = cal.holidays.len(),
            "Trading calendar loaded"
        );
        Ok(cal)
    }

    pub fn from_toml(contents: &str) -> Result<Self, CalendarError> {
        let file: CalendarFile = toml::from_str(contents)
            .map_err(|e| CalendarError::Unavailable(format!("invalid calendar: {e}")))?;
        if file.valid_from > file.valid_to {
            return Err(CalendarError::Unavailable(format!(
                "empty coverage range {} to {}",
                file.valid_from, file.valid_to
            )));
        }
        Ok(Self {
            exchange: file.exchange,
            valid_from: file.valid_from,
            valid_to: file.valid_to,
            weekend: file.weekend.into_iter().collect(),
            holidays: file
                .holidays
                .into_iter()
                .map(|h| (h.date, h.description))
                .collect(),
        })
    }

    pub fn holiday(&self, date: NaiveDate) -> Option<&str> {
        self.holidays.get(&date).map(String::as_str)
    }

    fn check_coverage(&self, date: NaiveDate) -> Result<(), CalendarError> {
        if date < self.valid_from || date > self.valid_to {
            return Err(CalendarError::OutOfCoverage {
                exchange: self.exchange.clone(),
                date,
                from: self.valid_from,
                to: self.valid_to,
            });
        }
        Ok(())
    }
}

impl TradingCalendar for HolidayCalendar {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    fn is_weekend(&self, date: NaiveDate) -> bool {
        self.weekend.contains(&date.weekday())
    }

    fn is_trading_day(&self, date: NaiveDate) -> Result<bool, CalendarError> {
        self.check_coverage(date)?;
        Ok(!self.is_weekend(date) && !self.holidays.contains_key(&date))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
