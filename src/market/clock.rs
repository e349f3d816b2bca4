//! Exchange-local wall clock.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Source of "now" in the exchange's time zone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;
}

/// Real wall clock converted into a fixed exchange zone
/// (never the host's local zone).
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Parse an IANA zone name such as `Asia/Kolkata`.
    pub fn from_name(name: &str) -> anyhow::Result<Self> {
        let tz: Tz = name
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid time zone {name}: {e}"))?;
        Ok(Self::new(tz))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    instant: DateTime<Tz>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Tz>) -> Self {
        Self { instant }
    }

    /// Pin the clock to a local wall time in `tz`. Ambiguous times take
    /// the earlier instant; nonexistent ones are an error.
    pub fn at_local(tz: Tz, local: NaiveDateTime) -> anyhow::Result<Self> {
        let instant = tz
            .from_local_datetime(&local)
            .earliest()
            .ok_or_else(|| anyhow::anyhow!("nonexistent local time {local} in {tz}"))?;
        Ok(Self::new(instant))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        self.instant
    }
}
