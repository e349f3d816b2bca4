//! Universe roster file (written by the roster builder).

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::write_json_atomic;
use crate::types::RosterEntry;

/// Load the roster. Unlike series, a missing roster is an error: a scan
/// without a universe has nothing to say.
pub fn load_roster(path: &Path) -> Result<Vec<RosterEntry>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read universe from {}", path.display()))?;
    let roster: Vec<RosterEntry> = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse universe from {}", path.display()))?;
    info!(path = %path.display(), instruments = roster.len(), "Universe loaded");
    Ok(roster)
}

pub fn save_roster(path: &Path, roster: &[RosterEntry]) -> Result<()> {
    write_json_atomic(path, roster)
}
