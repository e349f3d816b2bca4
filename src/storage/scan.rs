//! Scan snapshot store.
//!
//! One JSON array of ranked signals, replaced wholesale by every run.
//! A missing file means "no scan has run yet"; `[]` means "ran, found
//! nothing". Both states are meaningful to readers.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

use super::write_json_atomic;
use crate::types::BreakoutSignal;

#[derive(Debug, Clone)]
pub struct ScanStore {
    path: PathBuf,
}

impl ScanStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the snapshot. An empty slice is still written.
    pub fn save(&self, signals: &[BreakoutSignal]) -> Result<()> {
        write_json_atomic(&self.path, signals)?;
        info!(path = %self.path.display(), signals = signals.len(), "Scan snapshot saved");
        Ok(())
    }

    /// Read the whole snapshot. `None` when no scan has been persisted.
    pub fn load(&self) -> Result<Option<Vec<BreakoutSignal>>> {
        let json = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read scan from {}", self.path.display()))
            }
        };
        let signals = serde_json::from_slice(&json)
            .with_context(|| format!("Failed to parse scan from {}", self.path.display()))?;
        Ok(Some(signals))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
