//! Dismiss list: instruments a reviewer has hidden from the breakout view.
//!
//! Stored as a JSON array of `EXCHANGE:SYMBOL` keys. The scanner never
//! reads it; the API applies it as a post-filter.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::write_json_atomic;

pub struct DismissStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl DismissStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Current keys, in insertion order. An unreadable file counts as empty.
    pub fn list(&self) -> Vec<String> {
        match self.read() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable dismiss list");
                Vec::new()
            }
        }
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.list().into_iter().collect()
    }

    /// Add a key. Returns `false` if it was already present.
    pub async fn dismiss(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut keys = self.list();
        if keys.iter().any(|k| k == key) {
            return Ok(false);
        }
        keys.push(key.to_string());
        write_json_atomic(&self.path, &keys)?;
        info!(key, "Instrument dismissed");
        Ok(true)
    }

    /// Remove a key. Returns `false` if it was not present.
    pub async fn restore(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut keys = self.list();
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() == before {
            return Ok(false);
        }
        write_json_atomic(&self.path, &keys)?;
        info!(key, "Instrument restored");
        Ok(true)
    }

    fn read(&self) -> Result<Vec<String>> {
        let json = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to read dismiss list"),
        };
        serde_json::from_slice(&json).context("Failed to parse dismiss list")
    }
}
