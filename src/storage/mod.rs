//! Persistence layer.
//!
//! Everything the scanner reads or writes is a JSON file under the data
//! directory: the universe roster, one series file per instrument, the
//! ranked scan snapshot and the dismiss list. Writers that replace a file
//! readers may be looking at go through [`write_atomic`].

pub mod dismissed;
pub mod scan;
pub mod series;
pub mod universe;

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use dismissed::DismissStore;
pub use scan::ScanStore;
pub use series::{JsonSeriesCache, SeriesSource};

/// Replace `path` with `bytes` so that readers see either the old file or
/// the new one, never a partial write.
///
/// Writes a uniquely named sibling temp file, fsyncs it, then renames it
/// over the target. On any failure the temp file is removed and the
/// target is left untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let tmp = temp_sibling(path);
    let write_tmp = || -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    };

    if let Err(e) = write_tmp() {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to write temp file {}", tmp.display()));
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| {
            format!("Failed to rename {} to {}", tmp.display(), path.display())
        });
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Atomic write complete");
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialise {}", path.display()))?;
    write_atomic(path, &json)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Keep alphanumerics, `-` and `_` so a ticker can be used as a file name.
pub(crate) fn clean_component(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
