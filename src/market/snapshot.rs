//! Persistence Adapter
//!
//! Whole-file JSON snapshot of the listing store. Saves fully overwrite
//! the previous snapshot (no append log) by writing a temp file in the
//! same directory and renaming it into place, so a crash mid-write leaves
//! the old snapshot intact. Loads are tolerant: an absent, empty or
//! malformed file yields an empty sequence, the engine must always be able
//! to start cold.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::models::Listing;

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot. Never fails; every problem degrades to an empty
    /// store with a warning.
    pub async fn load(&self) -> Vec<Listing> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read snapshot, starting cold");
                return Vec::new();
            }
        };
        if raw.is_empty() {
            return Vec::new();
        }
        match serde_json::from_slice(&raw) {
            Ok(listings) => listings,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "malformed snapshot, starting cold");
                Vec::new()
            }
        }
    }

    /// Overwrites the snapshot with `listings` (callers pass them already
    /// sorted newest-first). Write-then-rename keeps the previous snapshot
    /// readable until the new one is complete.
    pub async fn save(&self, listings: &[Listing]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("create snapshot dir {}", parent.display()))?;
            }
        }

        let json = serde_json::to_vec_pretty(listings).context("serialize snapshot")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("write snapshot temp file {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replace snapshot {}", self.path.display()))?;
        Ok(())
    }
}
