// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic snapshot checkpointing and snapshot loading.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::migration::MigrationRegistry;
use crate::snapshot::{rotate_bak_path, Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
use crate::state::MaterializedState;

/// Loads a snapshot from `path`, migrating its schema up to
/// [`CURRENT_SNAPSHOT_VERSION`] if it's older. Returns `Ok(None)` if no
/// snapshot file exists yet (first-ever startup).
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Option<Snapshot>, SnapshotError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read(path)?;
    let value: serde_json::Value = serde_json::from_slice(&raw)?;
    let migrated = MigrationRegistry::new().migrate_to(value, CURRENT_SNAPSHOT_VERSION)?;
    let snapshot: Snapshot = serde_json::from_value(migrated)?;
    Ok(Some(snapshot))
}

/// Writes checkpoints of [`MaterializedState`] to disk on demand, keeping
/// the previous snapshot as a rotated `.bak` backup.
pub struct Checkpointer {
    path: PathBuf,
}

impl Checkpointer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes `state` (as of WAL sequence `seq`) atomically: serialize to a
    /// temp file, rotate the existing snapshot to `.bak`, then rename the
    /// temp file into place. A crash mid-write leaves either the old
    /// snapshot or the new one intact, never a half-written file.
    pub fn checkpoint(&self, state: &MaterializedState, seq: u64) -> Result<(), SnapshotError> {
        let snapshot = Snapshot {
            version: CURRENT_SNAPSHOT_VERSION,
            seq,
            state: state.clone(),
            created_at: chrono::Utc::now(),
        };

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;

        if self.path.exists() {
            let bak = rotate_bak_path(&self.path);
            fs::rename(&self.path, &bak)?;
        }
        fs::rename(&tmp, &self.path)?;

        info!(seq, hosts = state.hosts.len(), commands = state.commands.len(), "wrote snapshot checkpoint");
        Ok(())
    }

    pub fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        load_snapshot(&self.path)
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
