// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: config, startup, and shutdown.

mod startup;
pub use startup::{checkpoint, startup};

use std::fs::File;
use std::path::PathBuf;

use thiserror::Error;

/// Daemon configuration. Read once at startup, never re-read per request.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. `~/.local/state/nixfleet`).
    pub state_dir: PathBuf,
    /// HTTP/WebSocket bind address.
    pub bind_addr: String,
    /// Path to lock/PID file.
    pub lock_path: PathBuf,
    /// Path to version file.
    pub version_path: PathBuf,
    /// Path to daemon log file.
    pub log_path: PathBuf,
    /// Path to WAL file.
    pub wal_path: PathBuf,
    /// Path to snapshot file.
    pub snapshot_path: PathBuf,
    /// Directory holding one rolling log file per host (`<host_id>.log`).
    pub logs_path: PathBuf,
    /// Agent heartbeat interval the control plane expects.
    pub heartbeat_interval: std::time::Duration,
    /// Missed-heartbeat multiplier before a host is orphan-cleaned.
    pub heartbeat_miss_multiplier: u32,
    /// Remote desired-state publisher URL (`None` disables the poller).
    pub remote_state_url: Option<String>,
    /// Remote desired-state poll interval.
    pub remote_state_ttl: std::time::Duration,
    /// Event-log retention.
    pub event_retention: std::time::Duration,
    /// Command-row retention.
    pub command_retention: std::time::Duration,
    /// Pipeline-row retention.
    pub pipeline_retention: std::time::Duration,
}

impl Config {
    /// Load configuration from the environment, mirroring `crate::env`'s
    /// accessors. Fixed paths under the resolved state directory; one
    /// daemon serves the whole fleet.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = crate::env::state_dir()?;

        Ok(Self {
            bind_addr: crate::env::bind_addr(),
            lock_path: state_dir.join("daemon.pid"),
            version_path: state_dir.join("daemon.version"),
            log_path: state_dir.join("daemon.log"),
            wal_path: state_dir.join("wal").join("events.wal"),
            snapshot_path: state_dir.join("snapshot.json"),
            logs_path: state_dir.join("logs"),
            heartbeat_interval: crate::env::heartbeat_interval(),
            heartbeat_miss_multiplier: crate::env::heartbeat_miss_multiplier(),
            remote_state_url: crate::env::remote_state_url(),
            remote_state_ttl: crate::env::remote_state_ttl(),
            event_retention: crate::env::event_retention(),
            command_retention: crate::env::command_retention(),
            pipeline_retention: crate::env::pipeline_retention(),
            state_dir,
        })
    }
}

/// Everything `startup` hands back to `main`: the wired-up hub plus the
/// handles `main` needs to drive background tasks and release on shutdown.
pub struct StartupResult {
    pub hub: std::sync::Arc<crate::hub::HubState>,
    pub config: Config,
    pub event_reader: crate::event_bus::EventReader,
    // NOTE(lifetime): held only to keep the exclusive file lock; released on drop.
    #[allow(dead_code)]
    lock_file: File,
}

/// Releases the daemon's on-disk footprint (socket-equivalent bind address
/// needs no cleanup, but the lock/version files do). The lock file itself
/// is released by `Drop` when `StartupResult` (or whatever holds it) goes
/// out of scope.
pub fn shutdown(config: &Config) {
    tracing::info!("shutting down daemon");
    if config.lock_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.lock_path) {
            tracing::warn!("failed to remove PID file: {e}");
        }
    }
    if config.version_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.version_path) {
            tracing::warn!("failed to remove version file: {e}");
        }
    }
    tracing::info!("daemon shutdown complete");
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,
    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),
    #[error("WAL error: {0}")]
    Wal(#[from] nf_storage::WalError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] nf_storage::SnapshotError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
