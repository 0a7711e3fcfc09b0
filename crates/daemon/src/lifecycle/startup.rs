// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup: lock acquisition, snapshot/WAL recovery, and wiring the
//! shared [`crate::hub::HubState`].

use std::io::Write;
use std::sync::Arc;

use fs2::FileExt;
use nf_core::Clock;
use nf_storage::{load_snapshot, Checkpointer, MaterializedState, Wal};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::event_bus::EventBus;
use crate::hub::{AgentRegistry, BrowserRegistry, HubState};
use crate::manager::LifecycleManager;
use crate::remote_state::RemoteStateSource;

use super::{Config, LifecycleError, StartupResult};

/// Start the daemon: acquire the exclusive lock, recover state from
/// snapshot + WAL tail, and wire the [`HubState`] the Connection Hub runs
/// against. Cleans up partial on-disk state if any step after the lock
/// fails (the lock itself is left alone — those files belong to whatever
/// daemon is already holding it).
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    if let Some(parent) = config.wal_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.logs_path)?;

    // Acquire the lock FIRST — before any other file is touched — to avoid
    // racing a second daemon instance. OpenOptions avoids truncating a file
    // that may belong to the already-running daemon before we hold the lock.
    let lock_file = std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    std::fs::write(&config.version_path, env!("CARGO_PKG_VERSION"))?;

    let (mut state, processed_seq) = match load_snapshot(&config.snapshot_path)? {
        Some(snapshot) => {
            info!(seq = snapshot.seq, hosts = snapshot.state.hosts.len(), "loaded snapshot");
            (snapshot.state, snapshot.seq)
        }
        None => {
            info!("no snapshot found, starting with empty state");
            (MaterializedState::default(), 0)
        }
    };

    // Every non-terminal command and online host is stale after a restart —
    // agents reconnect and re-register over the WebSocket, they don't
    // survive as daemon-supervised processes the way the teacher's runbook
    // sessions do.
    let now_ms = nf_core::SystemClock.epoch_ms();
    let orphaned = state.recover_orphaned(now_ms);
    if !orphaned.is_empty() {
        warn!(count = orphaned.len(), "orphaned non-terminal commands on restart");
    }

    let wal = Wal::open(&config.wal_path, processed_seq)?;
    let replay = wal.entries_after(processed_seq)?;
    let replay_count = replay.len();
    for entry in replay {
        state.apply_event(&entry.event);
    }
    if replay_count > 0 {
        info!(replay_count, after_seq = processed_seq, "replayed WAL entries");
    }
    info!(hosts = state.hosts.len(), commands = state.commands.len(), "recovered state");

    let (events, event_reader) = EventBus::new(wal);
    let state = Arc::new(Mutex::new(state));

    let agents = AgentRegistry::default();
    let browsers = BrowserRegistry::new(Arc::clone(&state));
    let manager = Arc::new(LifecycleManager::new(
        Arc::clone(&state),
        events.clone(),
        agents.clone(),
        browsers.clone(),
        nf_core::SystemClock,
    ));
    let remote = RemoteStateSource::new(config.remote_state_url.clone());

    let hub = Arc::new(HubState::new(state, events, manager, agents, browsers, remote, config.logs_path.clone()));

    info!("daemon started");

    Ok(StartupResult { hub, config: config.clone(), event_reader, lock_file })
}

/// Writes the latest state to `config.snapshot_path`, at the WAL sequence
/// durably appended so far. Called periodically and once more on shutdown
/// so the next startup has as little WAL tail to replay as possible. A
/// no-op before the first event has ever been appended.
pub fn checkpoint(hub: &HubState, config: &Config) {
    let seq = hub.events.wal.lock().processed_seq();
    if seq == 0 {
        return;
    }
    let state = hub.state.lock().clone();
    let checkpointer = Checkpointer::new(config.snapshot_path.clone());
    if let Err(e) = checkpointer.checkpoint(&state, seq) {
        warn!("failed to write snapshot checkpoint: {e}");
    }
}

fn cleanup_on_failure(config: &Config) {
    if config.version_path.exists() {
        let _ = std::fs::remove_file(&config.version_path);
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
