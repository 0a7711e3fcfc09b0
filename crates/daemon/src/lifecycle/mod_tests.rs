// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tempfile::tempdir;

use super::*;

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        state_dir: dir.to_path_buf(),
        bind_addr: "127.0.0.1:0".to_string(),
        lock_path: dir.join("daemon.pid"),
        version_path: dir.join("daemon.version"),
        log_path: dir.join("daemon.log"),
        wal_path: dir.join("wal").join("events.wal"),
        snapshot_path: dir.join("snapshot.json"),
        logs_path: dir.join("logs"),
        heartbeat_interval: std::time::Duration::from_secs(15),
        heartbeat_miss_multiplier: 3,
        remote_state_url: None,
        remote_state_ttl: std::time::Duration::from_secs(5),
        event_retention: std::time::Duration::from_secs(7 * 24 * 60 * 60),
        command_retention: std::time::Duration::from_secs(30 * 24 * 60 * 60),
        pipeline_retention: std::time::Duration::from_secs(30 * 24 * 60 * 60),
    }
}

#[test]
fn shutdown_removes_lock_and_version_files() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(&config.lock_path, b"123").unwrap();
    std::fs::write(&config.version_path, b"0.1.0").unwrap();

    shutdown(&config);

    assert!(!config.lock_path.exists());
    assert!(!config.version_path.exists());
}

#[test]
fn shutdown_is_a_noop_when_files_are_already_gone() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    shutdown(&config);
}
