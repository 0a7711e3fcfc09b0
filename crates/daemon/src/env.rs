// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Protocol version (from Cargo.toml)
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve state directory: NF_STATE_DIR > XDG_STATE_HOME/nixfleet > ~/.local/state/nixfleet
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("NF_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("nixfleet"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/nixfleet"))
}

/// HTTP/WebSocket bind address (default `127.0.0.1:7337`).
pub fn bind_addr() -> String {
    std::env::var("NF_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:7337".to_string())
}

/// Agent heartbeat interval the control plane expects (default 15s).
pub fn heartbeat_interval() -> Duration {
    std::env::var("NF_HEARTBEAT_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(15))
}

/// Number of missed heartbeat intervals before a host is orphan-cleaned (default 3).
pub fn heartbeat_miss_multiplier() -> u32 {
    std::env::var("NF_HEARTBEAT_MISS_MULTIPLIER")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(3)
}

/// Remote desired-state publisher URL. `None` disables the poller (Git/Lock
/// compartments then always read as remote-unavailable).
pub fn remote_state_url() -> Option<String> {
    std::env::var("NF_REMOTE_STATE_URL").ok().filter(|s| !s.is_empty())
}

/// Remote desired-state cache TTL / poll interval (default 5s, per the version-fetch loop).
pub fn remote_state_ttl() -> Duration {
    std::env::var("NF_REMOTE_STATE_TTL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// Event-log retention (default 7 days).
pub fn event_retention() -> Duration {
    days_env("NF_EVENT_RETENTION_DAYS", 7)
}

/// Command-row retention (default 30 days).
pub fn command_retention() -> Duration {
    days_env("NF_COMMAND_RETENTION_DAYS", 30)
}

/// Pipeline-row retention (default 30 days).
pub fn pipeline_retention() -> Duration {
    days_env("NF_PIPELINE_RETENTION_DAYS", 30)
}

fn days_env(key: &str, default_days: u64) -> Duration {
    let days = std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(default_days);
    Duration::from_secs(days * 24 * 60 * 60)
}

/// Shared TOTP secret required by `requires_totp` ops. `None` means any
/// totp-gated op is always rejected with `totp_required`.
pub fn totp_secret() -> Option<String> {
    std::env::var("NF_TOTP_SECRET").ok().filter(|s| !s.is_empty())
}
