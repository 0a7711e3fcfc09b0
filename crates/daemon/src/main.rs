// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! nixfleetd: the NixFleet control plane daemon.
//!
//! Terminates agent and browser WebSocket connections, serves the HTTP API,
//! and owns the durable event log the whole fleet's state is folded from.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use nf_daemon::event_bus::EventReader;
use nf_daemon::hub::{build_router, HubState};
use nf_daemon::lifecycle::{self, Config, LifecycleError, StartupResult};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("nixfleetd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: nixfleetd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;
    rotate_log_if_needed(&config.log_path);
    write_startup_marker(&config)?;
    let log_guard = setup_logging(&config)?;

    info!("starting nixfleetd");

    let StartupResult { hub, config, event_reader, .. } = match lifecycle::startup(&config).await {
        Ok(r) => r,
        Err(LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&config.lock_path).unwrap_or_default().trim().to_string();
            eprintln!("nixfleetd is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            write_startup_error(&config, &e);
            error!("failed to start daemon: {e}");
            drop(log_guard);
            return Err(e.into());
        }
    };

    let cancel = CancellationToken::new();
    spawn_signal_handlers(cancel.clone());
    spawn_event_drain(event_reader, cancel.clone());
    spawn_checkpoint_tick(Arc::clone(&hub), config.clone(), cancel.clone());
    spawn_flush_task(Arc::clone(&hub), cancel.clone());
    spawn_timeout_tick(Arc::clone(&hub), cancel.clone());
    spawn_orphan_cleanup_tick(Arc::clone(&hub), &config, cancel.clone());
    spawn_retention_tick(Arc::clone(&hub), &config, cancel.clone());
    tokio::spawn(hub.remote.clone().run(config.remote_state_ttl, cancel.clone()));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "daemon ready");
    println!("READY");

    let app = build_router(Arc::clone(&hub));
    axum::serve(listener, app).with_graceful_shutdown(cancel.clone().cancelled_owned()).await?;

    lifecycle::checkpoint(&hub, &config);
    lifecycle::shutdown(&config);
    info!("daemon stopped");
    Ok(())
}

fn spawn_signal_handlers(cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        cancel.cancel();
    });
}

/// Drains the WAL reader, advancing its processed-seq watermark. Every
/// entry is already folded into state synchronously by [`HubState::emit`]
/// at the point it was appended, so this task exists only to track how far
/// the log has been durably consumed for [`lifecycle::checkpoint`]'s sake.
fn spawn_event_drain(mut event_reader: EventReader, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = event_reader.recv() => {
                    if let Err(e) = result {
                        error!("WAL read error: {e}");
                    }
                }
            }
        }
    });
}

const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

fn spawn_checkpoint_tick(hub: Arc<HubState>, config: Config, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(CHECKPOINT_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => lifecycle::checkpoint(&hub, &config),
            }
        }
    });
}

const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

fn spawn_flush_task(hub: Arc<HubState>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => {
                    let mut wal = hub.events.wal.lock();
                    if wal.needs_flush() {
                        if let Err(e) = wal.flush() {
                            error!("failed to flush WAL: {e}");
                        }
                    }
                }
            }
        }
    });
}

/// §4.4.4 — timeout scan, on a 10s tick per the Lifecycle Manager's doc comment.
const TIMEOUT_TICK_INTERVAL: Duration = Duration::from_secs(10);

fn spawn_timeout_tick(hub: Arc<HubState>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(TIMEOUT_TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => hub.manager.timeout_tick(),
            }
        }
    });
}

fn spawn_orphan_cleanup_tick(hub: Arc<HubState>, config: &Config, cancel: CancellationToken) {
    let interval_ms = config.heartbeat_interval.as_millis() as u64;
    let multiplier = config.heartbeat_miss_multiplier;
    let period = config.heartbeat_interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => {
                    hub.manager.orphan_cleanup_tick(interval_ms, multiplier, &|host_id| hub.agents.is_connected(host_id));
                }
            }
        }
    });
}

const RETENTION_TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

fn spawn_retention_tick(hub: Arc<HubState>, config: &Config, cancel: CancellationToken) {
    let event_retention = config.event_retention.as_millis() as u64;
    let command_retention = config.command_retention.as_millis() as u64;
    let pipeline_retention = config.pipeline_retention.as_millis() as u64;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(RETENTION_TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tick.tick() => {
                    use nf_core::Clock;
                    let now = nf_core::SystemClock.epoch_ms();
                    let mut state = hub.state.lock();
                    let events = state.cleanup_old_events(now, event_retention);
                    let commands = state.cleanup_old_commands(now, command_retention);
                    let pipelines = state.cleanup_old_pipelines(now, pipeline_retention);
                    drop(state);
                    if events + commands + pipelines > 0 {
                        info!(events, commands, pipelines, "retention cleanup");
                    }
                }
            }
        }
    });
}

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
const MAX_ROTATED_LOGS: u32 = 3;

/// Shifts `daemon.log` → `daemon.log.1` → ... → `daemon.log.3`, dropping the
/// oldest, if the current log exceeds [`MAX_LOG_SIZE`]. Best-effort: failures
/// are silently ignored so the daemon still starts.
fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }
    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let _ = std::fs::rename(format!("{log_str}.{i}"), format!("{log_str}.{}", i + 1));
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

const STARTUP_MARKER_PREFIX: &str = "--- nixfleetd: starting (pid: ";

fn write_startup_marker(config: &Config) -> Result<(), LifecycleError> {
    use std::io::Write;
    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&config.log_path)?;
    writeln!(file, "{}{}) ---", STARTUP_MARKER_PREFIX, std::process::id())?;
    Ok(())
}

fn write_startup_error(config: &Config, error: &LifecycleError) {
    use std::io::Write;
    let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&config.log_path) else { return };
    let _ = writeln!(file, "ERROR failed to start daemon: {error}");
}

fn setup_logging(config: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let dir = config.log_path.parent().ok_or(LifecycleError::NoStateDir)?;
    let file_name = config.log_path.file_name().ok_or(LifecycleError::NoStateDir)?;
    std::fs::create_dir_all(dir)?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer().with_writer(non_blocking)).init();
    Ok(guard)
}

fn print_help() {
    println!("nixfleetd {}", env!("CARGO_PKG_VERSION"));
    println!("NixFleet control plane daemon — serves the agent and dashboard WebSocket");
    println!("endpoints and the HTTP API described in the NixFleet protocol.");
    println!();
    println!("USAGE:");
    println!("    nixfleetd");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print help information");
    println!("    -v, --version    Print version information");
}
