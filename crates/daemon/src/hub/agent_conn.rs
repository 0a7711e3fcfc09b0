// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent WebSocket connections: one task per connection, multiplexing reads
//! and writes through `tokio::select!` instead of splitting the socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use nf_core::{Event, HostId, OpId};
use nf_wire::{AgentMessage, ServerToAgentMessage};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::manager::AgentSender;
use crate::HubState;

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_CAPACITY: usize = 64;

/// A live connection's send side. Closing is idempotent: once `closed` is
/// set, sends are dropped rather than attempted against a dead channel.
struct ClientHandle {
    tx: mpsc::Sender<Message>,
    closed: Arc<AtomicBool>,
}

impl ClientHandle {
    fn try_send(&self, msg: Message) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.tx.try_send(msg).is_ok()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Registry of connected agents, keyed by host. Implements [`AgentSender`]
/// so the Lifecycle Manager can dispatch without knowing about connections.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    clients: Arc<RwLock<HashMap<HostId, ClientHandle>>>,
}

impl AgentRegistry {
    fn insert(&self, host_id: HostId, handle: ClientHandle) {
        if let Some(old) = self.clients.write().insert(host_id, handle) {
            old.close();
        }
    }

    /// Removes the registry entry for `host_id`, but only if it's still the
    /// same connection that's disconnecting — a newer `register` may have
    /// already replaced it.
    fn remove_if_current(&self, host_id: &HostId, closed: &Arc<AtomicBool>) {
        let mut clients = self.clients.write();
        if clients.get(host_id).is_some_and(|existing| Arc::ptr_eq(&existing.closed, closed)) {
            clients.remove(host_id);
        }
    }

    pub fn is_connected(&self, host_id: &HostId) -> bool {
        self.clients.read().contains_key(host_id)
    }
}

impl AgentSender for AgentRegistry {
    fn send_command(&self, host_id: &HostId, op_id: OpId) -> bool {
        let Ok(text) = serde_json::to_string(&ServerToAgentMessage::Command { op_id }) else { return false };
        self.clients.read().get(host_id).is_some_and(|c| c.try_send(Message::Text(text.clone())))
    }

    fn send_kill(&self, host_id: &HostId, op_id: OpId, force: bool) {
        let Ok(text) = serde_json::to_string(&ServerToAgentMessage::Kill { op_id, force }) else { return };
        if let Some(client) = self.clients.read().get(host_id) {
            client.try_send(Message::Text(text));
        }
    }
}

/// Drives one agent connection end to end: reads `register`, then loops
/// reading frames and forwarding outbound `Command`/`Kill` frames until the
/// socket closes.
pub async fn run(mut socket: WebSocket, hub: Arc<HubState>) {
    let first = match timeout(REGISTER_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => {
            warn!("agent connection dropped before a register frame arrived");
            return;
        }
    };
    let Ok(AgentMessage::Register {
        hostname,
        host_type,
        agent_version,
        os_version,
        generation,
        lock_hash,
        freshness,
        repo_url,
        repo_dir,
        theme_color,
        location,
        device_type,
    }) = serde_json::from_str::<AgentMessage>(&first)
    else {
        warn!("first frame was not a valid register message");
        return;
    };

    let host_id = HostId::new(hostname);
    let is_new = hub.state.lock().get_host(&host_id).is_none();

    hub.emit(Event::HostRegistered {
        host_id: host_id.clone(),
        host_type,
        agent_version,
        os_version,
    });
    if is_new {
        hub.emit(Event::HostConfigUpdated {
            host_id: host_id.clone(),
            theme_color: Some(theme_color),
            location: Some(location),
            device_type: Some(device_type),
            repo_url: Some(repo_url),
            repo_dir: Some(repo_dir),
        });
    }
    hub.emit(Event::HostHeartbeat {
        host_id: host_id.clone(),
        timestamp_epoch_ms: hub.clock.epoch_ms(),
        generation,
        lock_hash,
        nixpkgs_version: String::new(),
        freshness: freshness.clone(),
        metrics: serde_json::Map::new(),
    });
    // A command left `AWAITING_RECONNECT` by a prior switch-class op is
    // resolved here, against the freshness this register frame just reported.
    hub.manager.handle_reconnect(&host_id, &freshness);

    let host = hub.state.lock().get_host(&host_id).cloned();
    let Some(host) = host else { return };
    let snapshot = hub.refresh_compartments(&host).await;
    hub.broadcast_host(&host_id);

    let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let closed = Arc::new(AtomicBool::new(false));
    hub.agents.insert(host_id.clone(), ClientHandle { tx, closed: closed.clone() });

    let registered = serde_json::to_string(&ServerToAgentMessage::Registered { compartments: snapshot }).unwrap();
    if socket.send(Message::Text(registered)).await.is_err() {
        hub.agents.remove_if_current(&host_id, &closed);
        return;
    }

    info!(%host_id, "agent connected");
    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_frame(&hub, &host_id, &text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%host_id, "agent socket error: {e}");
                        break;
                    }
                }
            }
            Some(out) = rx.recv() => {
                if socket.send(out).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.agents.remove_if_current(&host_id, &closed);
    // A reconnect-class op (switch, restart, reboot, force-rebuild) still
    // EXECUTING when the socket drops moves to AWAITING_RECONNECT instead of
    // being left stuck — the same transition `handle_reconnect` resolves.
    hub.manager.handle_disconnect(&host_id);
    hub.emit(Event::HostOffline { host_id: host_id.clone() });
    hub.broadcast_host(&host_id);
    info!(%host_id, "agent disconnected");
}

async fn handle_frame(hub: &Arc<HubState>, host_id: &HostId, text: &str) {
    let Ok(msg) = serde_json::from_str::<AgentMessage>(text) else {
        warn!(%host_id, "unparseable agent frame, ignoring");
        return;
    };
    match msg {
        AgentMessage::Heartbeat { generation, lock_hash, nixpkgs_version, metrics, freshness, .. } => {
            hub.emit(Event::HostHeartbeat {
                host_id: host_id.clone(),
                timestamp_epoch_ms: hub.clock.epoch_ms(),
                generation,
                lock_hash,
                nixpkgs_version,
                freshness,
                metrics,
            });
            hub.manager.handle_heartbeat_test_result(host_id);
            if let Some(host) = hub.state.lock().get_host(host_id).cloned() {
                hub.refresh_compartments(&host).await;
            }
            hub.broadcast_host(host_id);
        }
        AgentMessage::Output { .. } => {
            // Streamed to the per-host rolling log file by the output-log
            // writer; not folded into state or broadcast.
        }
        AgentMessage::Status { op_id, exit_code, message } => {
            hub.manager.handle_status(host_id, op_id, exit_code, message);
        }
        AgentMessage::CommandRejected { reason, agent_current_op, agent_pid } => {
            hub.manager.handle_rejected(host_id, &reason, agent_current_op, agent_pid);
        }
        AgentMessage::TestProgress { .. } | AgentMessage::OperationProgress { .. } => {
            // Ephemeral progress only; logged at debug by the caller if needed.
        }
        AgentMessage::Register { .. } => {
            warn!(%host_id, "unexpected second register frame on an established connection, ignoring");
        }
    }
}
