// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser WebSocket connections: the State Sync Protocol (§4.7). Each
//! connection gets an `init` frame, then a feed of `delta`/`sync` frames
//! until it disconnects or requests a `get_state` resync.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use nf_core::StateVersion;
use nf_storage::MaterializedState;
use nf_wire::{Change, ClientSyncMessage, ServerSyncMessage};
use parking_lot::{Mutex as PLMutex, RwLock};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::manager::DeltaBroadcaster;
use crate::HubState;

const OUTBOUND_CAPACITY: usize = 256;
const SYNC_INTERVAL: Duration = Duration::from_secs(30);

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
}

/// Registry of connected browser clients. Implements [`DeltaBroadcaster`];
/// a stale handle (closed, or whose channel is full) is dropped from the
/// list rather than left to accumulate.
#[derive(Clone)]
pub struct BrowserRegistry {
    clients: Arc<RwLock<Vec<(u64, ClientHandle)>>>,
    next_id: Arc<AtomicU64>,
    state: Arc<PLMutex<MaterializedState>>,
}

impl BrowserRegistry {
    pub fn new(state: Arc<PLMutex<MaterializedState>>) -> Self {
        Self { clients: Arc::new(RwLock::new(Vec::new())), next_id: Arc::new(AtomicU64::new(0)), state }
    }

    fn register(&self) -> (u64, mpsc::Receiver<Message>, Arc<AtomicBool>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        self.clients.write().push((id, ClientHandle { tx, closed: closed.clone() }));
        (id, rx, closed)
    }

    fn unregister(&self, id: u64) {
        self.clients.write().retain(|(existing, _)| *existing != id);
    }

    fn send_to(&self, id: u64, msg: &ServerSyncMessage) {
        let Ok(text) = serde_json::to_string(msg) else { return };
        let clients = self.clients.read();
        if let Some((_, handle)) = clients.iter().find(|(existing, _)| *existing == id) {
            handle.try_send(Message::Text(text));
        }
    }
}

impl DeltaBroadcaster for BrowserRegistry {
    fn broadcast(&self, change: Change, version: StateVersion) {
        // `version` is captured by the caller inside the same state-lock
        // acquisition that ran `apply_event`, so it's exactly the version
        // this delta produced — no second lock, no race against a
        // concurrent emit from another task.
        let msg = ServerSyncMessage::Delta { change, version };
        let Ok(text) = serde_json::to_string(&msg) else { return };
        self.clients.write().retain(|(_, handle)| handle.try_send(Message::Text(text.clone())));
    }
}

/// Drives one browser connection: sends `init`, then loops delivering
/// broadcast deltas and periodic `sync` frames, answering `get_state`.
pub async fn run(mut socket: WebSocket, hub: Arc<HubState>) {
    let (id, mut rx, closed) = hub.browsers.register();

    let (state, version) = hub.full_state();
    let init = serde_json::to_string(&ServerSyncMessage::Init { state, version }).unwrap();
    if socket.send(Message::Text(init)).await.is_err() {
        hub.browsers.unregister(id);
        return;
    }

    info!("browser connected");
    let mut sync_tick = tokio::time::interval(SYNC_INTERVAL);
    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_frame(&hub, id, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("browser socket error: {e}");
                        break;
                    }
                }
            }
            Some(out) = rx.recv() => {
                if socket.send(out).await.is_err() {
                    break;
                }
            }
            _ = sync_tick.tick() => {
                let (_, version) = hub.full_state();
                hub.browsers.send_to(id, &ServerSyncMessage::Sync { version });
            }
        }
    }

    closed.store(true, Ordering::Relaxed);
    hub.browsers.unregister(id);
    info!("browser disconnected");
}

fn handle_frame(hub: &Arc<HubState>, id: u64, text: &str) {
    let Ok(msg) = serde_json::from_str::<ClientSyncMessage>(text) else {
        warn!("unparseable browser frame, ignoring");
        return;
    };
    match msg {
        ClientSyncMessage::GetState => {
            let (state, version) = hub.full_state();
            hub.browsers.send_to(id, &ServerSyncMessage::FullState { state, version });
        }
    }
}
