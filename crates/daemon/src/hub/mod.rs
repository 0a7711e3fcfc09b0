// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Connection Hub: the axum `Router` that terminates both WebSocket
//! protocols and the HTTP API, and the shared state every handler closes
//! over.

mod agent_conn;
mod browser_conn;
mod routes;

pub use agent_conn::AgentRegistry;
pub use browser_conn::BrowserRegistry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use nf_core::{
    Clock, Command, CommandStatus, Event, Host, HostId, Pipeline, PipelineId, PipelineStatus, SystemClock,
};
use nf_storage::MaterializedState;
use nf_wire::FullState;
use parking_lot::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::event_bus::EventBus;
use crate::manager::{DeltaBroadcaster, LifecycleManager};
use crate::remote_state::RemoteStateSource;

/// Shared daemon context every WebSocket and HTTP handler closes over.
pub struct HubState {
    pub state: Arc<Mutex<MaterializedState>>,
    pub events: EventBus,
    pub manager: Arc<LifecycleManager<AgentRegistry, BrowserRegistry, SystemClock>>,
    pub agents: AgentRegistry,
    pub browsers: BrowserRegistry,
    pub remote: RemoteStateSource,
    pub clock: SystemClock,
    pub start_time: Instant,
    /// The dashboard's own build version, compared against each agent's
    /// reported `agent_version` to derive the Agent compartment.
    pub dashboard_agent_version: &'static str,
    /// Directory holding one rolling output-log file per host (`<host_id>.log`).
    pub logs_path: PathBuf,
    /// Cancel flags for pipelines currently running, keyed by pipeline id.
    /// Entries are removed once the run completes, cancelled or not.
    pub pipeline_cancels: Mutex<HashMap<PipelineId, Arc<AtomicBool>>>,
}

impl HubState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        events: EventBus,
        manager: Arc<LifecycleManager<AgentRegistry, BrowserRegistry, SystemClock>>,
        agents: AgentRegistry,
        browsers: BrowserRegistry,
        remote: RemoteStateSource,
        logs_path: PathBuf,
    ) -> Self {
        Self {
            state,
            events,
            manager,
            agents,
            browsers,
            remote,
            clock: SystemClock,
            start_time: Instant::now(),
            dashboard_agent_version: env!("CARGO_PKG_VERSION"),
            logs_path,
            pipeline_cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Applies `event` to state and persists it to the WAL. Used for
    /// mutations the Hub originates directly (host registration, heartbeat,
    /// config updates) rather than through the Lifecycle Manager.
    pub fn emit(&self, event: Event) {
        self.state.lock().apply_event(&event);
        if let Err(e) = self.events.send(event) {
            warn!("failed to persist event to WAL: {e}");
        }
    }

    pub fn full_state(&self) -> (FullState, nf_core::StateVersion) {
        let state = self.state.lock();
        let hosts: Vec<Host> = state.hosts.values().filter(|h| !h.removed).cloned().collect();
        let active_and_recent_commands: Vec<Command> = state.commands.values().cloned().collect();
        let active_pipelines: Vec<Pipeline> =
            state.pipelines.values().filter(|p| p.status == PipelineStatus::Running).cloned().collect();
        let recent_events = state.recent_events(200).into_iter().cloned().collect();
        (
            FullState { hosts, active_and_recent_commands, active_pipelines, recent_events },
            state.version,
        )
    }

    /// Re-derives and persists a host's compartment snapshot against the
    /// current remote desired state, broadcasting the change.
    pub async fn refresh_compartments(&self, host: &Host) -> nf_core::CompartmentSnapshot {
        let remote = self.remote.current();
        let last = {
            let state = self.state.lock();
            infer_last_command_signal(&state, host)
        };
        let snapshot = crate::compartment::derive(host, self.dashboard_agent_version, remote.as_ref(), last);
        self.manager.update_compartments(&host.id, &snapshot, host.generation.clone());
        snapshot
    }

    pub fn broadcast_host(&self, host_id: &HostId) {
        let state = self.state.lock();
        let Some(host) = state.get_host(host_id).cloned() else { return };
        let version = state.version;
        drop(state);
        self.browsers.broadcast(nf_wire::Change::HostUpdated { host }, version);
    }
}

/// Which compartment signal a host's most recent terminal `switch`/`pull`
/// command implies, newest command wins.
fn infer_last_command_signal(state: &MaterializedState, host: &Host) -> crate::compartment::LastCommandSignal {
    use crate::compartment::LastCommandSignal;
    use nf_core::OpId;
    let mut candidates: Vec<&Command> = state
        .commands
        .values()
        .filter(|c| c.host_id == host.id && c.is_terminal() && matches!(c.op_id, OpId::Switch | OpId::Pull))
        .collect();
    candidates.sort_by(|a, b| b.created_at_epoch_ms.cmp(&a.created_at_epoch_ms));
    match candidates.first() {
        None => LastCommandSignal::None,
        Some(c) if c.op_id == OpId::Switch && c.status == CommandStatus::Success => {
            LastCommandSignal::SuccessfulSwitch
        }
        Some(c) if c.op_id == OpId::Switch => LastCommandSignal::FailedSwitch,
        Some(c) if c.op_id == OpId::Pull && c.status == CommandStatus::Success => {
            LastCommandSignal::SuccessfulPullChangedDesired
        }
        Some(_) => LastCommandSignal::None,
    }
}

async fn agent_ws(ws: WebSocketUpgrade, State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| agent_conn::run(socket, hub))
}

async fn browser_ws(ws: WebSocketUpgrade, State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| browser_conn::run(socket, hub))
}

/// Builds the complete router: both WebSocket upgrade routes plus the HTTP
/// API surface from §6.
pub fn build_router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/ws/agent", get(agent_ws))
        .route("/ws/browser", get(browser_ws))
        .route("/healthz", get(routes::healthz))
        .route("/api/version", get(routes::version))
        .route("/api/dispatch", post(routes::dispatch))
        .route("/api/dispatch/pipeline", post(routes::dispatch_pipeline))
        .route("/api/pipelines/{id}/cancel", post(routes::pipeline_cancel))
        .route("/api/ops", get(routes::list_ops))
        .route("/api/pipelines", get(routes::list_pipelines))
        .route("/api/events", get(routes::events))
        .route("/api/hosts", get(routes::list_hosts))
        .route("/api/hosts/{id}/events", get(routes::host_events))
        .route("/api/hosts/{id}/command", post(routes::host_command))
        .route("/api/hosts/{id}/kill", post(routes::host_kill))
        .route("/api/hosts/{id}/timeout-action", post(routes::host_timeout_action))
        .route("/api/hosts/{id}/refresh", post(routes::host_refresh))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(hub)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
