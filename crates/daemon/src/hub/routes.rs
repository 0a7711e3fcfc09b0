// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP API handlers (§6): dispatch, the static catalogs, event/host reads,
//! and the per-host control actions (command, kill, timeout-action, refresh).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use nf_core::{Clock, HostId, HostStatus, OpId, OPS, PIPELINES};
use nf_wire::{
    DispatchRequest, DispatchResponse, ErrorBody, EventsQuery, EventsResponse, HealthResponse,
    HostCommandRequest, HostDispatchOutcome, HostsQuery, HostsResponse, OpCatalogEntry,
    PipelineCatalogEntry, PipelineDispatchRequest, PipelineDispatchResponse, TimeoutAction,
    TimeoutActionRequest, VersionResponse,
};

use crate::executor::PipelineRun;
use crate::HubState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

fn err(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (status, Json(ErrorBody { message: message.into() }))
}

pub async fn healthz(State(hub): State<Arc<HubState>>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", uptime_secs: hub.start_time.elapsed().as_secs() })
}

pub async fn version(State(hub): State<Arc<HubState>>) -> Json<VersionResponse> {
    Json(VersionResponse { version: hub.dashboard_agent_version })
}

pub async fn list_ops() -> Json<Vec<OpCatalogEntry>> {
    Json(
        OPS.iter()
            .map(|def| OpCatalogEntry {
                id: def.id,
                description: def.description,
                executor: def.executor,
                retryable: def.retryable,
                requires_totp: def.requires_totp,
            })
            .collect(),
    )
}

pub async fn list_pipelines() -> Json<Vec<PipelineCatalogEntry>> {
    Json(PIPELINES.iter().map(|def| PipelineCatalogEntry { id: def.id, ops: def.ops.to_vec() }).collect())
}

pub async fn events(State(hub): State<Arc<HubState>>, Query(q): Query<EventsQuery>) -> Json<EventsResponse> {
    let events = hub.state.lock().recent_events(q.limit).into_iter().cloned().collect();
    Json(EventsResponse { events })
}

pub async fn host_events(
    State(hub): State<Arc<HubState>>,
    Path(id): Path<String>,
    Query(q): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let host_id = HostId::new(id);
    let events = hub.state.lock().recent_events_for_host(&host_id, q.limit).into_iter().cloned().collect();
    Json(EventsResponse { events })
}

pub async fn list_hosts(State(hub): State<Arc<HubState>>, Query(q): Query<HostsQuery>) -> Json<HostsResponse> {
    let hosts = hub
        .state
        .lock()
        .hosts
        .values()
        .filter(|h| q.include_removed || !h.removed)
        .cloned()
        .collect();
    Json(HostsResponse { hosts })
}

/// Shared single-host dispatch path: refreshes compartments, pre-validates
/// against the freshly derived Git status, then dispatches on success.
#[allow(clippy::too_many_arguments)]
async fn dispatch_one(
    hub: &HubState,
    host_id: &HostId,
    op: OpId,
    force: bool,
    totp: Option<&str>,
    theme_color: Option<String>,
) -> HostDispatchOutcome {
    let Some(host) = hub.state.lock().get_host(host_id).cloned() else {
        return HostDispatchOutcome::Error { message: "unknown host".to_string() };
    };
    let snapshot = hub.refresh_compartments(&host).await;
    if let Err(e) = hub.manager.pre_validate(host_id, op, force, totp, &snapshot.git) {
        return HostDispatchOutcome::Blocked { code: e.code, message: e.message };
    }
    let output_file = hub.logs_path.join(format!("{host_id}.log")).display().to_string();
    match hub.manager.dispatch(host_id, op, None, output_file, theme_color) {
        Ok(command) => HostDispatchOutcome::Success { command },
        Err(e) => HostDispatchOutcome::Error { message: e.to_string() },
    }
}

pub async fn dispatch(State(hub): State<Arc<HubState>>, Json(req): Json<DispatchRequest>) -> Json<DispatchResponse> {
    let mut results = BTreeMap::new();
    for host_id in &req.hosts {
        let outcome =
            dispatch_one(&hub, host_id, req.op, req.force, req.totp.as_deref(), req.theme_color.clone()).await;
        results.insert(host_id.clone(), outcome);
    }
    Json(DispatchResponse { results })
}

pub async fn host_command(
    State(hub): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<HostCommandRequest>,
) -> ApiResult<HostDispatchOutcome> {
    let host_id = HostId::new(id);
    Ok(Json(dispatch_one(&hub, &host_id, req.op, req.force, req.totp.as_deref(), req.theme_color.clone()).await))
}

pub async fn dispatch_pipeline(
    State(hub): State<Arc<HubState>>,
    Json(req): Json<PipelineDispatchRequest>,
) -> Result<(StatusCode, Json<PipelineDispatchResponse>), (StatusCode, Json<ErrorBody>)> {
    {
        let state = hub.state.lock();
        for host_id in &req.hosts {
            let host = state.get_host(host_id).ok_or_else(|| err(StatusCode::BAD_REQUEST, format!("unknown host {host_id}")))?;
            if host.status != HostStatus::Online {
                return Err(err(StatusCode::CONFLICT, format!("{host_id} is not connected")));
            }
            if host.has_active_command() {
                return Err(err(StatusCode::CONFLICT, format!("{host_id} already has an active command")));
            }
        }
    }
    let run = Arc::new(PipelineRun::new(
        Arc::clone(&hub.state),
        hub.events.clone(),
        Arc::clone(&hub.manager),
        hub.browsers.clone(),
        hub.clock.clone(),
        hub.logs_path.clone(),
    ));
    let pipeline = run.new_pipeline(req.pipeline, req.hosts.clone(), hub.clock.epoch_ms());
    let pipeline_id = pipeline.id;
    hub.pipeline_cancels.lock().insert(pipeline_id, run.cancel_handle());

    let hub_for_cleanup = Arc::clone(&hub);
    tokio::spawn(async move {
        run.run(pipeline).await;
        hub_for_cleanup.pipeline_cancels.lock().remove(&pipeline_id);
    });

    Ok((StatusCode::ACCEPTED, Json(PipelineDispatchResponse { pipeline_id })))
}

pub async fn pipeline_cancel(
    State(hub): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let pipeline_id: nf_core::PipelineId =
        id.parse().map_err(|_| err(StatusCode::BAD_REQUEST, "malformed pipeline id"))?;
    let handle = hub
        .pipeline_cancels
        .lock()
        .get(&pipeline_id)
        .cloned()
        .ok_or_else(|| err(StatusCode::NOT_FOUND, "no running pipeline with that id"))?;
    handle.store(true, std::sync::atomic::Ordering::Relaxed);
    Ok(StatusCode::ACCEPTED)
}

const KILL_ESCALATE_AFTER: Duration = Duration::from_secs(4);

fn spawn_kill_escalation(hub: Arc<HubState>, command_id: nf_core::CommandId) {
    tokio::spawn(async move {
        tokio::time::sleep(KILL_ESCALATE_AFTER).await;
        hub.manager.kill_escalate(command_id);
    });
}

pub async fn host_kill(State(hub): State<Arc<HubState>>, Path(id): Path<String>) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let host_id = HostId::new(id);
    let command_id = {
        let state = hub.state.lock();
        let host = state.get_host(&host_id).ok_or_else(|| err(StatusCode::NOT_FOUND, "unknown host"))?;
        host.pending_command.ok_or_else(|| err(StatusCode::CONFLICT, "host has no active command"))?
    };
    hub.manager.kill(command_id);
    spawn_kill_escalation(Arc::clone(&hub), command_id);
    Ok(StatusCode::ACCEPTED)
}

pub async fn host_timeout_action(
    State(hub): State<Arc<HubState>>,
    Path(id): Path<String>,
    Json(req): Json<TimeoutActionRequest>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let host_id = HostId::new(id);
    let command_id = {
        let state = hub.state.lock();
        let host = state.get_host(&host_id).ok_or_else(|| err(StatusCode::NOT_FOUND, "unknown host"))?;
        host.pending_command.ok_or_else(|| err(StatusCode::CONFLICT, "host has no active command"))?
    };
    match req.action {
        TimeoutAction::Extend => hub.manager.timeout_action_extend(command_id),
        TimeoutAction::Kill => {
            hub.manager.kill(command_id);
            spawn_kill_escalation(Arc::clone(&hub), command_id);
        }
        TimeoutAction::Ignore => {}
    }
    Ok(StatusCode::ACCEPTED)
}

pub async fn host_refresh(State(hub): State<Arc<HubState>>, Path(id): Path<String>) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let host_id = HostId::new(id);
    let host = {
        let state = hub.state.lock();
        state.get_host(&host_id).cloned().ok_or_else(|| err(StatusCode::NOT_FOUND, "unknown host"))?
    };
    hub.remote.force_refresh();
    hub.refresh_compartments(&host).await;
    hub.broadcast_host(&host_id);
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
