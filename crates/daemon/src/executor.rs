// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Pipeline Executor: runs a pipeline template stage by stage across a
//! host set, awaiting every host's command completion through the Lifecycle
//! Manager's subscription channel rather than polling.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use nf_core::{
    pipeline_def, Clock, Command, CommandStatus, Event, HostId, OpId, Pipeline, PipelineDefId,
    PipelineId, PipelineStatus,
};
use nf_storage::MaterializedState;
use nf_wire::Change;
use parking_lot::Mutex;

use crate::event_bus::EventBus;
use crate::manager::{AgentSender, DeltaBroadcaster, LifecycleManager};

/// Runs one pipeline to completion. Exclusive per host: the caller must
/// have already verified no target host has a non-terminal command before
/// constructing and awaiting this.
pub struct PipelineRun<A, B, C> {
    state: Arc<Mutex<MaterializedState>>,
    events: EventBus,
    manager: Arc<LifecycleManager<A, B, C>>,
    broadcaster: B,
    clock: C,
    logs_path: PathBuf,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl<A: AgentSender + 'static, B: DeltaBroadcaster + Clone + 'static, C: Clock + 'static> PipelineRun<A, B, C> {
    pub fn new(
        state: Arc<Mutex<MaterializedState>>,
        events: EventBus,
        manager: Arc<LifecycleManager<A, B, C>>,
        broadcaster: B,
        clock: C,
        logs_path: PathBuf,
    ) -> Self {
        Self {
            state,
            events,
            manager,
            broadcaster,
            clock,
            logs_path,
            cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// A handle the HTTP cancel route can flip; checked between stages (not
    /// pre-emptively inside a stage — in-flight ops finish naturally).
    pub fn cancel_handle(&self) -> Arc<std::sync::atomic::AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Applies `event` and persists it, without publishing a browser delta.
    fn emit_silent(&self, event: Event) {
        self.state.lock().apply_event(&event);
        let _ = self.events.send(event);
    }

    /// Applies `event` and publishes `change` under the same state-lock
    /// acquisition that produced its version — see the matching helper on
    /// [`LifecycleManager`] for why this has to be one critical section.
    fn emit(&self, event: Event, change: Change) {
        {
            let mut state = self.state.lock();
            let version = state.apply_event(&event);
            self.broadcaster.broadcast(change, version);
        }
        let _ = self.events.send(event);
    }

    /// Builds the pipeline row and persists its creation, returning it
    /// immediately — callers that need the id before the run completes (the
    /// dispatch route's 202-Accepted response) call this synchronously, then
    /// hand the result to [`Self::run`].
    pub fn new_pipeline(&self, template: PipelineDefId, hosts: Vec<HostId>, created_at_epoch_ms: u64) -> Pipeline {
        let pipeline = Pipeline::new(template, hosts, created_at_epoch_ms);
        let entry = self.stage_log(&pipeline, "pipeline_started");
        self.emit(Event::PipelineCreated { pipeline: pipeline.clone() }, Change::Event { entry });
        pipeline
    }

    /// Drives `pipeline` (already created via [`Self::new_pipeline`]) stage
    /// by stage to a terminal [`PipelineStatus`], returning the final row.
    pub async fn run(&self, mut pipeline: Pipeline) -> Pipeline {
        let def = pipeline_def(pipeline.template);

        for (stage_index, op_id) in def.ops.iter().enumerate() {
            pipeline.current_stage = stage_index;
            self.emit_silent(Event::PipelineUpdated { pipeline: pipeline.clone() });

            let active = pipeline.active_hosts();
            if active.is_empty() {
                pipeline.status = PipelineStatus::Failed;
                break;
            }
            if self.cancelled.load(Ordering::Relaxed) {
                pipeline.status = PipelineStatus::Cancelled;
                for remaining_op in &def.ops[stage_index..] {
                    self.skip_host_ops(pipeline.id, &active, *remaining_op);
                }
                break;
            }

            // Hosts already dropped by an earlier stage's failure never get
            // dispatched again, but still get a SKIPPED row for this stage's
            // op so the pipeline's command history accounts for every host.
            if !pipeline.dropped_hosts.is_empty() {
                self.skip_host_ops(pipeline.id, &pipeline.dropped_hosts.clone(), *op_id);
            }

            let outcomes = self.run_stage(&active, *op_id, pipeline.id).await;
            for (host_id, succeeded) in outcomes {
                if !succeeded {
                    pipeline.dropped_hosts.push(host_id);
                }
            }

            if pipeline.active_hosts().is_empty() {
                pipeline.status = PipelineStatus::Failed;
                break;
            }
        }

        if pipeline.status == PipelineStatus::Running {
            pipeline.status =
                if pipeline.dropped_hosts.is_empty() { PipelineStatus::Complete } else { PipelineStatus::Partial };
        }
        pipeline.finished_at_epoch_ms = Some(self.clock.epoch_ms());
        let entry = self.stage_log(&pipeline, "pipeline_finished");
        self.emit(Event::PipelineUpdated { pipeline: pipeline.clone() }, Change::Event { entry });
        pipeline
    }

    /// Synthesizes a terminal `SKIPPED` command row for `op_id` against
    /// every host in `hosts`, for hosts that will never have it dispatched —
    /// already dropped by an earlier stage's failure, or still active when
    /// the pipeline was cancelled. Keeps the command history complete
    /// instead of silently omitting these hosts from stages they never ran.
    fn skip_host_ops(&self, pipeline_id: PipelineId, hosts: &[HostId], op_id: OpId) {
        let now = self.clock.epoch_ms();
        for host_id in hosts {
            let mut command = Command::new(host_id.clone(), op_id, Some(pipeline_id), now, String::new());
            command.status = CommandStatus::Skipped;
            command.started_at_epoch_ms = Some(now);
            command.finished_at_epoch_ms = Some(now);
            self.emit_silent(Event::CommandCreated { command: command.clone() });
            self.emit(Event::CommandUpdated { command: command.clone() }, Change::CommandFinished { command });
        }
    }

    /// Dispatches `op_id` to every host in `active` in parallel (each
    /// dispatch is independent — one host's send failure doesn't block
    /// another's) and waits for all of them to reach a terminal state via
    /// independently spawned completion waiters, not a sequential loop. A
    /// host whose command didn't resolve to `SUCCESS` is reported as failed
    /// (dropped from the active set by the caller).
    async fn run_stage(&self, active: &[HostId], op_id: nf_core::OpId, pipeline_id: PipelineId) -> Vec<(HostId, bool)> {
        let dispatches: Vec<_> = active
            .iter()
            .filter_map(|host_id| {
                let output_file = self.logs_path.join(format!("{host_id}.log")).display().to_string();
                self.manager
                    .dispatch(host_id, op_id, Some(pipeline_id), output_file, None)
                    .ok()
                    .map(|cmd| (host_id.clone(), cmd.id))
            })
            .collect();

        let handles: Vec<_> = dispatches
            .into_iter()
            .map(|(host_id, command_id)| {
                let manager = Arc::clone(&self.manager);
                tokio::spawn(async move {
                    let succeeded = manager
                        .await_completion(command_id)
                        .await
                        .map(|c| c.status == CommandStatus::Success)
                        .unwrap_or(false);
                    (host_id, succeeded)
                })
            })
            .collect();

        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => out.push(result),
                Err(_) => continue,
            }
        }
        out
    }

    fn stage_log(&self, pipeline: &Pipeline, action: &str) -> nf_core::AuditEntry {
        nf_core::AuditEntry {
            id: 0,
            timestamp_epoch_ms: self.clock.epoch_ms(),
            category: nf_core::EventCategory::Ops,
            level: nf_core::EventLevel::Info,
            actor: "pipeline-executor".to_string(),
            host_id: None,
            action: action.to_string(),
            message: format!("{} ({:?}) stage {}", pipeline.template, pipeline.status, pipeline.current_stage),
            details: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
