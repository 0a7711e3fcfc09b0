// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Lifecycle Manager: the single writer of `pending_command` and the
//! authority over every command's state machine.
//!
//! Every other component — the heartbeat handler, stale-cleanup, the HTTP
//! API — may only *read* `pending_command` or *ask* the manager to change
//! it. Mutations always flow through one of the methods below, each of
//! which emits the owning [`Event`] rather than touching state directly.

use std::collections::HashMap;
use std::sync::Arc;

use nf_core::{
    compare_freshness, op_def, AgentFreshness, Clock, Command, CommandId, CommandStatus,
    CompartmentSnapshot, CompartmentStatus, Event, EventCategory, EventLevel, HostId, HostStatus,
    OpId, PipelineId, PostCompletionModel, PreDispatchSnapshot, StateVersion, ValidationCode,
    ValidationError,
};
use nf_storage::MaterializedState;
use nf_wire::Change;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::event_bus::EventBus;

/// Narrow interface for getting a command payload to an agent's WebSocket
/// connection, satisfied by the Connection Hub's client registry. Kept
/// separate from the Hub itself so the manager never has to know about
/// connection bookkeeping.
pub trait AgentSender: Send + Sync {
    /// Attempts to send `op_id` to `host_id`. Returns `false` if the host
    /// has no live connection (the manager transitions the command to
    /// `ERROR{send_failed}` in that case).
    fn send_command(&self, host_id: &HostId, op_id: OpId) -> bool;

    /// Best-effort: sends a kill frame for `op_id` to `host_id`, `force`
    /// selecting SIGTERM (`false`) vs. SIGKILL (`true`). No return value —
    /// the kill path's ack or timeout decides the outcome.
    fn send_kill(&self, host_id: &HostId, op_id: OpId, force: bool);
}

/// Narrow interface for publishing a state-sync delta to connected browsers.
///
/// `version` must be the exact [`StateVersion`] the event producing `change`
/// applied to — callers capture it under the same state-lock acquisition
/// that ran `apply_event`, so the version tagged on the wire can never lag
/// or race a concurrent mutation.
pub trait DeltaBroadcaster: Send + Sync {
    fn broadcast(&self, change: Change, version: StateVersion);
}

impl<T: AgentSender + ?Sized> AgentSender for Arc<T> {
    fn send_command(&self, host_id: &HostId, op_id: OpId) -> bool {
        (**self).send_command(host_id, op_id)
    }

    fn send_kill(&self, host_id: &HostId, op_id: OpId, force: bool) {
        (**self).send_kill(host_id, op_id, force)
    }
}

impl<T: DeltaBroadcaster + ?Sized> DeltaBroadcaster for Arc<T> {
    fn broadcast(&self, change: Change, version: StateVersion) {
        (**self).broadcast(change, version)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("unknown host {0}")]
    UnknownHost(HostId),
    #[error("unknown command {0}")]
    UnknownCommand(CommandId),
}

/// Owns every command and pipeline transition. One instance, shared behind
/// an `Arc`, wired into the Hub's WebSocket and HTTP handlers.
pub struct LifecycleManager<A, B, C> {
    state: Arc<Mutex<MaterializedState>>,
    events: EventBus,
    agents: A,
    broadcaster: B,
    clock: C,
    completion_waiters: Mutex<HashMap<CommandId, Vec<oneshot::Sender<Command>>>>,
}

impl<A: AgentSender, B: DeltaBroadcaster, C: Clock> LifecycleManager<A, B, C> {
    pub fn new(state: Arc<Mutex<MaterializedState>>, events: EventBus, agents: A, broadcaster: B, clock: C) -> Self {
        Self { state, events, agents, broadcaster, clock, completion_waiters: Mutex::new(HashMap::new()) }
    }

    /// Resolves once `command_id` reaches a terminal status, used by the
    /// Pipeline Executor to await every host's command in a stage without
    /// polling. Returns immediately if the command is already terminal.
    pub async fn await_completion(&self, command_id: CommandId) -> Option<Command> {
        if let Some(command) = self.command(command_id) {
            if command.is_terminal() {
                return Some(command);
            }
        } else {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.completion_waiters.lock().entry(command_id).or_default().push(tx);
        // A finish() may have landed between the terminal re-check above and
        // registering the waiter; re-check once more before awaiting.
        if let Some(command) = self.command(command_id) {
            if command.is_terminal() {
                self.completion_waiters.lock().remove(&command_id);
                return Some(command);
            }
        }
        rx.await.ok()
    }

    /// Applies `event` and persists it to the WAL, without publishing a
    /// browser delta.
    fn emit_silent(&self, event: Event) {
        self.state.lock().apply_event(&event);
        if let Err(e) = self.events.send(event) {
            warn!("failed to persist event to WAL: {e}");
        }
    }

    /// Applies `event` and publishes `change` to browsers, the version bump
    /// and the broadcast enqueue happening under one continuous state-lock
    /// acquisition so two concurrent emits can never tag their deltas with
    /// equal or out-of-order versions.
    fn emit(&self, event: Event, change: Change) {
        {
            let mut state = self.state.lock();
            let version = state.apply_event(&event);
            self.broadcaster.broadcast(change, version);
        }
        if let Err(e) = self.events.send(event) {
            warn!("failed to persist event to WAL: {e}");
        }
    }

    /// Like [`Self::emit`], but the delta is the freshly updated `host_id`
    /// row itself rather than a value already in hand — used by handlers
    /// (e.g. `set-color`) that mutate a host field and need to broadcast
    /// the host as it reads back from the just-applied event.
    fn emit_host_updated(&self, event: Event, host_id: &HostId) {
        {
            let mut state = self.state.lock();
            let version = state.apply_event(&event);
            if let Some(host) = state.get_host(host_id).cloned() {
                self.broadcaster.broadcast(Change::HostUpdated { host }, version);
            }
        }
        if let Err(e) = self.events.send(event) {
            warn!("failed to persist event to WAL: {e}");
        }
    }

    fn log(&self, category: EventCategory, level: EventLevel, host_id: Option<HostId>, action: &str, message: impl Into<String>) {
        self.emit_silent(Event::EventAppended {
            entry: nf_core::AuditEntry {
                id: 0,
                timestamp_epoch_ms: self.clock.epoch_ms(),
                category,
                level,
                actor: "lifecycle-manager".to_string(),
                host_id,
                action: action.to_string(),
                message: message.into(),
                details: serde_json::Value::Null,
            },
        });
    }

    /// §4.4.2 — base + op-specific pre-validation. No state mutation occurs
    /// on either branch: a `ValidationError` means no command row is created.
    ///
    /// `git_status` is the host's current Git compartment as just derived by
    /// the caller (the compartment deriver needs the Remote Desired State
    /// Source, which this type deliberately has no dependency on).
    pub fn pre_validate(
        &self,
        host_id: &HostId,
        op_id: OpId,
        force: bool,
        totp: Option<&str>,
        git_status: &CompartmentStatus,
    ) -> Result<(), ValidationError> {
        let state = self.state.lock();
        let host = state
            .get_host(host_id)
            .ok_or_else(|| ValidationError::new(ValidationCode::HostOffline, "unknown host"))?;

        if host.status != HostStatus::Online {
            return Err(ValidationError::new(ValidationCode::HostOffline, "host is not connected"));
        }
        if host.has_active_command() {
            return Err(ValidationError::new(ValidationCode::CommandActive, "host already has an active command"));
        }

        let def = op_def(op_id);
        if def.requires_totp {
            match totp {
                None => return Err(ValidationError::new(ValidationCode::TotpRequired, "this op requires a TOTP code")),
                Some(code) if !self.totp_valid(code) => {
                    return Err(ValidationError::new(ValidationCode::TotpInvalid, "invalid TOTP code"))
                }
                Some(_) => {}
            }
        }

        match op_id {
            OpId::Pull if git_status.is_ok() => {
                return Err(ValidationError::new(ValidationCode::AlreadyCurrent, "already up to date"));
            }
            OpId::Switch if !force && !git_status.is_ok() => {
                return Err(ValidationError::new(ValidationCode::GitOutdated, "pull before switching, or pass force"));
            }
            _ => {}
        }

        Ok(())
    }

    fn totp_valid(&self, code: &str) -> bool {
        match crate::env::totp_secret() {
            Some(secret) => code == secret,
            None => false,
        }
    }

    /// §4.4.3 — dispatch. Caller must have already called [`Self::pre_validate`].
    ///
    /// `theme_color` is only consulted by `set-color`; every other op ignores it.
    pub fn dispatch(
        &self,
        host_id: &HostId,
        op_id: OpId,
        pipeline_id: Option<PipelineId>,
        output_file: String,
        theme_color: Option<String>,
    ) -> Result<Command, ManagerError> {
        let now = self.clock.epoch_ms();
        let def = op_def(op_id);

        let pre_snapshot = {
            let state = self.state.lock();
            let host = state.get_host(host_id).ok_or_else(|| ManagerError::UnknownHost(host_id.clone()))?;
            PreDispatchSnapshot {
                generation: host.generation.clone(),
                agent_version: host.agent_version.clone(),
                freshness: host.freshness.clone(),
            }
        };

        let mut command = Command::new(host_id.clone(), op_id, pipeline_id, now, output_file);
        command.status = CommandStatus::Executing;
        command.started_at_epoch_ms = Some(now);
        command.warning_at_epoch_ms = Some(now + def.warning_timeout.as_millis() as u64);
        command.timeout_deadline_epoch_ms = Some(now + def.hard_timeout.as_millis() as u64);
        command.pre_snapshot = Some(pre_snapshot);

        self.emit(Event::CommandCreated { command: command.clone() }, Change::CommandStarted { command: command.clone() });

        match def.executor {
            nf_core::Executor::Agent => {
                if !self.agents.send_command(host_id, op_id) {
                    command.status = CommandStatus::Error;
                    command.error_code = Some("send_failed".to_string());
                    command.error_message = Some("agent connection unavailable".to_string());
                    command.finished_at_epoch_ms = Some(now);
                    self.finish(command.clone(), host_id);
                    self.log(EventCategory::Error, EventLevel::Error, Some(host_id.clone()), "dispatch", "send_failed");
                }
            }
            nf_core::Executor::Dashboard => {
                self.run_dashboard_op(host_id, op_id, theme_color, &mut command, now);
                self.finish(command.clone(), host_id);
            }
        }

        Ok(command)
    }

    /// Dashboard-executor ops (`remove`, `set-color`, `merge-pr`) run
    /// entirely in-process and never touch the agent connection — `dispatch`
    /// calls this synchronously and finishes the command inline rather than
    /// waiting on a `status` frame that will never arrive.
    fn run_dashboard_op(&self, host_id: &HostId, op_id: OpId, theme_color: Option<String>, command: &mut Command, now: u64) {
        match op_id {
            OpId::Remove => {
                self.emit(
                    Event::HostRemoved { host_id: host_id.clone() },
                    Change::HostRemoved { host_id: host_id.clone() },
                );
            }
            OpId::SetColor => {
                self.emit_host_updated(
                    Event::HostConfigUpdated {
                        host_id: host_id.clone(),
                        theme_color,
                        location: None,
                        device_type: None,
                        repo_url: None,
                        repo_dir: None,
                    },
                    host_id,
                );
            }
            OpId::MergePr => {
                // No external PR system is wired up here; the side effect is
                // a no-op and the command resolves SUCCESS immediately.
            }
            other => {
                warn!(%host_id, op = %other, "dashboard-executor op has no in-process handler, treating as a no-op");
            }
        }
        command.status = CommandStatus::Success;
        command.finished_at_epoch_ms = Some(now);
    }

    /// §4.4.6 — completion branching on an agent `status` frame.
    pub fn handle_status(&self, host_id: &HostId, op_id: OpId, exit_code: i32, message: Option<String>) {
        let Some(mut command) = self.active_command(host_id, op_id) else {
            warn!(%host_id, %op_id, "status for host with no matching active command, ignoring");
            return;
        };
        let def = op_def(op_id);
        let now = self.clock.epoch_ms();
        command.exit_code = Some(exit_code);

        match def.post_completion {
            PostCompletionModel::Immediate => {
                command.status = if exit_code == 0 { CommandStatus::Success } else { CommandStatus::Error };
                if exit_code != 0 {
                    command.error_code = Some("exec_failed".to_string());
                    command.error_message = message;
                }
                command.finished_at_epoch_ms = Some(now);
                self.finish(command, host_id);
            }
            PostCompletionModel::DeferredHeartbeat => {
                if exit_code != 0 {
                    command.status = CommandStatus::Error;
                    command.error_code = Some("exec_failed".to_string());
                    command.error_message = message;
                    command.finished_at_epoch_ms = Some(now);
                    self.finish(command, host_id);
                } else {
                    // Stays EXECUTING; resolved by handle_heartbeat once the
                    // post-snapshot is fresh for this command's generation.
                    self.emit(Event::CommandUpdated { command: command.clone() }, Change::CommandProgress { command });
                }
            }
            PostCompletionModel::Reconnect => {
                if exit_code == 0 {
                    command.status = CommandStatus::AwaitingReconnect;
                    command.reconnect_deadline_epoch_ms =
                        def.reconnect_timeout.map(|d| now + d.as_millis() as u64);
                    // pending_command deliberately stays set: stale-cleanup
                    // must not clear it while awaiting reconnect.
                    self.emit(Event::CommandUpdated { command: command.clone() }, Change::CommandProgress { command });
                } else {
                    command.status = CommandStatus::Error;
                    command.error_code = Some("exec_failed".to_string());
                    command.error_message = message;
                    command.finished_at_epoch_ms = Some(now);
                    self.finish(command, host_id);
                }
            }
        }
    }

    /// §4.4.7 — three-layer freshness verification on reconnect while the
    /// host has a command in `AWAITING_RECONNECT`.
    pub fn handle_reconnect(&self, host_id: &HostId, after: &AgentFreshness) {
        let Some(mut command) = self.find_awaiting_reconnect(host_id) else { return };
        let before = command.pre_snapshot.as_ref().map(|s| s.freshness.clone()).unwrap_or_default();
        let now = self.clock.epoch_ms();

        let verdict = compare_freshness(&before, after);
        use nf_core::FreshnessVerdict::*;
        match verdict {
            Fresh | Insufficient => command.status = CommandStatus::Success,
            Suspicious => command.status = CommandStatus::Suspicious,
            Stale => {
                command.status = CommandStatus::StaleBinary;
                command.error_code = Some("stale_binary".to_string());
                command.error_message =
                    Some("switch did not take effect; clear the nix store cache and retry".to_string());
            }
        }
        command.finished_at_epoch_ms = Some(now);
        self.finish(command, host_id);
    }

    /// A connection drop found an EXECUTING reconnect-class command (a
    /// `switch`-like op whose `status` frame never arrived before the
    /// socket closed). Preserves it as `AWAITING_RECONNECT` with a fresh
    /// reconnect deadline instead of leaving it stuck `EXECUTING` until the
    /// hard timeout — the next `register` resolves it through
    /// [`Self::handle_reconnect`] exactly as it would a command that
    /// completed normally moments before the drop. A no-op for any other
    /// op or command state.
    pub fn handle_disconnect(&self, host_id: &HostId) {
        let Some(mut command) = self.active_command_any(host_id) else { return };
        if !matches!(command.status, CommandStatus::Executing | CommandStatus::RunningWarning) {
            return;
        }
        let def = op_def(command.op_id);
        if def.post_completion != PostCompletionModel::Reconnect {
            return;
        }
        let now = self.clock.epoch_ms();
        command.status = CommandStatus::AwaitingReconnect;
        command.reconnect_deadline_epoch_ms = def.reconnect_timeout.map(|d| now + d.as_millis() as u64);
        self.emit(Event::CommandUpdated { command: command.clone() }, Change::CommandProgress { command });
    }

    /// Resolves a `DeferredHeartbeat` command (currently only `test`) once a
    /// heartbeat reports a `tests_status` fresh for the host's current
    /// generation. A no-op if there's no such command in flight, or the
    /// heartbeat's test result is still for a stale generation.
    pub fn handle_heartbeat_test_result(&self, host_id: &HostId) {
        let Some(mut command) = self.active_command_any(host_id) else { return };
        if command.status != CommandStatus::Executing {
            return;
        }
        let def = op_def(command.op_id);
        if def.post_completion != PostCompletionModel::DeferredHeartbeat {
            return;
        }
        let outcome = {
            let state = self.state.lock();
            let Some(host) = state.get_host(host_id) else { return };
            if host.tests_generation != host.generation {
                return;
            }
            host.tests_status.as_ref().map(|s| s.is_ok())
        };
        let Some(is_ok) = outcome else { return };

        command.status = if is_ok { CommandStatus::Success } else { CommandStatus::Error };
        if !is_ok {
            command.error_code = Some("exec_failed".to_string());
            command.error_message = Some("tests failed".to_string());
        }
        command.finished_at_epoch_ms = Some(self.clock.epoch_ms());
        self.finish(command, host_id);
    }

    /// A reconnect deadline expired before the agent returned.
    pub fn handle_reconnect_timeout(&self, command_id: CommandId) {
        let Some(mut command) = self.command(command_id) else { return };
        if command.status != CommandStatus::AwaitingReconnect {
            return;
        }
        command.status = CommandStatus::Timeout;
        command.finished_at_epoch_ms = Some(self.clock.epoch_ms());
        let host_id = command.host_id.clone();
        self.finish(command, &host_id);
    }

    /// §4.4.8 — the agent replied `command_rejected`.
    pub fn handle_rejected(&self, host_id: &HostId, reason: &str, agent_current_op: Option<OpId>, agent_pid: Option<u32>) {
        let Some(mut command) = self.active_command_any(host_id) else { return };
        command.status = CommandStatus::Error;
        command.error_code = Some("agent_busy".to_string());
        command.error_message = Some(reason.to_string());
        command.finished_at_epoch_ms = Some(self.clock.epoch_ms());
        self.finish(command, host_id);
        self.log(
            EventCategory::Command,
            EventLevel::Warn,
            Some(host_id.clone()),
            "command_rejected",
            format!("agent reports current_op={agent_current_op:?} pid={agent_pid:?}: {reason}"),
        );
    }

    /// §4.4.4 — periodic timeout scan. Called from a 10s tick loop.
    pub fn timeout_tick(&self) {
        let now = self.clock.epoch_ms();
        let due: Vec<Command> = {
            let state = self.state.lock();
            state
                .commands
                .values()
                .filter(|c| matches!(c.status, CommandStatus::Executing | CommandStatus::RunningWarning))
                .cloned()
                .collect()
        };
        for mut command in due {
            if matches!(command.status, CommandStatus::Executing)
                && command.warning_at_epoch_ms.is_some_and(|t| now >= t)
            {
                command.status = CommandStatus::RunningWarning;
                self.emit(Event::CommandUpdated { command: command.clone() }, Change::CommandProgress { command: command.clone() });
            }
            if command.timeout_deadline_epoch_ms.is_some_and(|t| now >= t) {
                command.status = CommandStatus::TimeoutPending;
                self.emit(Event::CommandUpdated { command: command.clone() }, Change::CommandProgress { command });
            }
        }
    }

    /// From `TIMEOUT_PENDING`: extend restarts the watcher; kill escalates.
    pub fn timeout_action_extend(&self, command_id: CommandId) {
        let Some(mut command) = self.command(command_id) else { return };
        if command.status != CommandStatus::TimeoutPending {
            return;
        }
        let def = op_def(command.op_id);
        let now = self.clock.epoch_ms();
        command.status = CommandStatus::RunningWarning;
        command.timeout_deadline_epoch_ms = Some(now + def.hard_timeout.as_millis() as u64);
        self.emit(Event::CommandUpdated { command: command.clone() }, Change::CommandProgress { command });
    }

    /// §4.4.5 — kill path. Sends SIGTERM (`force: false`); the caller is
    /// responsible for scheduling the 3-5s escalation timer and calling
    /// [`Self::kill_escalate`] if the command hasn't reached a terminal
    /// state by then.
    pub fn kill(&self, command_id: CommandId) {
        let Some(mut command) = self.command(command_id) else { return };
        command.status = CommandStatus::Killing;
        self.emit(Event::CommandUpdated { command: command.clone() }, Change::CommandProgress { command: command.clone() });
        self.agents.send_kill(&command.host_id, command.op_id, false);
    }

    /// Re-sends the kill frame with `force: true` (SIGKILL). A no-op unless
    /// the command is still `KILLING` — already-resolved kills don't escalate.
    pub fn kill_escalate(&self, command_id: CommandId) {
        let Some(command) = self.command(command_id) else { return };
        if command.status != CommandStatus::Killing {
            return;
        }
        self.agents.send_kill(&command.host_id, command.op_id, true);
    }

    pub fn handle_kill_ack(&self, command_id: CommandId, died: bool) {
        let Some(mut command) = self.command(command_id) else { return };
        if command.status != CommandStatus::Killing {
            return;
        }
        command.status = if died { CommandStatus::Killed } else { CommandStatus::Error };
        if !died {
            command.error_code = Some("kill_failed".to_string());
        }
        command.finished_at_epoch_ms = Some(self.clock.epoch_ms());
        let host_id = command.host_id.clone();
        self.finish(command, &host_id);
    }

    /// §4.4.9 — orphan cleanup: three conditions all required.
    pub fn orphan_cleanup_tick(&self, heartbeat_interval_ms: u64, miss_multiplier: u32, connected: &dyn Fn(&HostId) -> bool) {
        let now = self.clock.epoch_ms();
        let threshold = heartbeat_interval_ms * miss_multiplier as u64;
        let stale_hosts: Vec<HostId> = {
            let state = self.state.lock();
            state
                .hosts
                .values()
                .filter(|h| {
                    h.status == HostStatus::Online
                        && now.saturating_sub(h.last_seen_epoch_ms) > threshold
                        && !connected(&h.id)
                        && state.active_commands_for_host(&h.id).is_empty()
                })
                .map(|h| h.id.clone())
                .collect()
        };
        for host_id in stale_hosts {
            self.emit_silent(Event::HostOffline { host_id: host_id.clone() });
            self.log(
                EventCategory::System,
                EventLevel::Warn,
                Some(host_id.clone()),
                "orphan_cleanup",
                "host missed too many heartbeats, marked offline",
            );
        }
    }

    /// Compartment refresh persisted after a heartbeat or an explicit
    /// `POST /api/hosts/{id}/refresh`.
    pub fn update_compartments(&self, host_id: &HostId, snapshot: &CompartmentSnapshot, generation: String) {
        self.emit_silent(Event::HostCompartmentsUpdated {
            host_id: host_id.clone(),
            lock_status: snapshot.lock.clone(),
            system_status: snapshot.system.clone(),
            tests_status: snapshot.tests.clone(),
            tests_generation: generation,
        });
    }

    fn finish(&self, command: Command, host_id: &HostId) {
        self.emit_silent(Event::CommandUpdated { command: command.clone() });
        self.emit(
            Event::PendingCommandCleared { host_id: host_id.clone(), command_id: command.id },
            Change::CommandFinished { command: command.clone() },
        );
        if let Some(waiters) = self.completion_waiters.lock().remove(&command.id) {
            for tx in waiters {
                let _ = tx.send(command.clone());
            }
        }
        info!(%host_id, op = %command.op_id, status = %command.status, "command finished");
    }

    fn command(&self, id: CommandId) -> Option<Command> {
        self.state.lock().get_command(&id).cloned()
    }

    fn active_command(&self, host_id: &HostId, op_id: OpId) -> Option<Command> {
        self.state
            .lock()
            .active_commands_for_host(host_id)
            .into_iter()
            .find(|c| c.op_id == op_id)
            .cloned()
    }

    fn active_command_any(&self, host_id: &HostId) -> Option<Command> {
        self.state.lock().active_commands_for_host(host_id).into_iter().next().cloned()
    }

    fn find_awaiting_reconnect(&self, host_id: &HostId) -> Option<Command> {
        self.state
            .lock()
            .active_commands_for_host(host_id)
            .into_iter()
            .find(|c| c.status == CommandStatus::AwaitingReconnect)
            .cloned()
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
