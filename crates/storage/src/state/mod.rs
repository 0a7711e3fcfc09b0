// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay.

mod commands;
mod events;
mod helpers;
mod hosts;
mod pipelines;

use std::collections::HashMap;

use nf_core::{
    AuditEntry, Command, CommandId, CommandStatus, Event, Host, HostId, Pipeline, PipelineId,
    StateVersion,
};
use serde::{Deserialize, Serialize};

/// How many [`AuditEntry`] rows the in-memory ring buffer keeps. Older
/// entries are still durable in the WAL; this bounds what a `full_state`
/// sync frame and `GET /api/events` serve without a limit.
const EVENT_LOG_CAPACITY: usize = 2_000;

/// Materialized state built from WAL replay.
///
/// Mutated only through [`MaterializedState::apply_event`] — nothing else
/// writes to these maps. See the idempotency requirement on that method.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub hosts: HashMap<HostId, Host>,
    pub commands: HashMap<CommandId, Command>,
    pub pipelines: HashMap<PipelineId, Pipeline>,
    #[serde(default)]
    pub events: std::collections::VecDeque<AuditEntry>,
    #[serde(default)]
    pub next_event_id: u64,
    #[serde(default)]
    pub version: StateVersion,
}

impl MaterializedState {
    pub fn get_host(&self, id: &HostId) -> Option<&Host> {
        self.hosts.get(id)
    }

    pub fn get_command(&self, id: &CommandId) -> Option<&Command> {
        self.commands.get(id)
    }

    pub fn get_pipeline(&self, id: &PipelineId) -> Option<&Pipeline> {
        self.pipelines.get(id)
    }

    /// Commands still in flight against a host, newest first.
    pub fn active_commands_for_host(&self, host_id: &HostId) -> Vec<&Command> {
        let mut cmds: Vec<&Command> =
            self.commands.values().filter(|c| &c.host_id == host_id && !c.is_terminal()).collect();
        cmds.sort_by(|a, b| b.created_at_epoch_ms.cmp(&a.created_at_epoch_ms));
        cmds
    }

    /// Recent audit log entries, newest first, bounded by `limit`.
    pub fn recent_events(&self, limit: usize) -> Vec<&AuditEntry> {
        self.events.iter().rev().take(limit).collect()
    }

    /// Recent audit log entries scoped to one host.
    pub fn recent_events_for_host(&self, host_id: &HostId, limit: usize) -> Vec<&AuditEntry> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.host_id.as_ref() == Some(host_id))
            .take(limit)
            .collect()
    }

    /// Apply an event to derive state changes.
    ///
    /// This is the event-sourcing approach where state is derived from
    /// events: events are facts about what happened, state is derived from
    /// those facts.
    ///
    /// # Idempotency Requirement
    ///
    /// **All event handlers MUST be idempotent.** Applying the same event
    /// twice must produce the same state as applying it once, since events
    /// may be applied both for immediate visibility and again during WAL
    /// replay after a crash.
    ///
    /// Guidelines for idempotent handlers:
    /// - Use assignment (`=`) instead of mutation (`+=`, `-=`).
    /// - Guard inserts with existence checks.
    /// - Upsert by key rather than push-and-hope.
    pub fn apply_event(&mut self, event: &Event) -> StateVersion {
        match event {
            Event::HostRegistered { .. }
            | Event::HostHeartbeat { .. }
            | Event::HostOffline { .. }
            | Event::HostRemoved { .. }
            | Event::HostConfigUpdated { .. }
            | Event::HostCompartmentsUpdated { .. } => hosts::apply(self, event),

            Event::CommandCreated { .. }
            | Event::CommandUpdated { .. }
            | Event::PendingCommandCleared { .. }
            | Event::CommandOrphaned { .. } => commands::apply(self, event),

            Event::PipelineCreated { .. } | Event::PipelineUpdated { .. } => {
                pipelines::apply(self, event)
            }

            Event::EventAppended { .. } => events::apply(self, event),
        }
        self.version = self.version.next();
        self.version
    }

    /// Drop terminal commands older than `now - max_age_ms`, excluding any
    /// a pipeline still references (a pipeline's report stays coherent for
    /// as long as the pipeline row itself is retained).
    pub fn cleanup_old_commands(&mut self, now_epoch_ms: u64, max_age_ms: u64) -> usize {
        let cutoff = now_epoch_ms.saturating_sub(max_age_ms);
        let before = self.commands.len();
        self.commands.retain(|_, cmd| {
            !cmd.is_terminal()
                || cmd.finished_at_epoch_ms.unwrap_or(cmd.created_at_epoch_ms) >= cutoff
        });
        before - self.commands.len()
    }

    /// Drop terminal pipelines older than `now - max_age_ms`.
    pub fn cleanup_old_pipelines(&mut self, now_epoch_ms: u64, max_age_ms: u64) -> usize {
        let cutoff = now_epoch_ms.saturating_sub(max_age_ms);
        let before = self.pipelines.len();
        self.pipelines.retain(|_, p| {
            !p.status.is_terminal() || p.finished_at_epoch_ms.unwrap_or(p.created_at_epoch_ms) >= cutoff
        });
        before - self.pipelines.len()
    }

    /// Drop audit entries older than `now - max_age_ms`.
    pub fn cleanup_old_events(&mut self, now_epoch_ms: u64, max_age_ms: u64) -> usize {
        let cutoff = now_epoch_ms.saturating_sub(max_age_ms);
        let before = self.events.len();
        self.events.retain(|e| e.timestamp_epoch_ms >= cutoff);
        before - self.events.len()
    }

    /// Transition every non-terminal command to a terminal `ORPHANED`
    /// sentinel and every online host back to offline. Run once on startup,
    /// before the WAL tail (if any) replays on top of a loaded snapshot.
    /// Idempotent: running it twice yields no further orphans.
    pub fn recover_orphaned(&mut self, now_epoch_ms: u64) -> Vec<CommandId> {
        let mut orphaned = Vec::new();
        for cmd in self.commands.values_mut() {
            if !cmd.is_terminal() {
                cmd.status = CommandStatus::Error;
                cmd.error_code = Some("ORPHANED".to_string());
                cmd.error_message = Some("dashboard restarted".to_string());
                cmd.finished_at_epoch_ms = Some(now_epoch_ms);
                orphaned.push(cmd.id);
            }
        }
        for host in self.hosts.values_mut() {
            host.status = nf_core::HostStatus::Offline;
            host.pending_command = None;
        }
        orphaned
    }
}

#[cfg(test)]
#[path = "../state_tests.rs"]
mod tests;
