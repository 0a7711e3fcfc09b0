// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event-sourcing `Event` enum: every mutation that can be folded into a
//! `MaterializedState`. One variant per logically atomic change named in
//! §4.1's State Store contract.
//!
//! All event handlers that fold these into state MUST be idempotent — replaying
//! the same WAL twice (crash recovery, snapshot-then-replay) must yield the
//! same state. Concretely: upserts replace by key rather than accumulate,
//! and inserts that must only happen once guard with an existence check.

use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::command::Command;
use crate::freshness::AgentFreshness;
use crate::host::{Host, HostType};
use crate::ids::{CommandId, HostId};
use crate::pipeline::Pipeline;

/// Mutations folded into [`crate::MaterializedState`] (re-exported here so
/// downstream crates don't need a direct `nf-storage` dependency just to
/// construct or pattern-match on events).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// First-seen registration: inserts a fresh [`Host`] row. Idempotent
    /// because the handler only fills identity/declared-state fields and
    /// preserves any existing human-configured fields by merging rather
    /// than overwriting wholesale.
    #[serde(rename = "host:registered")]
    HostRegistered { host_id: HostId, host_type: HostType, agent_version: String, os_version: String },

    /// Heartbeat liveness + declarative-state update. Never touches
    /// `pending_command`.
    #[serde(rename = "host:heartbeat")]
    HostHeartbeat {
        host_id: HostId,
        timestamp_epoch_ms: u64,
        generation: String,
        lock_hash: String,
        nixpkgs_version: String,
        freshness: AgentFreshness,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        metrics: serde_json::Map<String, serde_json::Value>,
    },

    /// Orphan cleanup or explicit disconnect: flips a host to offline without
    /// touching its declared state.
    #[serde(rename = "host:offline")]
    HostOffline { host_id: HostId },

    /// Soft-delete: marks a host invisible to default list/status queries.
    #[serde(rename = "host:removed")]
    HostRemoved { host_id: HostId },

    /// Human-configured field update (theme color, location, device type,
    /// and the repo coordinates a freshly registered host first reports).
    #[serde(rename = "host:config_updated")]
    HostConfigUpdated {
        host_id: HostId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        theme_color: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo_dir: Option<String>,
    },

    /// Refreshed compartment cache, computed by the (pure) Compartment Deriver
    /// and persisted by the Hub after a heartbeat or an explicit refresh.
    #[serde(rename = "host:compartments_updated")]
    HostCompartmentsUpdated {
        host_id: HostId,
        lock_status: crate::compartment::CompartmentStatus,
        system_status: crate::compartment::CompartmentStatus,
        tests_status: crate::compartment::CompartmentStatus,
        tests_generation: String,
    },

    /// The Lifecycle Manager creates a command row and, in the same atomic
    /// mutation, sets the host's `pending_command`.
    #[serde(rename = "command:created")]
    CommandCreated { command: Command },

    /// Any state-machine transition on an existing command. Idempotent
    /// because it replaces the row wholesale, keyed by `command.id`.
    #[serde(rename = "command:updated")]
    CommandUpdated { command: Command },

    /// Clears a host's `pending_command`. Only ever emitted by the Lifecycle
    /// Manager, after the owning command has reached a terminal state (or,
    /// for reconnect-class ops, is known to remain owned through
    /// `AWAITING_RECONNECT`).
    #[serde(rename = "command:pending_cleared")]
    PendingCommandCleared { host_id: HostId, command_id: CommandId },

    #[serde(rename = "pipeline:created")]
    PipelineCreated { pipeline: Pipeline },

    #[serde(rename = "pipeline:updated")]
    PipelineUpdated { pipeline: Pipeline },

    /// Appends one row to the audit/event log. `entry.id` is assigned by the
    /// store at append time, before the event is written to the WAL, so
    /// replay never re-assigns or collides IDs.
    #[serde(rename = "event:appended")]
    EventAppended { entry: AuditEntry },

    /// Restart recovery: a non-terminal command outlived its owning process.
    /// Folds as a `CommandUpdated`-shaped transition plus `HostOffline`,
    /// but is kept distinct so replay and tests can identify orphan-recovery
    /// events without inspecting the command's new status.
    #[serde(rename = "command:orphaned")]
    CommandOrphaned { command: Command },
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
