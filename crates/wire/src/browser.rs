// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser ↔ Control-plane WebSocket messages: the State Sync Protocol.

use nf_core::{AuditEntry, Command, Host, Pipeline, StateVersion};
use serde::{Deserialize, Serialize};

/// A single full-state snapshot, used for both `init` and `full_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullState {
    pub hosts: Vec<Host>,
    pub active_and_recent_commands: Vec<Command>,
    pub active_pipelines: Vec<Pipeline>,
    pub recent_events: Vec<AuditEntry>,
}

/// One incremental change carried by a `delta` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change")]
pub enum Change {
    #[serde(rename = "host_added")]
    HostAdded { host: Host },
    #[serde(rename = "host_updated")]
    HostUpdated { host: Host },
    #[serde(rename = "host_removed")]
    HostRemoved { host_id: nf_core::HostId },
    #[serde(rename = "command_started")]
    CommandStarted { command: Command },
    #[serde(rename = "command_progress")]
    CommandProgress { command: Command },
    #[serde(rename = "command_finished")]
    CommandFinished { command: Command },
    #[serde(rename = "event")]
    Event { entry: AuditEntry },
}

/// Frame sent by the control plane to a browser client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerSyncMessage {
    /// Sent immediately on connect.
    #[serde(rename = "init")]
    Init { state: FullState, version: StateVersion },

    /// Sent on every state mutation. `version` is monotonically `prev + 1`.
    #[serde(rename = "delta")]
    Delta { change: Change, version: StateVersion },

    /// Sent every 30 s as a liveness + version-agreement check.
    #[serde(rename = "sync")]
    Sync { version: StateVersion },

    /// Sent in response to `get_state`, or proactively after a detected gap.
    #[serde(rename = "full_state")]
    FullState { state: FullState, version: StateVersion },
}

/// Frame sent by a browser client to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientSyncMessage {
    /// Requests an immediate `full_state` resync, e.g. after detecting a
    /// version gap in a `delta` or `sync` frame.
    #[serde(rename = "get_state")]
    GetState,
}

#[cfg(test)]
#[path = "browser_tests.rs"]
mod tests;
