// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent ↔ Control-plane WebSocket messages: `{type, payload}` JSON frames.

use nf_core::{AgentFreshness, CompartmentSnapshot, HostType, OpId};
use serde::{Deserialize, Serialize};

/// Frame sent by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum AgentMessage {
    /// First frame on every connection. Replaces any previous session for
    /// the same host.
    #[serde(rename = "register")]
    Register {
        hostname: String,
        host_type: HostType,
        agent_version: String,
        os_version: String,
        generation: String,
        lock_hash: String,
        #[serde(flatten)]
        freshness: AgentFreshness,
        #[serde(default)]
        repo_url: String,
        #[serde(default)]
        repo_dir: String,
        #[serde(default)]
        theme_color: String,
        #[serde(default)]
        location: String,
        #[serde(default)]
        device_type: String,
    },

    /// Periodic liveness + declarative-state update.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        generation: String,
        lock_hash: String,
        #[serde(default)]
        nixpkgs_version: String,
        #[serde(default)]
        metrics: serde_json::Map<String, serde_json::Value>,
        #[serde(flatten)]
        freshness: AgentFreshness,
        /// Informational only — the Lifecycle Manager remains the single
        /// writer of `pending_command`, this is never applied directly.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_reported_pending: Option<String>,
    },

    /// Streamed command output, appended to the per-host rolling log file.
    #[serde(rename = "output")]
    Output { op_id: OpId, chunk: String },

    /// Terminal exit for the currently dispatched command.
    #[serde(rename = "status")]
    Status {
        op_id: OpId,
        exit_code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The agent was asked to run a command but is still busy with another —
    /// informs the Lifecycle Manager so it can reconcile rather than leave
    /// the host "busy" forever.
    #[serde(rename = "command_rejected")]
    CommandRejected {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_current_op: Option<OpId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_pid: Option<u32>,
    },

    /// Ephemeral progress signal for a running `test` op.
    #[serde(rename = "test_progress")]
    TestProgress { op_id: OpId, message: String },

    /// Ephemeral progress signal for any running op. Logged only — does not
    /// mutate `pending_command` (see the Open Question this resolves).
    #[serde(rename = "operation_progress")]
    OperationProgress { op_id: OpId, message: String },
}

/// Frame sent by the control plane to an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerToAgentMessage {
    /// Acknowledges a `register` frame.
    #[serde(rename = "registered")]
    Registered { compartments: CompartmentSnapshot },

    /// Dispatches a single op.
    #[serde(rename = "command")]
    Command { op_id: OpId },

    /// Escalates a running op: SIGTERM on the first send, SIGKILL if the
    /// Lifecycle Manager sends it again after the kill-wait timer expires.
    #[serde(rename = "kill")]
    Kill { op_id: OpId, force: bool },
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
