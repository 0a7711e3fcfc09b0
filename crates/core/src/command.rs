// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Command row: a single dispatched op against one host and its state machine.

use serde::{Deserialize, Serialize};

use crate::catalog::OpId;
use crate::freshness::AgentFreshness;
use crate::ids::{CommandId, HostId, PipelineId};

/// A command's position in its state machine.
///
/// Terminal states (everything from `Success` onward) are immutable once
/// reached — nothing transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    Validating,
    Blocked,
    Executing,
    RunningWarning,
    AwaitingReconnect,
    TimeoutPending,
    Killing,
    Killed,
    Success,
    Error,
    Timeout,
    Partial,
    StaleBinary,
    Suspicious,
    Skipped,
}

crate::simple_display! {
    CommandStatus {
        Pending => "PENDING",
        Validating => "VALIDATING",
        Blocked => "BLOCKED",
        Executing => "EXECUTING",
        RunningWarning => "RUNNING_WARNING",
        AwaitingReconnect => "AWAITING_RECONNECT",
        TimeoutPending => "TIMEOUT_PENDING",
        Killing => "KILLING",
        Killed => "KILLED",
        Success => "SUCCESS",
        Error => "ERROR",
        Timeout => "TIMEOUT",
        Partial => "PARTIAL",
        StaleBinary => "STALE_BINARY",
        Suspicious => "SUSPICIOUS",
        Skipped => "SKIPPED",
    }
}

impl CommandStatus {
    /// True once the state machine will not leave this state on its own.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Killed
                | CommandStatus::Success
                | CommandStatus::Error
                | CommandStatus::Timeout
                | CommandStatus::Partial
                | CommandStatus::StaleBinary
                | CommandStatus::Suspicious
                | CommandStatus::Skipped
        )
    }
}

/// A pre-dispatch snapshot captured for switch-class ops, compared against
/// the post-reconnect state during three-layer freshness verification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreDispatchSnapshot {
    #[serde(default)]
    pub generation: String,
    #[serde(default)]
    pub agent_version: String,
    #[serde(default)]
    pub freshness: AgentFreshness,
}

/// A single dispatched op against one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub host_id: HostId,
    pub op_id: OpId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<PipelineId>,
    pub status: CommandStatus,

    pub created_at_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_at_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_deadline_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_deadline_epoch_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub output_file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_snapshot: Option<PreDispatchSnapshot>,
}

impl Command {
    pub fn new(
        host_id: HostId,
        op_id: OpId,
        pipeline_id: Option<PipelineId>,
        created_at_epoch_ms: u64,
        output_file: String,
    ) -> Self {
        Self {
            id: CommandId::new(),
            host_id,
            op_id,
            pipeline_id,
            status: CommandStatus::Pending,
            created_at_epoch_ms,
            started_at_epoch_ms: None,
            finished_at_epoch_ms: None,
            warning_at_epoch_ms: None,
            timeout_deadline_epoch_ms: None,
            reconnect_deadline_epoch_ms: None,
            exit_code: None,
            error_message: None,
            error_code: None,
            output_file,
            pre_snapshot: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
