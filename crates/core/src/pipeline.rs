// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Pipeline row: an ordered-op run across a host set.

use serde::{Deserialize, Serialize};

use crate::catalog::PipelineDefId;
use crate::ids::{HostId, PipelineId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Running,
    Complete,
    Partial,
    Failed,
    Cancelled,
}

crate::simple_display! {
    PipelineStatus {
        Running => "RUNNING",
        Complete => "COMPLETE",
        Partial => "PARTIAL",
        Failed => "FAILED",
        Cancelled => "CANCELLED",
    }
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PipelineStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub template: PipelineDefId,
    pub hosts: Vec<HostId>,
    pub current_stage: usize,
    pub status: PipelineStatus,
    /// Hosts dropped from the active set (via a failed/skipped stage), recorded
    /// as they fall out so the final COMPLETE/PARTIAL verdict doesn't need to
    /// recompute it from command history.
    #[serde(default)]
    pub dropped_hosts: Vec<HostId>,
    pub created_at_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_epoch_ms: Option<u64>,
}

impl Pipeline {
    pub fn new(template: PipelineDefId, hosts: Vec<HostId>, created_at_epoch_ms: u64) -> Self {
        Self {
            id: PipelineId::new(),
            template,
            hosts,
            current_stage: 0,
            status: PipelineStatus::Running,
            dropped_hosts: Vec::new(),
            created_at_epoch_ms,
            finished_at_epoch_ms: None,
        }
    }

    /// Hosts still active for the current stage (started set minus dropped).
    pub fn active_hosts(&self) -> Vec<HostId> {
        self.hosts.iter().filter(|h| !self.dropped_hosts.contains(h)).cloned().collect()
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
