// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response DTOs for the HTTP API surface (§6).

use nf_core::{Command, HostId, OpId, PipelineDefId, PipelineId, ValidationCode, ValidationError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DispatchRequest {
    pub op: OpId,
    pub hosts: Vec<HostId>,
    #[serde(default)]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp: Option<String>,
    /// Only consumed by `set-color`; ignored by every other op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,
}

/// Per-host outcome of a dispatch request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome")]
pub enum HostDispatchOutcome {
    #[serde(rename = "success")]
    Success { command: Command },
    #[serde(rename = "blocked")]
    Blocked { code: ValidationCode, message: String },
    #[serde(rename = "error")]
    Error { message: String },
}

impl From<Result<Command, ValidationError>> for HostDispatchOutcome {
    fn from(result: Result<Command, ValidationError>) -> Self {
        match result {
            Ok(command) => HostDispatchOutcome::Success { command },
            Err(err) => HostDispatchOutcome::Blocked { code: err.code, message: err.message },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchResponse {
    pub results: std::collections::BTreeMap<HostId, HostDispatchOutcome>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PipelineDispatchRequest {
    pub pipeline: PipelineDefId,
    pub hosts: Vec<HostId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp: Option<String>,
}

/// 202-Accepted body; completion is observed via the browser WS channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineDispatchResponse {
    pub pipeline_id: PipelineId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpCatalogEntry {
    pub id: OpId,
    pub description: &'static str,
    pub executor: nf_core::Executor,
    pub retryable: bool,
    pub requires_totp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineCatalogEntry {
    pub id: PipelineDefId,
    pub ops: Vec<OpId>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventsQuery {
    #[serde(default = "default_events_limit")]
    pub limit: usize,
}

fn default_events_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventsResponse {
    pub events: Vec<nf_core::AuditEntry>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HostCommandRequest {
    pub op: OpId,
    #[serde(default)]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totp: Option<String>,
    /// Only consumed by `set-color`; ignored by every other op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimeoutActionRequest {
    pub action: TimeoutAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    Extend,
    Kill,
    Ignore,
}

/// Query param on `GET /api/hosts` (supplemental — not in the original HTTP
/// surface, but the natural read-side counterpart to the `remove` op).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HostsQuery {
    #[serde(default)]
    pub include_removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostsResponse {
    pub hosts: Vec<nf_core::Host>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionResponse {
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
