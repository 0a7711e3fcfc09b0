// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static op and pipeline catalogs.
//!
//! Both tables are `&'static` slices resolved by linear scan over a small,
//! fixed-size enum key rather than a runtime-built `HashMap` — the catalogs
//! never change after compile time.

use std::time::Duration;

use serde::{Deserialize, Serialize};


/// Which side actually carries out an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Executor {
    /// Dispatched to the agent over the WebSocket connection.
    Agent,
    /// Runs in-process on the dashboard and never touches the WS path.
    Dashboard,
}

/// How a dispatched command's completion is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostCompletionModel {
    /// Exit code and post-check are both available as soon as `status` arrives.
    Immediate,
    /// The post-check needs an updated heartbeat before it can run.
    DeferredHeartbeat,
    /// The post-check runs only once the agent reconnects (switch-class ops).
    Reconnect,
}

/// Identifies one op in the static catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpId {
    Pull,
    Switch,
    Test,
    Restart,
    Stop,
    Reboot,
    RefreshGit,
    RefreshLock,
    RefreshSystem,
    RefreshTests,
    BumpFlake,
    ForceRebuild,
    MergePr,
    SetColor,
    Remove,
}

crate::simple_display! {
    OpId {
        Pull => "pull",
        Switch => "switch",
        Test => "test",
        Restart => "restart",
        Stop => "stop",
        Reboot => "reboot",
        RefreshGit => "refresh-git",
        RefreshLock => "refresh-lock",
        RefreshSystem => "refresh-system",
        RefreshTests => "refresh-tests",
        BumpFlake => "bump-flake",
        ForceRebuild => "force-rebuild",
        MergePr => "merge-pr",
        SetColor => "set-color",
        Remove => "remove",
    }
}

/// Static definition of one op: timeouts, executor, and completion model.
///
/// `pre_validate`/`post_validate` are not function pointers here — the
/// Lifecycle Manager switches on `OpId` directly for the handful of
/// op-specific checks (see `lifecycle::validate`), matching the catalog's
/// role as data, not behavior.
#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub id: OpId,
    pub description: &'static str,
    pub executor: Executor,
    pub post_completion: PostCompletionModel,
    pub warning_timeout: Duration,
    pub hard_timeout: Duration,
    /// Only set for ops with `post_completion == Reconnect`.
    pub reconnect_timeout: Option<Duration>,
    pub retryable: bool,
    pub requires_totp: bool,
}

const fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub static OPS: &[OpDef] = &[
    OpDef {
        id: OpId::Pull,
        description: "Pull the latest config from the fleet's git remote",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(120),
        hard_timeout: secs(300),
        reconnect_timeout: None,
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::Switch,
        description: "Rebuild and switch to the pulled configuration",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Reconnect,
        warning_timeout: secs(600),
        hard_timeout: secs(1800),
        reconnect_timeout: Some(secs(90)),
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::Test,
        description: "Run the host's test suite against the deployed generation",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::DeferredHeartbeat,
        warning_timeout: secs(300),
        hard_timeout: secs(600),
        reconnect_timeout: None,
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::Restart,
        description: "Restart the agent process",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Reconnect,
        warning_timeout: secs(60),
        hard_timeout: secs(120),
        reconnect_timeout: Some(secs(90)),
        retryable: false,
        requires_totp: false,
    },
    OpDef {
        id: OpId::Stop,
        description: "Stop the agent's managed services",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(30),
        hard_timeout: secs(60),
        reconnect_timeout: None,
        retryable: false,
        requires_totp: false,
    },
    OpDef {
        id: OpId::Reboot,
        description: "Reboot the host",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Reconnect,
        warning_timeout: secs(60),
        hard_timeout: secs(180),
        reconnect_timeout: Some(secs(120)),
        retryable: false,
        requires_totp: true,
    },
    OpDef {
        id: OpId::RefreshGit,
        description: "Force re-derivation of the Git compartment",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(10),
        hard_timeout: secs(30),
        reconnect_timeout: None,
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::RefreshLock,
        description: "Force re-derivation of the Lock compartment",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(10),
        hard_timeout: secs(30),
        reconnect_timeout: None,
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::RefreshSystem,
        description: "Force re-derivation of the System compartment",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(10),
        hard_timeout: secs(30),
        reconnect_timeout: None,
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::RefreshTests,
        description: "Force re-derivation of the Tests compartment",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(10),
        hard_timeout: secs(30),
        reconnect_timeout: None,
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::BumpFlake,
        description: "Bump the flake.lock input revisions",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(60),
        hard_timeout: secs(180),
        reconnect_timeout: None,
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::ForceRebuild,
        description: "Force a rebuild and switch, bypassing Git-freshness gating",
        executor: Executor::Agent,
        post_completion: PostCompletionModel::Reconnect,
        warning_timeout: secs(600),
        hard_timeout: secs(1800),
        reconnect_timeout: Some(secs(90)),
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::MergePr,
        description: "Merge the fleet config's open pull request",
        executor: Executor::Dashboard,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(30),
        hard_timeout: secs(60),
        reconnect_timeout: None,
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::SetColor,
        description: "Set a host's dashboard theme color",
        executor: Executor::Dashboard,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(5),
        hard_timeout: secs(10),
        reconnect_timeout: None,
        retryable: true,
        requires_totp: false,
    },
    OpDef {
        id: OpId::Remove,
        description: "Mark a host as removed (soft-delete)",
        executor: Executor::Dashboard,
        post_completion: PostCompletionModel::Immediate,
        warning_timeout: secs(5),
        hard_timeout: secs(10),
        reconnect_timeout: None,
        retryable: false,
        requires_totp: false,
    },
];

/// Looks up an op's static definition. Every `OpId` variant has exactly one
/// entry in [`OPS`]; an exhaustiveness test in this module's test file
/// guards against drift.
pub fn op_def(id: OpId) -> &'static OpDef {
    OPS.iter().find(|def| def.id == id).expect("every OpId has a catalog entry")
}

/// Identifies one pipeline template in the static catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineDefId {
    DoAll,
    MergeDeploy,
    UpdateAgent,
    ForceUpdate,
}

crate::simple_display! {
    PipelineDefId {
        DoAll => "do-all",
        MergeDeploy => "merge-deploy",
        UpdateAgent => "update-agent",
        ForceUpdate => "force-update",
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineDef {
    pub id: PipelineDefId,
    pub ops: &'static [OpId],
}

pub static PIPELINES: &[PipelineDef] = &[
    PipelineDef { id: PipelineDefId::DoAll, ops: &[OpId::Pull, OpId::Switch, OpId::Test] },
    PipelineDef {
        id: PipelineDefId::MergeDeploy,
        ops: &[OpId::MergePr, OpId::Pull, OpId::Switch, OpId::Test],
    },
    PipelineDef {
        id: PipelineDefId::UpdateAgent,
        ops: &[OpId::BumpFlake, OpId::Pull, OpId::Switch, OpId::Restart],
    },
    // Same shape as switch: force-rebuild also resolves through the
    // reconnect post-completion model, so a restart after it is verified
    // the same way a plain switch would be.
    PipelineDef { id: PipelineDefId::ForceUpdate, ops: &[OpId::ForceRebuild, OpId::Restart] },
];

pub fn pipeline_def(id: PipelineDefId) -> &'static PipelineDef {
    PIPELINES.iter().find(|def| def.id == id).expect("every PipelineDefId has a catalog entry")
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
