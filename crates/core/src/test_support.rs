// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::command::{Command, CommandStatus};
use crate::host::{Host, HostType};
use crate::ids::HostId;

pub fn host_fixture(id: &str) -> Host {
    let mut host = Host::new(HostId::new(id), HostType::Nixos);
    host.agent_version = "1.0.0".to_string();
    host
}

pub fn command_fixture(host_id: &str, op: crate::catalog::OpId) -> Command {
    Command::new(HostId::new(host_id), op, None, 1_000, format!("/tmp/{host_id}.log"))
}

/// Proptest strategies for core state machine types.
#[cfg(feature = "proptest")]
pub mod strategies {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_command_status() -> impl Strategy<Value = CommandStatus> {
        prop_oneof![
            Just(CommandStatus::Pending),
            Just(CommandStatus::Validating),
            Just(CommandStatus::Blocked),
            Just(CommandStatus::Executing),
            Just(CommandStatus::RunningWarning),
            Just(CommandStatus::AwaitingReconnect),
            Just(CommandStatus::TimeoutPending),
            Just(CommandStatus::Killing),
            Just(CommandStatus::Killed),
            Just(CommandStatus::Success),
            Just(CommandStatus::Error),
            Just(CommandStatus::Timeout),
            Just(CommandStatus::Partial),
            Just(CommandStatus::StaleBinary),
            Just(CommandStatus::Suspicious),
            Just(CommandStatus::Skipped),
        ]
    }

    pub fn arb_op_id() -> impl Strategy<Value = crate::catalog::OpId> {
        use crate::catalog::OpId::*;
        prop_oneof![
            Just(Pull),
            Just(Switch),
            Just(Test),
            Just(Restart),
            Just(Stop),
            Just(Reboot),
            Just(RefreshGit),
            Just(RefreshLock),
            Just(RefreshSystem),
            Just(RefreshTests),
            Just(BumpFlake),
            Just(ForceRebuild),
            Just(MergePr),
            Just(SetColor),
            Just(Remove),
        ]
    }
}
