// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

const ALL_OPS: &[OpId] = &[
    OpId::Pull,
    OpId::Switch,
    OpId::Test,
    OpId::Restart,
    OpId::Stop,
    OpId::Reboot,
    OpId::RefreshGit,
    OpId::RefreshLock,
    OpId::RefreshSystem,
    OpId::RefreshTests,
    OpId::BumpFlake,
    OpId::ForceRebuild,
    OpId::MergePr,
    OpId::SetColor,
    OpId::Remove,
];

#[test]
fn every_op_id_has_exactly_one_catalog_entry() {
    for op in ALL_OPS {
        let matches = OPS.iter().filter(|def| def.id == *op).count();
        assert_eq!(matches, 1, "{op} should have exactly one OPS entry");
    }
    assert_eq!(OPS.len(), ALL_OPS.len());
}

#[parameterized(
    pull = { OpId::Pull, Executor::Agent },
    switch = { OpId::Switch, Executor::Agent },
    merge_pr = { OpId::MergePr, Executor::Dashboard },
    set_color = { OpId::SetColor, Executor::Dashboard },
    remove = { OpId::Remove, Executor::Dashboard },
)]
fn op_executor_matches_catalog_abstract(id: OpId, expected: Executor) {
    assert_eq!(op_def(id).executor, expected);
}

#[test]
fn switch_is_reconnect_model_with_deadline() {
    let def = op_def(OpId::Switch);
    assert_eq!(def.post_completion, PostCompletionModel::Reconnect);
    assert!(def.reconnect_timeout.is_some());
}

#[test]
fn reboot_requires_totp() {
    assert!(op_def(OpId::Reboot).requires_totp);
}

#[test]
fn stop_is_never_retryable() {
    assert!(!op_def(OpId::Stop).retryable);
}

#[test]
fn warning_timeout_never_exceeds_hard_timeout() {
    for def in OPS {
        assert!(
            def.warning_timeout <= def.hard_timeout,
            "{} warning timeout exceeds hard timeout",
            def.id
        );
    }
}

#[test]
fn pipelines_reference_only_known_ops() {
    for pipeline in PIPELINES {
        assert!(!pipeline.ops.is_empty());
        for op in pipeline.ops {
            assert!(ALL_OPS.contains(op));
        }
    }
}

#[test]
fn do_all_matches_catalog_abstract() {
    let def = pipeline_def(PipelineDefId::DoAll);
    assert_eq!(def.ops, &[OpId::Pull, OpId::Switch, OpId::Test]);
}

#[test]
fn force_update_is_force_rebuild_then_restart() {
    let def = pipeline_def(PipelineDefId::ForceUpdate);
    assert_eq!(def.ops, &[OpId::ForceRebuild, OpId::Restart]);
}
