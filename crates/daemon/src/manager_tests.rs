// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use nf_core::{
    test_support::host_fixture, AgentFreshness, CompartmentState, CompartmentStatus, Event,
    FakeClock, HostId, HostStatus, OpId, StateVersion,
};
use nf_storage::{MaterializedState, Wal};
use nf_wire::Change;
use parking_lot::Mutex as PLMutex;
use tempfile::tempdir;

use super::*;

#[derive(Default)]
struct FakeAgentSender {
    sends: PLMutex<Vec<(HostId, OpId)>>,
    kills: PLMutex<Vec<(HostId, OpId, bool)>>,
    fail_sends: bool,
}

impl AgentSender for FakeAgentSender {
    fn send_command(&self, host_id: &HostId, op_id: OpId) -> bool {
        self.sends.lock().push((host_id.clone(), op_id));
        !self.fail_sends
    }

    fn send_kill(&self, host_id: &HostId, op_id: OpId, force: bool) {
        self.kills.lock().push((host_id.clone(), op_id, force));
    }
}

#[derive(Default)]
struct FakeBroadcaster {
    changes: PLMutex<Vec<Change>>,
}

impl DeltaBroadcaster for FakeBroadcaster {
    fn broadcast(&self, change: Change, _version: StateVersion) {
        self.changes.lock().push(change);
    }
}

fn manager(
    host: nf_core::Host,
) -> (LifecycleManager<FakeAgentSender, Arc<FakeBroadcaster>, FakeClock>, Arc<FakeBroadcaster>, tempfile::TempDir)
{
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("events.wal"), 0).unwrap();
    let (bus, _reader) = EventBus::new(wal);

    let mut state = MaterializedState::default();
    state.apply_event(&Event::HostRegistered {
        host_id: host.id.clone(),
        host_type: host.host_type,
        agent_version: host.agent_version.clone(),
        os_version: host.os_version.clone(),
    });
    {
        let row = state.hosts.get_mut(&host.id).unwrap();
        row.status = HostStatus::Online;
        row.generation = host.generation.clone();
        row.freshness = host.freshness.clone();
    }

    let broadcaster = Arc::new(FakeBroadcaster::default());
    let mgr = LifecycleManager::new(
        Arc::new(PLMutex::new(state)),
        bus,
        FakeAgentSender::default(),
        Arc::clone(&broadcaster),
        FakeClock::new(),
    );
    (mgr, broadcaster, dir)
}

fn outdated() -> CompartmentStatus {
    CompartmentStatus::new(CompartmentState::Outdated)
}

fn ok_status() -> CompartmentStatus {
    CompartmentStatus::new(CompartmentState::Ok)
}

#[test]
fn pre_validate_blocks_unknown_host() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let err = mgr.pre_validate(&HostId::new("ghost"), OpId::Pull, false, None, &outdated()).unwrap_err();
    assert_eq!(err.code, nf_core::ValidationCode::HostOffline);
}

#[test]
fn pre_validate_blocks_switch_when_git_outdated_without_force() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let err = mgr.pre_validate(&HostId::new("web-01"), OpId::Switch, false, None, &outdated()).unwrap_err();
    assert_eq!(err.code, nf_core::ValidationCode::GitOutdated);
}

#[test]
fn pre_validate_allows_switch_with_force_despite_outdated_git() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    assert!(mgr.pre_validate(&HostId::new("web-01"), OpId::Switch, true, None, &outdated()).is_ok());
}

#[test]
fn pre_validate_blocks_pull_when_already_current() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let err = mgr.pre_validate(&HostId::new("web-01"), OpId::Pull, false, None, &ok_status()).unwrap_err();
    assert_eq!(err.code, nf_core::ValidationCode::AlreadyCurrent);
}

#[test]
fn pre_validate_requires_totp_for_reboot() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let err = mgr.pre_validate(&HostId::new("web-01"), OpId::Reboot, false, None, &outdated()).unwrap_err();
    assert_eq!(err.code, nf_core::ValidationCode::TotpRequired);
}

#[test]
fn pre_validate_blocks_when_command_already_active() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    mgr.dispatch(&host_id, OpId::Pull, None, "/tmp/web-01.log".to_string(), None).unwrap();

    let err = mgr.pre_validate(&host_id, OpId::Test, false, None, &outdated()).unwrap_err();
    assert_eq!(err.code, nf_core::ValidationCode::CommandActive);
}

#[test]
fn dispatch_success_sets_pending_command_and_sends_to_agent() {
    let (mgr, broadcaster, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");

    let command = mgr.dispatch(&host_id, OpId::Pull, None, "/tmp/web-01.log".to_string(), None).unwrap();

    assert_eq!(command.status, CommandStatus::Executing);
    let host = mgr.state.lock().get_host(&host_id).unwrap().clone();
    assert_eq!(host.pending_command, Some(command.id));
    assert_eq!(mgr.agents.sends.lock().len(), 1);
    assert!(matches!(broadcaster.changes.lock().first(), Some(Change::CommandStarted { .. })));
}

#[test]
fn dispatch_send_failure_transitions_straight_to_error() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("events.wal"), 0).unwrap();
    let (bus, _reader) = EventBus::new(wal);

    let host = host_fixture("web-01");
    let mut state = MaterializedState::default();
    state.apply_event(&Event::HostRegistered {
        host_id: host.id.clone(),
        host_type: host.host_type,
        agent_version: host.agent_version.clone(),
        os_version: host.os_version.clone(),
    });
    state.hosts.get_mut(&host.id).unwrap().status = HostStatus::Online;

    let broadcaster = Arc::new(FakeBroadcaster::default());
    let mgr = LifecycleManager::new(
        Arc::new(PLMutex::new(state)),
        bus,
        FakeAgentSender { fail_sends: true, ..Default::default() },
        Arc::clone(&broadcaster),
        FakeClock::new(),
    );

    let command = mgr.dispatch(&host.id, OpId::Pull, None, "/tmp/web-01.log".to_string(), None).unwrap();
    let stored = mgr.state.lock().get_command(&command.id).unwrap().clone();
    assert_eq!(stored.status, CommandStatus::Error);
    assert_eq!(stored.error_code.as_deref(), Some("send_failed"));
    assert!(mgr.state.lock().get_host(&host.id).unwrap().pending_command.is_none());
}

#[test]
fn handle_status_immediate_success_clears_pending_command() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    mgr.dispatch(&host_id, OpId::Pull, None, "/tmp/web-01.log".to_string(), None).unwrap();

    mgr.handle_status(&host_id, OpId::Pull, 0, None);

    let host = mgr.state.lock().get_host(&host_id).unwrap().clone();
    assert!(host.pending_command.is_none());
    assert!(mgr.state.lock().active_commands_for_host(&host_id).is_empty());
}

#[test]
fn handle_status_reconnect_op_moves_to_awaiting_reconnect_on_success() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();

    mgr.handle_status(&host_id, OpId::Switch, 0, None);

    let host = mgr.state.lock().get_host(&host_id).unwrap().clone();
    assert!(host.pending_command.is_some(), "pending_command stays set while awaiting reconnect");
    let command = mgr.state.lock().active_commands_for_host(&host_id).into_iter().next().unwrap().clone();
    assert_eq!(command.status, CommandStatus::AwaitingReconnect);
}

#[test]
fn handle_status_reconnect_op_goes_straight_to_error_on_nonzero_exit() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();

    mgr.handle_status(&host_id, OpId::Switch, 1, Some("build failed".to_string()));

    assert!(mgr.state.lock().get_host(&host_id).unwrap().pending_command.is_none());
}

#[test]
fn handle_reconnect_fresh_binary_resolves_to_success() {
    let mut host = host_fixture("web-01");
    host.freshness = AgentFreshness {
        source_commit: "aaa".to_string(),
        store_path: "/nix/store/old".to_string(),
        binary_hash: "old".to_string(),
    };
    let (mgr, _b, _dir) = manager(host);
    let host_id = HostId::new("web-01");
    mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();
    mgr.handle_status(&host_id, OpId::Switch, 0, None);

    let after = AgentFreshness {
        source_commit: "bbb".to_string(),
        store_path: "/nix/store/new".to_string(),
        binary_hash: "new".to_string(),
    };
    mgr.handle_reconnect(&host_id, &after);

    assert!(mgr.state.lock().active_commands_for_host(&host_id).is_empty());
    assert!(mgr.state.lock().get_host(&host_id).unwrap().pending_command.is_none());
}

#[test]
fn handle_reconnect_stale_binary_resolves_to_stale_binary_status() {
    let mut host = host_fixture("web-01");
    host.freshness = AgentFreshness {
        source_commit: "aaa".to_string(),
        store_path: "/nix/store/same".to_string(),
        binary_hash: "same".to_string(),
    };
    let (mgr, _b, _dir) = manager(host);
    let host_id = HostId::new("web-01");
    mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();
    mgr.handle_status(&host_id, OpId::Switch, 0, None);

    let unchanged = AgentFreshness {
        source_commit: "aaa".to_string(),
        store_path: "/nix/store/same".to_string(),
        binary_hash: "same".to_string(),
    };

    let command_id = {
        let state = mgr.state.lock();
        state.active_commands_for_host(&host_id).into_iter().next().unwrap().id
    };
    mgr.handle_reconnect(&host_id, &unchanged);

    let stored = mgr.state.lock().get_command(&command_id).unwrap().clone();
    assert_eq!(stored.status, CommandStatus::StaleBinary);
}

#[test]
fn handle_rejected_marks_command_error_agent_busy() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    mgr.dispatch(&host_id, OpId::Pull, None, "/tmp/web-01.log".to_string(), None).unwrap();

    mgr.handle_rejected(&host_id, "agent already running an op", Some(OpId::Switch), Some(4242));

    assert!(mgr.state.lock().get_host(&host_id).unwrap().pending_command.is_none());
}

#[test]
fn timeout_tick_promotes_executing_past_warning_deadline() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    let command = mgr.dispatch(&host_id, OpId::Pull, None, "/tmp/web-01.log".to_string(), None).unwrap();

    mgr.clock.advance(std::time::Duration::from_secs(121));
    mgr.timeout_tick();

    let stored = mgr.state.lock().get_command(&command.id).unwrap().clone();
    assert_eq!(stored.status, CommandStatus::RunningWarning);
}

#[test]
fn orphan_cleanup_marks_unreachable_host_offline() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    mgr.clock.advance(std::time::Duration::from_secs(600));
    {
        let mut state = mgr.state.lock();
        state.hosts.get_mut(&host_id).unwrap().last_seen_epoch_ms = 0;
    }

    mgr.orphan_cleanup_tick(15_000, 3, &|_| false);

    assert_eq!(mgr.state.lock().get_host(&host_id).unwrap().status, HostStatus::Offline);
}

#[test]
fn orphan_cleanup_never_touches_a_host_with_an_active_command() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();
    mgr.handle_status(&host_id, OpId::Switch, 0, None);
    mgr.clock.advance(std::time::Duration::from_secs(600));
    {
        let mut state = mgr.state.lock();
        state.hosts.get_mut(&host_id).unwrap().last_seen_epoch_ms = 0;
    }

    mgr.orphan_cleanup_tick(15_000, 3, &|_| false);

    assert_eq!(mgr.state.lock().get_host(&host_id).unwrap().status, HostStatus::Online);
}

#[test]
fn kill_transitions_to_killing_and_sends_sigterm() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    let command = mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();

    mgr.kill(command.id);

    assert_eq!(mgr.state.lock().get_command(&command.id).unwrap().status, CommandStatus::Killing);
    let kills = mgr.agents.kills.lock().clone();
    assert_eq!(kills, vec![(host_id, OpId::Switch, false)]);
}

#[test]
fn kill_escalate_resends_with_force_while_still_killing() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    let command = mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();
    mgr.kill(command.id);

    mgr.kill_escalate(command.id);

    let kills = mgr.agents.kills.lock().clone();
    assert_eq!(kills, vec![(host_id.clone(), OpId::Switch, false), (host_id, OpId::Switch, true)]);
}

#[test]
fn kill_escalate_is_a_no_op_once_acked() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    let command = mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();
    mgr.kill(command.id);
    mgr.handle_kill_ack(command.id, true);

    mgr.kill_escalate(command.id);

    let kills = mgr.agents.kills.lock().clone();
    assert_eq!(kills.len(), 1, "escalation must not resend once the command is already terminal");
}

#[test]
fn handle_kill_ack_marks_killed_on_success() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    let command = mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();
    mgr.kill(command.id);

    mgr.handle_kill_ack(command.id, true);

    assert_eq!(mgr.state.lock().get_command(&command.id).unwrap().status, CommandStatus::Killed);
}

#[test]
fn handle_kill_ack_marks_kill_failed_when_process_survives() {
    let (mgr, _b, _dir) = manager(host_fixture("web-01"));
    let host_id = HostId::new("web-01");
    let command = mgr.dispatch(&host_id, OpId::Switch, None, "/tmp/web-01.log".to_string(), None).unwrap();
    mgr.kill(command.id);

    mgr.handle_kill_ack(command.id, false);

    let stored = mgr.state.lock().get_command(&command.id).unwrap().clone();
    assert_eq!(stored.status, CommandStatus::Error);
    assert_eq!(stored.error_code.as_deref(), Some("kill_failed"));
}
