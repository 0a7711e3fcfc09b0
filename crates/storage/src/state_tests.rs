// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use nf_core::{
    AuditEntry, Command, CommandStatus, Event, EventCategory, EventLevel, HostId, HostStatus,
    HostType, Pipeline, PipelineDefId,
};

use super::*;

fn register(host: &str) -> Event {
    Event::HostRegistered {
        host_id: HostId::new(host),
        host_type: HostType::Nixos,
        agent_version: "1.0.0".to_string(),
        os_version: "24.11".to_string(),
    }
}

#[test]
fn registering_a_host_inserts_it_online() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));

    let host = state.get_host(&HostId::new("web-01")).unwrap();
    assert_eq!(host.status, HostStatus::Online);
    assert_eq!(host.agent_version, "1.0.0");
}

#[test]
fn re_registering_preserves_human_configured_fields() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));
    state.apply_event(&Event::HostConfigUpdated {
        host_id: HostId::new("web-01"),
        theme_color: Some("#ff0000".to_string()),
        location: None,
        device_type: None,
        repo_url: None,
        repo_dir: None,
    });

    state.apply_event(&register("web-01"));

    let host = state.get_host(&HostId::new("web-01")).unwrap();
    assert_eq!(host.theme_color, "#ff0000");
}

#[test]
fn applying_register_twice_is_idempotent() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));
    state.apply_event(&register("web-01"));

    assert_eq!(state.hosts.len(), 1);
}

#[test]
fn host_offline_clears_online_status_only() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));
    state.apply_event(&Event::HostOffline { host_id: HostId::new("web-01") });

    let host = state.get_host(&HostId::new("web-01")).unwrap();
    assert_eq!(host.status, HostStatus::Offline);
    assert_eq!(host.agent_version, "1.0.0");
}

#[test]
fn host_removed_is_soft_delete() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));
    state.apply_event(&Event::HostRemoved { host_id: HostId::new("web-01") });

    assert!(state.get_host(&HostId::new("web-01")).unwrap().removed);
}

#[test]
fn command_created_sets_host_pending_command() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));

    let command = Command::new(HostId::new("web-01"), nf_core::OpId::Pull, None, 0, "log".to_string());
    let command_id = command.id;
    state.apply_event(&Event::CommandCreated { command });

    assert_eq!(state.get_host(&HostId::new("web-01")).unwrap().pending_command, Some(command_id));
    assert!(state.get_command(&command_id).is_some());
}

#[test]
fn pending_command_cleared_only_clears_matching_id() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));

    let command = Command::new(HostId::new("web-01"), nf_core::OpId::Pull, None, 0, "log".to_string());
    let command_id = command.id;
    state.apply_event(&Event::CommandCreated { command });
    state.apply_event(&Event::PendingCommandCleared {
        host_id: HostId::new("web-01"),
        command_id: nf_core::CommandId::new(),
    });
    assert_eq!(state.get_host(&HostId::new("web-01")).unwrap().pending_command, Some(command_id));

    state.apply_event(&Event::PendingCommandCleared { host_id: HostId::new("web-01"), command_id });
    assert_eq!(state.get_host(&HostId::new("web-01")).unwrap().pending_command, None);
}

#[test]
fn command_orphaned_marks_error_and_clears_pending() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));

    let mut command = Command::new(HostId::new("web-01"), nf_core::OpId::Switch, None, 0, "log".to_string());
    command.status = CommandStatus::Executing;
    let command_id = command.id;
    state.apply_event(&Event::CommandCreated { command: command.clone() });

    state.apply_event(&Event::CommandOrphaned { command });

    let orphaned = state.get_command(&command_id).unwrap();
    assert_eq!(orphaned.status, CommandStatus::Error);
    assert_eq!(orphaned.error_code.as_deref(), Some("ORPHANED"));
    assert_eq!(state.get_host(&HostId::new("web-01")).unwrap().pending_command, None);
}

#[test]
fn pipeline_created_then_updated_upserts_by_id() {
    let mut state = MaterializedState::default();
    let pipeline = Pipeline::new(PipelineDefId::DoAll, vec![HostId::new("web-01")], 0);
    let id = pipeline.id;
    state.apply_event(&Event::PipelineCreated { pipeline: pipeline.clone() });

    let mut updated = pipeline;
    updated.current_stage = 1;
    state.apply_event(&Event::PipelineUpdated { pipeline: updated });

    assert_eq!(state.get_pipeline(&id).unwrap().current_stage, 1);
    assert_eq!(state.pipelines.len(), 1);
}

#[test]
fn event_appended_assigns_sequential_ids_and_bounds_the_log() {
    let mut state = MaterializedState::default();
    for i in 0..5 {
        state.apply_event(&Event::EventAppended {
            entry: AuditEntry {
                id: 0,
                timestamp_epoch_ms: i,
                category: EventCategory::System,
                level: EventLevel::Info,
                actor: "daemon".to_string(),
                host_id: None,
                action: "tick".to_string(),
                message: "tick".to_string(),
                details: serde_json::Value::Null,
            },
        });
    }

    let recent = state.recent_events(10);
    assert_eq!(recent.len(), 5);
    assert_eq!(recent[0].id, 4);
    assert_eq!(recent[4].id, 0);
}

#[test]
fn state_version_advances_once_per_event() {
    let mut state = MaterializedState::default();
    assert_eq!(state.version, nf_core::StateVersion::ZERO);
    state.apply_event(&register("web-01"));
    assert_eq!(state.version, nf_core::StateVersion(1));
    state.apply_event(&register("web-02"));
    assert_eq!(state.version, nf_core::StateVersion(2));
}

#[test]
fn recover_orphaned_terminates_non_terminal_commands_and_offlines_hosts() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));

    let mut command = Command::new(HostId::new("web-01"), nf_core::OpId::Switch, None, 0, "log".to_string());
    command.status = CommandStatus::AwaitingReconnect;
    let command_id = command.id;
    state.apply_event(&Event::CommandCreated { command });

    let orphaned = state.recover_orphaned(1_000);

    assert_eq!(orphaned, vec![command_id]);
    assert_eq!(state.get_command(&command_id).unwrap().status, CommandStatus::Error);
    assert_eq!(state.get_host(&HostId::new("web-01")).unwrap().status, HostStatus::Offline);
    assert_eq!(state.get_host(&HostId::new("web-01")).unwrap().pending_command, None);
}

#[test]
fn recover_orphaned_is_idempotent() {
    let mut state = MaterializedState::default();
    state.apply_event(&register("web-01"));
    let mut command = Command::new(HostId::new("web-01"), nf_core::OpId::Switch, None, 0, "log".to_string());
    command.status = CommandStatus::Executing;
    state.apply_event(&Event::CommandCreated { command });

    state.recover_orphaned(1_000);
    let second_pass = state.recover_orphaned(2_000);

    assert!(second_pass.is_empty());
}

#[test]
fn cleanup_old_commands_keeps_recent_and_non_terminal() {
    let mut state = MaterializedState::default();

    let mut old_done = Command::new(HostId::new("web-01"), nf_core::OpId::Pull, None, 0, "log".to_string());
    old_done.status = CommandStatus::Success;
    old_done.finished_at_epoch_ms = Some(0);
    state.commands.insert(old_done.id, old_done);

    let mut recent_done = Command::new(HostId::new("web-01"), nf_core::OpId::Pull, None, 0, "log".to_string());
    recent_done.status = CommandStatus::Success;
    recent_done.finished_at_epoch_ms = Some(9_000);
    let recent_id = recent_done.id;
    state.commands.insert(recent_done.id, recent_done);

    let mut running = Command::new(HostId::new("web-01"), nf_core::OpId::Switch, None, 0, "log".to_string());
    running.status = CommandStatus::Executing;
    let running_id = running.id;
    state.commands.insert(running.id, running);

    let removed = state.cleanup_old_commands(10_000, 5_000);

    assert_eq!(removed, 1);
    assert!(state.get_command(&recent_id).is_some());
    assert!(state.get_command(&running_id).is_some());
}

#[test]
fn cleanup_old_events_drops_entries_past_ttl() {
    let mut state = MaterializedState::default();
    state.events.push_back(AuditEntry {
        id: 0,
        timestamp_epoch_ms: 0,
        category: EventCategory::System,
        level: EventLevel::Info,
        actor: "daemon".to_string(),
        host_id: None,
        action: "tick".to_string(),
        message: "tick".to_string(),
        details: serde_json::Value::Null,
    });
    state.events.push_back(AuditEntry {
        id: 1,
        timestamp_epoch_ms: 9_000,
        category: EventCategory::System,
        level: EventLevel::Info,
        actor: "daemon".to_string(),
        host_id: None,
        action: "tick".to_string(),
        message: "tick".to_string(),
        details: serde_json::Value::Null,
    });

    let removed = state.cleanup_old_events(10_000, 5_000);
    assert_eq!(removed, 1);
    assert_eq!(state.events.len(), 1);
}
