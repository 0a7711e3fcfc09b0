// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use nf_core::{test_support::host_fixture, AgentFreshness, Event, FakeClock, HostId, HostStatus, OpId, PipelineDefId, PipelineStatus, StateVersion};
use nf_storage::{MaterializedState, Wal};
use nf_wire::Change;
use parking_lot::Mutex as PLMutex;
use tempfile::tempdir;

use super::*;
use crate::manager::{AgentSender, DeltaBroadcaster, LifecycleManager};

#[derive(Default)]
struct NoopAgentSender;

impl AgentSender for NoopAgentSender {
    fn send_command(&self, _host_id: &HostId, _op_id: OpId) -> bool {
        true
    }

    fn send_kill(&self, _host_id: &HostId, _op_id: OpId, _force: bool) {}
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

fn online_host(id: &str) -> nf_core::Host {
    let mut host = host_fixture(id);
    host.status = HostStatus::Online;
    host
}

async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn force_update_pipeline_completes_across_two_reconnect_style_stages() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("events.wal"), 0).unwrap();
    let (bus, _reader) = EventBus::new(wal);

    let mut state = MaterializedState::default();
    for id in ["web-01", "web-02"] {
        let host = online_host(id);
        state.apply_event(&Event::HostRegistered {
            host_id: host.id.clone(),
            host_type: host.host_type,
            agent_version: host.agent_version.clone(),
            os_version: host.os_version.clone(),
        });
        state.hosts.get_mut(&host.id).unwrap().status = HostStatus::Online;
    }
    let state = Arc::new(PLMutex::new(state));

    let broadcaster = Arc::new(FakeBroadcaster::default());
    let manager = Arc::new(LifecycleManager::new(
        Arc::clone(&state),
        bus.clone(),
        NoopAgentSender,
        Arc::clone(&broadcaster),
        FakeClock::new(),
    ));

    let logs_dir = tempdir().unwrap();
    let run = PipelineRun::new(Arc::clone(&state), bus, Arc::clone(&manager), Arc::clone(&broadcaster), FakeClock::new(), logs_dir.path().to_path_buf());
    let hosts = vec![HostId::new("web-01"), HostId::new("web-02")];
    let pipeline = run.new_pipeline(PipelineDefId::ForceUpdate, hosts, 1_000);

    let run_handle = tokio::spawn(async move { run.run(pipeline).await });

    // Stage 0: ForceRebuild (Immediate).
    settle().await;
    for id in ["web-01", "web-02"] {
        manager.handle_status(&HostId::new(id), OpId::ForceRebuild, 0, None);
    }

    // Stage 1: Restart (Reconnect).
    settle().await;
    for id in ["web-01", "web-02"] {
        manager.handle_status(&HostId::new(id), OpId::Restart, 0, None);
    }
    settle().await;
    for id in ["web-01", "web-02"] {
        manager.handle_reconnect(
            &HostId::new(id),
            &AgentFreshness {
                source_commit: "new".to_string(),
                store_path: "/nix/store/new".to_string(),
                binary_hash: "new".to_string(),
            },
        );
    }

    let pipeline = tokio::time::timeout(Duration::from_secs(5), run_handle).await.unwrap().unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Complete);
    assert!(pipeline.dropped_hosts.is_empty());
}

#[tokio::test]
async fn a_host_that_fails_its_stage_is_dropped_and_pipeline_reports_partial() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("events.wal"), 0).unwrap();
    let (bus, _reader) = EventBus::new(wal);

    let mut state = MaterializedState::default();
    for id in ["web-01", "web-02"] {
        let host = online_host(id);
        state.apply_event(&Event::HostRegistered {
            host_id: host.id.clone(),
            host_type: host.host_type,
            agent_version: host.agent_version.clone(),
            os_version: host.os_version.clone(),
        });
        state.hosts.get_mut(&host.id).unwrap().status = HostStatus::Online;
    }
    let state = Arc::new(PLMutex::new(state));

    let broadcaster = Arc::new(FakeBroadcaster::default());
    let manager = Arc::new(LifecycleManager::new(
        Arc::clone(&state),
        bus.clone(),
        NoopAgentSender,
        Arc::clone(&broadcaster),
        FakeClock::new(),
    ));

    let logs_dir = tempdir().unwrap();
    let run = PipelineRun::new(Arc::clone(&state), bus, Arc::clone(&manager), Arc::clone(&broadcaster), FakeClock::new(), logs_dir.path().to_path_buf());
    let hosts = vec![HostId::new("web-01"), HostId::new("web-02")];
    let pipeline = run.new_pipeline(PipelineDefId::ForceUpdate, hosts, 1_000);

    let run_handle = tokio::spawn(async move { run.run(pipeline).await });

    settle().await;
    manager.handle_status(&HostId::new("web-01"), OpId::ForceRebuild, 0, None);
    manager.handle_status(&HostId::new("web-02"), OpId::ForceRebuild, 1, Some("build error".to_string()));

    settle().await;
    manager.handle_status(&HostId::new("web-01"), OpId::Restart, 0, None);
    settle().await;
    manager.handle_reconnect(
        &HostId::new("web-01"),
        &AgentFreshness {
            source_commit: "new".to_string(),
            store_path: "/nix/store/new".to_string(),
            binary_hash: "new".to_string(),
        },
    );

    let pipeline = tokio::time::timeout(Duration::from_secs(5), run_handle).await.unwrap().unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Partial);
    assert_eq!(pipeline.dropped_hosts, vec![HostId::new("web-02")]);
}

#[tokio::test]
async fn cancel_handle_stops_the_pipeline_before_its_next_stage() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path().join("events.wal"), 0).unwrap();
    let (bus, _reader) = EventBus::new(wal);

    let mut state = MaterializedState::default();
    let host = online_host("web-01");
    state.apply_event(&Event::HostRegistered {
        host_id: host.id.clone(),
        host_type: host.host_type,
        agent_version: host.agent_version.clone(),
        os_version: host.os_version.clone(),
    });
    state.hosts.get_mut(&host.id).unwrap().status = HostStatus::Online;
    let state = Arc::new(PLMutex::new(state));

    let broadcaster = Arc::new(FakeBroadcaster::default());
    let manager = Arc::new(LifecycleManager::new(
        Arc::clone(&state),
        bus.clone(),
        NoopAgentSender,
        Arc::clone(&broadcaster),
        FakeClock::new(),
    ));

    let logs_dir = tempdir().unwrap();
    let run = PipelineRun::new(Arc::clone(&state), bus, Arc::clone(&manager), Arc::clone(&broadcaster), FakeClock::new(), logs_dir.path().to_path_buf());
    let cancel = run.cancel_handle();
    let hosts = vec![HostId::new("web-01")];
    let pipeline = run.new_pipeline(PipelineDefId::ForceUpdate, hosts, 1_000);

    let run_handle = tokio::spawn(async move { run.run(pipeline).await });

    settle().await;
    manager.handle_status(&HostId::new("web-01"), OpId::ForceRebuild, 0, None);
    cancel.store(true, Ordering::Relaxed);

    let pipeline = tokio::time::timeout(Duration::from_secs(5), run_handle).await.unwrap().unwrap();
    assert_eq!(pipeline.status, PipelineStatus::Cancelled);
}
