// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use nf_core::{Host, HostType};

fn host() -> Host {
    Host::new(nf_core::HostId::new("web-01"), HostType::Nixos)
}

#[test]
fn init_carries_state_and_version() {
    let msg = ServerSyncMessage::Init {
        state: FullState {
            hosts: vec![host()],
            active_and_recent_commands: vec![],
            active_pipelines: vec![],
            recent_events: vec![],
        },
        version: StateVersion(1),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "init");
    assert_eq!(json["version"], 1);
}

#[test]
fn delta_tags_change_type_distinctly_from_message_type() {
    let msg = ServerSyncMessage::Delta {
        change: Change::HostUpdated { host: host() },
        version: StateVersion(7),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "delta");
    assert_eq!(json["change"]["change"], "host_updated");
}

#[test]
fn get_state_round_trips() {
    let json = serde_json::to_string(&ClientSyncMessage::GetState).unwrap();
    let back: ClientSyncMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ClientSyncMessage::GetState);
}

#[test]
fn sync_frame_carries_only_version() {
    let msg = ServerSyncMessage::Sync { version: StateVersion(42) };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "sync");
    assert_eq!(json["version"], 42);
    assert!(json.get("state").is_none());
}
