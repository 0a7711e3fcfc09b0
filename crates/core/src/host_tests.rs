// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn new_host_starts_offline_with_no_pending_command() {
    let host = Host::new(HostId::new("web-01"), HostType::Nixos);
    assert_eq!(host.status, HostStatus::Offline);
    assert!(!host.has_active_command());
    assert!(host.pending_command.is_none());
}

#[test]
fn has_active_command_reflects_pending_command() {
    let mut host = Host::new(HostId::new("web-01"), HostType::Macos);
    assert!(!host.has_active_command());
    host.pending_command = Some(CommandId::new());
    assert!(host.has_active_command());
}

#[test]
fn serializes_host_type_lowercase() {
    let host = Host::new(HostId::new("mac-mini"), HostType::Macos);
    let json = serde_json::to_value(&host).unwrap();
    assert_eq!(json["host_type"], "macos");
    assert_eq!(json["status"], "offline");
}
