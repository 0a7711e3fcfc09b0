// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn host_id_roundtrips_through_json() {
    let id = HostId::new("web-01");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"web-01\"");
    let back: HostId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn host_id_reregistration_is_equal() {
    let a = HostId::from("web-01".to_string());
    let b = HostId::from("web-01");
    assert_eq!(a, b);
}

#[test]
fn command_id_generates_unique_values() {
    let a = CommandId::new();
    let b = CommandId::new();
    assert_ne!(a, b);
}

#[test]
fn command_id_parses_from_display() {
    let id = CommandId::new();
    let parsed: CommandId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn pipeline_id_parse_rejects_garbage() {
    assert!("not-a-uuid".parse::<PipelineId>().is_err());
}
