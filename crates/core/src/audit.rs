// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The append-only audit/event log row surfaced to the dashboard's event feed.

use serde::{Deserialize, Serialize};

use crate::ids::HostId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Audit,
    System,
    Error,
    Command,
    Ops,
}

crate::simple_display! {
    EventCategory {
        Audit => "audit",
        System => "system",
        Error => "error",
        Command => "command",
        Ops => "ops",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Success,
    Warn,
    Error,
}

crate::simple_display! {
    EventLevel {
        Debug => "debug",
        Info => "info",
        Success => "success",
        Warn => "warn",
        Error => "error",
    }
}

/// One row of the append-only event log (`§3 Event` in the data model).
///
/// `id` is assigned by the State Store at append time and is immutable
/// thereafter — it's also the sort key events are retained/evicted by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: u64,
    pub timestamp_epoch_ms: u64,
    pub category: EventCategory,
    pub level: EventLevel,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<HostId>,
    pub action: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
