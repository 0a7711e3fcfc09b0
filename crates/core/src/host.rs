// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Host record: identity, liveness, declarative state, and compartment cache.

use serde::{Deserialize, Serialize};

use crate::compartment::CompartmentStatus;
use crate::freshness::AgentFreshness;
use crate::ids::{CommandId, HostId};

/// Which platform a host's agent manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    Nixos,
    Macos,
}

crate::simple_display! {
    HostType {
        Nixos => "nixos",
        Macos => "macos",
    }
}

/// Liveness as tracked by the Connection Hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
}

crate::simple_display! {
    HostStatus {
        Online => "online",
        Offline => "offline",
    }
}

/// A single host in the fleet.
///
/// `pending_command` is owned exclusively by the Lifecycle Manager — every
/// other component may read it but must never write it directly. Liveness
/// and freshness fields are owned by the Connection Hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub host_type: HostType,
    pub status: HostStatus,
    #[serde(default)]
    pub last_seen_epoch_ms: u64,

    // Declarative state reported by the agent.
    #[serde(default)]
    pub generation: String,
    #[serde(default)]
    pub lock_hash: String,
    #[serde(default)]
    pub nixpkgs_version: String,
    #[serde(default)]
    pub agent_version: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub freshness: AgentFreshness,

    // Derived, single-writer field (Lifecycle Manager only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_command: Option<CommandId>,

    // Compartment cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_status: Option<CompartmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_status: Option<CompartmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_status: Option<CompartmentStatus>,
    /// The deployed `generation` that `tests_status` actually applies to.
    #[serde(default)]
    pub tests_generation: String,

    // Human-configured fields, preserved verbatim across re-registration.
    #[serde(default)]
    pub theme_color: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub repo_dir: String,

    /// Soft-delete: removal marks the host invisible without discarding
    /// its audit history.
    #[serde(default)]
    pub removed: bool,
}

impl Host {
    /// Builds the initial row for a never-before-seen host's first `register`.
    pub fn new(id: HostId, host_type: HostType) -> Self {
        Self {
            id,
            host_type,
            status: HostStatus::Offline,
            last_seen_epoch_ms: 0,
            generation: String::new(),
            lock_hash: String::new(),
            nixpkgs_version: String::new(),
            agent_version: String::new(),
            os_version: String::new(),
            freshness: AgentFreshness::default(),
            pending_command: None,
            lock_status: None,
            system_status: None,
            tests_status: None,
            tests_generation: String::new(),
            theme_color: String::new(),
            location: String::new(),
            device_type: String::new(),
            repo_url: String::new(),
            repo_dir: String::new(),
            removed: false,
        }
    }

    pub fn has_active_command(&self) -> bool {
        self.pending_command.is_some()
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
