// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The five derived per-host health indicators and their pure derivation.

use serde::{Deserialize, Serialize};


/// One of the five compartments tracked per host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compartment {
    Agent,
    Git,
    Lock,
    System,
    Tests,
}

crate::simple_display! {
    Compartment {
        Agent => "agent",
        Git => "git",
        Lock => "lock",
        System => "system",
        Tests => "tests",
    }
}

/// The state a compartment can be rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompartmentState {
    Unknown,
    Ok,
    Outdated,
    Error,
    /// Tests compartment only: a test run is currently in progress.
    Working,
}

crate::simple_display! {
    CompartmentState {
        Unknown => "unknown",
        Ok => "ok",
        Outdated => "outdated",
        Error => "error",
        Working => "working",
    }
}

/// A single compartment's current state plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompartmentStatus {
    pub state: CompartmentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CompartmentStatus {
    pub fn new(state: CompartmentState) -> Self {
        Self { state, message: None }
    }

    pub fn with_message(state: CompartmentState, message: impl Into<String>) -> Self {
        Self { state, message: Some(message.into()) }
    }

    pub fn is_ok(&self) -> bool {
        self.state == CompartmentState::Ok
    }
}

/// All five compartments for a single host, as returned by the deriver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompartmentSnapshot {
    pub agent: CompartmentStatus,
    pub git: CompartmentStatus,
    pub lock: CompartmentStatus,
    pub system: CompartmentStatus,
    pub tests: CompartmentStatus,
}

#[cfg(test)]
#[path = "compartment_tests.rs"]
mod tests;
