// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Compartment Deriver: a pure function from a host's declared state and
//! the remote desired state to the five rendered compartment statuses.
//!
//! Kept free of I/O and locking on purpose — callers (the heartbeat handler,
//! the `refresh` HTTP route) own fetching the inputs and persisting the
//! result as a [`nf_core::Event::HostCompartmentsUpdated`].

use nf_core::{Compartment, CompartmentSnapshot, CompartmentState, CompartmentStatus, Host};

/// `{gitCommit, lockHash}` as last published by the fleet's config repo,
/// or `None` if the Remote Desired State Source could not be reached.
#[derive(Debug, Clone)]
pub struct RemoteDesiredState {
    pub git_commit: String,
    pub lock_hash: String,
}

/// What the most recent agent-class command against this host resolved to,
/// used to infer the System compartment without running an expensive check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastCommandSignal {
    /// No command has completed for this host yet.
    None,
    SuccessfulSwitch,
    /// A `pull` succeeded and changed the desired inputs (so a switch is owed).
    SuccessfulPullChangedDesired,
    FailedSwitch,
}

fn ok() -> CompartmentStatus {
    CompartmentStatus::new(CompartmentState::Ok)
}

fn unknown() -> CompartmentStatus {
    CompartmentStatus::new(CompartmentState::Unknown)
}

fn derive_agent(host: &Host, dashboard_agent_version: &str) -> CompartmentStatus {
    if host.agent_version.is_empty() {
        return unknown();
    }
    if host.agent_version != dashboard_agent_version {
        return CompartmentStatus::with_message(
            CompartmentState::Error,
            format!("agent {} != dashboard {dashboard_agent_version}", host.agent_version),
        );
    }
    ok()
}

fn derive_git(host: &Host, remote: Option<&RemoteDesiredState>) -> CompartmentStatus {
    if host.generation.is_empty() {
        return unknown();
    }
    match remote {
        None => CompartmentStatus::with_message(CompartmentState::Error, "remote desired state unavailable"),
        Some(remote) if host.generation == remote.git_commit => ok(),
        Some(_) => CompartmentStatus::new(CompartmentState::Outdated),
    }
}

fn derive_lock(host: &Host, remote: Option<&RemoteDesiredState>) -> CompartmentStatus {
    if host.lock_hash.is_empty() {
        return unknown();
    }
    match remote {
        None => CompartmentStatus::with_message(CompartmentState::Error, "remote desired state unavailable"),
        Some(remote) if host.lock_hash == remote.lock_hash => ok(),
        Some(_) => CompartmentStatus::new(CompartmentState::Outdated),
    }
}

fn derive_system(git: &CompartmentStatus, lock: &CompartmentStatus, last: LastCommandSignal) -> CompartmentStatus {
    if git.state == CompartmentState::Error || lock.state == CompartmentState::Error {
        return CompartmentStatus::with_message(CompartmentState::Outdated, "verification degraded");
    }
    if git.state == CompartmentState::Outdated || lock.state == CompartmentState::Outdated {
        return CompartmentStatus::new(CompartmentState::Outdated);
    }
    match last {
        LastCommandSignal::SuccessfulSwitch => ok(),
        LastCommandSignal::SuccessfulPullChangedDesired => {
            CompartmentStatus::with_message(CompartmentState::Outdated, "awaiting switch")
        }
        LastCommandSignal::FailedSwitch => CompartmentStatus::new(CompartmentState::Error),
        LastCommandSignal::None => unknown(),
    }
}

fn derive_tests(host: &Host, system: &CompartmentStatus) -> CompartmentStatus {
    let mut status = host.tests_status.clone().unwrap_or_else(unknown);
    if status.state == CompartmentState::Ok && host.tests_generation != host.generation {
        status = CompartmentStatus::new(CompartmentState::Outdated);
    }
    // Remote-gate: Tests is never ok unless System is ok.
    if status.state == CompartmentState::Ok && system.state != CompartmentState::Ok {
        status = CompartmentStatus::new(CompartmentState::Outdated);
    }
    status
}

/// Derives all five compartments for `host`. `last_command` drives the
/// System compartment's inference path; pass `LastCommandSignal::None` when
/// no command history is available (e.g. a freshly registered host).
pub fn derive(
    host: &Host,
    dashboard_agent_version: &str,
    remote: Option<&RemoteDesiredState>,
    last_command: LastCommandSignal,
) -> CompartmentSnapshot {
    let agent = derive_agent(host, dashboard_agent_version);
    let git = derive_git(host, remote);
    let lock = derive_lock(host, remote);
    let system = derive_system(&git, &lock, last_command);
    let tests = derive_tests(host, &system);

    debug_assert!(
        system.state != CompartmentState::Ok
            || (git.state == CompartmentState::Ok && lock.state == CompartmentState::Ok)
    );
    debug_assert!(tests.state != CompartmentState::Ok || system.state == CompartmentState::Ok);

    CompartmentSnapshot { agent, git, lock, system, tests }
}

/// Which compartments changed between two snapshots, in the fixed display
/// order the dashboard renders them in.
pub fn changed(before: &CompartmentSnapshot, after: &CompartmentSnapshot) -> Vec<Compartment> {
    let mut out = Vec::new();
    if before.agent != after.agent {
        out.push(Compartment::Agent);
    }
    if before.git != after.git {
        out.push(Compartment::Git);
    }
    if before.lock != after.lock {
        out.push(Compartment::Lock);
    }
    if before.system != after.system {
        out.push(Compartment::System);
    }
    if before.tests != after.tests {
        out.push(Compartment::Tests);
    }
    out
}

#[cfg(test)]
#[path = "compartment_tests.rs"]
mod tests;
