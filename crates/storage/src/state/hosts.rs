// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host lifecycle event handlers.

use nf_core::{Event, Host, HostStatus};

use super::helpers;
use super::MaterializedState;

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::HostRegistered { host_id, host_type, agent_version, os_version } => {
            let host = state.hosts.entry(host_id.clone()).or_insert_with(|| Host::new(host_id.clone(), *host_type));
            host.host_type = *host_type;
            host.agent_version = agent_version.clone();
            host.os_version = os_version.clone();
            host.status = HostStatus::Online;
            host.last_seen_epoch_ms = helpers::epoch_ms_now();
            host.removed = false;
        }

        Event::HostHeartbeat {
            host_id,
            timestamp_epoch_ms,
            generation,
            lock_hash,
            nixpkgs_version,
            freshness,
            ..
        } => {
            if let Some(host) = state.hosts.get_mut(host_id) {
                host.status = HostStatus::Online;
                host.last_seen_epoch_ms = *timestamp_epoch_ms;
                host.generation = generation.clone();
                host.lock_hash = lock_hash.clone();
                host.nixpkgs_version = nixpkgs_version.clone();
                host.freshness = freshness.clone();
            }
        }

        Event::HostOffline { host_id } => {
            if let Some(host) = state.hosts.get_mut(host_id) {
                host.status = HostStatus::Offline;
            }
        }

        Event::HostRemoved { host_id } => {
            if let Some(host) = state.hosts.get_mut(host_id) {
                host.removed = true;
            }
        }

        Event::HostConfigUpdated { host_id, theme_color, location, device_type, repo_url, repo_dir } => {
            if let Some(host) = state.hosts.get_mut(host_id) {
                if let Some(c) = theme_color {
                    host.theme_color = c.clone();
                }
                if let Some(l) = location {
                    host.location = l.clone();
                }
                if let Some(d) = device_type {
                    host.device_type = d.clone();
                }
                if let Some(r) = repo_url {
                    host.repo_url = r.clone();
                }
                if let Some(r) = repo_dir {
                    host.repo_dir = r.clone();
                }
            }
        }

        Event::HostCompartmentsUpdated { host_id, lock_status, system_status, tests_status, tests_generation } => {
            if let Some(host) = state.hosts.get_mut(host_id) {
                host.lock_status = Some(lock_status.clone());
                host.system_status = Some(system_status.clone());
                host.tests_status = Some(tests_status.clone());
                host.tests_generation = tests_generation.clone();
            }
        }

        _ => {}
    }
}
