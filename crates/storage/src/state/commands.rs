// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command lifecycle event handlers.

use nf_core::{CommandStatus, Event};

use super::MaterializedState;

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::CommandCreated { command } => {
            if let Some(host) = state.hosts.get_mut(&command.host_id) {
                host.pending_command = Some(command.id);
            }
            state.commands.insert(command.id, command.clone());
        }

        Event::CommandUpdated { command } => {
            state.commands.insert(command.id, command.clone());
        }

        Event::PendingCommandCleared { host_id, command_id } => {
            if let Some(host) = state.hosts.get_mut(host_id) {
                if host.pending_command == Some(*command_id) {
                    host.pending_command = None;
                }
            }
        }

        Event::CommandOrphaned { command } => {
            let mut orphaned = command.clone();
            orphaned.status = CommandStatus::Error;
            orphaned.error_code = Some("ORPHANED".to_string());
            orphaned.error_message = Some("dashboard restarted".to_string());
            state.commands.insert(orphaned.id, orphaned);
            if let Some(host) = state.hosts.get_mut(&command.host_id) {
                if host.pending_command == Some(command.id) {
                    host.pending_command = None;
                }
            }
        }

        _ => {}
    }
}
