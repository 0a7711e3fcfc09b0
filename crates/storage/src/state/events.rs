// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audit log append handler.

use nf_core::Event;

use super::{MaterializedState, EVENT_LOG_CAPACITY};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    if let Event::EventAppended { entry } = event {
        let mut entry = entry.clone();
        entry.id = state.next_event_id;
        state.next_event_id += 1;
        state.events.push_back(entry);
        while state.events.len() > EVENT_LOG_CAPACITY {
            state.events.pop_front();
        }
    }
}
