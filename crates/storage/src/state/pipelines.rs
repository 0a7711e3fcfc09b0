// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline lifecycle event handlers.

use nf_core::Event;

use super::MaterializedState;

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::PipelineCreated { pipeline } | Event::PipelineUpdated { pipeline } => {
            state.pipelines.insert(pipeline.id, pipeline.clone());
        }
        _ => {}
    }
}
