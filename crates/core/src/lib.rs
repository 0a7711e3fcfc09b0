// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! nf-core: domain types shared by every other NixFleet crate.
//!
//! Host, Command, Pipeline, Event, the Compartment model, and the static
//! Op/Pipeline catalogs all live here. No I/O — everything below is pure
//! data and pure functions over that data.

pub mod macros;

pub mod audit;
pub mod catalog;
pub mod clock;
pub mod command;
pub mod compartment;
pub mod error;
pub mod event;
pub mod freshness;
pub mod host;
pub mod ids;
pub mod pipeline;
pub mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use audit::{AuditEntry, EventCategory, EventLevel};
pub use catalog::{
    op_def, pipeline_def, Executor, OpDef, OpId, PipelineDef, PipelineDefId, PostCompletionModel, OPS,
    PIPELINES,
};
pub use clock::{Clock, FakeClock, SystemClock};
pub use command::{Command, CommandStatus, PreDispatchSnapshot};
pub use compartment::{Compartment, CompartmentSnapshot, CompartmentState, CompartmentStatus};
pub use error::{ValidationCode, ValidationError};
pub use event::Event;
pub use freshness::{compare_freshness, AgentFreshness, FreshnessVerdict};
pub use host::{Host, HostStatus, HostType};
pub use ids::{CommandId, HostId, PipelineId};
pub use pipeline::{Pipeline, PipelineStatus};
pub use version::StateVersion;
