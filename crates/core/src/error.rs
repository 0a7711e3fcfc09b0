// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-validation error vocabulary shared by the Lifecycle Manager and the
//! HTTP API's blocked-response bodies.

use serde::{Deserialize, Serialize};

use crate::simple_display;

/// Machine-readable reason a dispatch was blocked before any command row
/// was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    HostOffline,
    CommandActive,
    GitOutdated,
    AlreadyCurrent,
    UnknownOp,
    UnknownPipeline,
    TotpRequired,
    TotpInvalid,
}

simple_display! {
    ValidationCode {
        HostOffline => "host_offline",
        CommandActive => "command_active",
        GitOutdated => "git_outdated",
        AlreadyCurrent => "already_current",
        UnknownOp => "unknown_op",
        UnknownPipeline => "unknown_pipeline",
        TotpRequired => "totp_required",
        TotpInvalid => "totp_invalid",
    }
}

/// A pre-validation failure: no command row is created, no state mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
