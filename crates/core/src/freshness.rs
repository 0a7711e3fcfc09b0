// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent-freshness triple used for three-layer post-switch verification.

use serde::{Deserialize, Serialize};

/// `{source_commit, store_path, binary_hash}` reported by the running agent binary.
///
/// Compared against a pre-dispatch snapshot on reconnect to decide whether a
/// `switch`-class op actually took effect (see `Verdict`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFreshness {
    #[serde(default)]
    pub source_commit: String,
    #[serde(default)]
    pub store_path: String,
    #[serde(default)]
    pub binary_hash: String,
}

impl AgentFreshness {
    pub fn is_empty(&self) -> bool {
        self.source_commit.is_empty() && self.store_path.is_empty() && self.binary_hash.is_empty()
    }
}

/// The outcome of comparing a pre-dispatch freshness snapshot against the
/// freshness reported on the agent's post-switch reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessVerdict {
    /// `store_path` or `binary_hash` changed: the new binary is actually running.
    Fresh,
    /// `source_commit` changed but neither `store_path` nor `binary_hash` did —
    /// the commit advanced but the binary didn't, which usually means a cache issue.
    Suspicious,
    /// Nothing changed: the switch silently did not take effect.
    Stale,
    /// One of the two snapshots was empty; there isn't enough data to tell.
    Insufficient,
}

/// Implements the three-layer freshness decision matrix from the Lifecycle Manager's
/// reconnect-verification step.
pub fn compare_freshness(before: &AgentFreshness, after: &AgentFreshness) -> FreshnessVerdict {
    if before.is_empty() || after.is_empty() {
        return FreshnessVerdict::Insufficient;
    }
    let binary_changed = before.store_path != after.store_path || before.binary_hash != after.binary_hash;
    let commit_changed = before.source_commit != after.source_commit;
    match (binary_changed, commit_changed) {
        (true, _) => FreshnessVerdict::Fresh,
        (false, true) => FreshnessVerdict::Suspicious,
        (false, false) => FreshnessVerdict::Stale,
    }
}

#[cfg(test)]
#[path = "freshness_tests.rs"]
mod tests;
