// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn triple(commit: &str, path: &str, hash: &str) -> AgentFreshness {
    AgentFreshness {
        source_commit: commit.to_string(),
        store_path: path.to_string(),
        binary_hash: hash.to_string(),
    }
}

#[test]
fn binary_changed_is_fresh() {
    let before = triple("a", "p1", "h1");
    let after = triple("b", "p2", "h1");
    assert_eq!(compare_freshness(&before, &after), FreshnessVerdict::Fresh);
}

#[test]
fn commit_changed_without_binary_is_suspicious() {
    let before = triple("a", "p1", "h1");
    let after = triple("b", "p1", "h1");
    assert_eq!(compare_freshness(&before, &after), FreshnessVerdict::Suspicious);
}

#[test]
fn nothing_changed_is_stale() {
    let before = triple("a", "p1", "h1");
    let after = triple("a", "p1", "h1");
    assert_eq!(compare_freshness(&before, &after), FreshnessVerdict::Stale);
}

#[test]
fn empty_snapshot_is_insufficient() {
    let before = AgentFreshness::default();
    let after = triple("a", "p1", "h1");
    assert_eq!(compare_freshness(&before, &after), FreshnessVerdict::Insufficient);
}
