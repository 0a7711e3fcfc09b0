// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn display_combines_code_and_message() {
    let err = ValidationError::new(ValidationCode::GitOutdated, "git must be current before switch");
    assert_eq!(err.to_string(), "git_outdated: git must be current before switch");
}

#[test]
fn code_serializes_snake_case() {
    let json = serde_json::to_string(&ValidationCode::AlreadyCurrent).unwrap();
    assert_eq!(json, "\"already_current\"");
}
