// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;

#[test]
fn current_is_none_before_any_successful_poll() {
    let source = RemoteStateSource::new(None);
    assert!(source.current().is_none());
}

#[tokio::test]
async fn run_exits_promptly_once_cancelled() {
    let source = RemoteStateSource::new(None);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(source.run(Duration::from_secs(60), cancel.clone()));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn force_refresh_wakes_the_poll_loop_without_waiting_out_the_ttl() {
    let source = RemoteStateSource::new(None);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(source.clone().run(Duration::from_secs(3600), cancel.clone()));

    tokio::task::yield_now().await;
    source.force_refresh();
    // With no URL configured, a forced poll is a no-op — this just proves
    // the notify doesn't panic or deadlock the loop.
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}
