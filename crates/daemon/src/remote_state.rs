// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Remote Desired State Source: polls the fleet's config repo publisher
//! for the current `{gitCommit, lockHash}` pair that hosts are measured
//! against for the Git and Lock compartments.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::compartment::RemoteDesiredState;

#[derive(Debug, Deserialize)]
struct PublisherResponse {
    git_commit: String,
    lock_hash: String,
}

/// Shared handle: cloned into the poll task and into every request handler
/// that needs the current desired state.
#[derive(Clone)]
pub struct RemoteStateSource {
    inner: Arc<Inner>,
}

struct Inner {
    cache: RwLock<Option<RemoteDesiredState>>,
    force_refresh: Notify,
    client: reqwest::Client,
    url: Option<String>,
}

impl RemoteStateSource {
    pub fn new(url: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache: RwLock::new(None),
                force_refresh: Notify::new(),
                client: reqwest::Client::new(),
                url,
            }),
        }
    }

    /// Current cached desired state, or `None` if the publisher has never
    /// answered successfully (no `NF_REMOTE_STATE_URL`, or every poll failed).
    pub fn current(&self) -> Option<RemoteDesiredState> {
        self.inner.cache.read().clone()
    }

    /// Wakes the poll loop immediately instead of waiting out the TTL.
    /// Used by `POST /api/hosts/{id}/refresh`.
    pub fn force_refresh(&self) {
        self.inner.force_refresh.notify_one();
    }

    async fn poll_once(&self) {
        let Some(url) = &self.inner.url else { return };
        match self.inner.client.get(url).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json::<PublisherResponse>().await {
                    Ok(body) => {
                        *self.inner.cache.write() =
                            Some(RemoteDesiredState { git_commit: body.git_commit, lock_hash: body.lock_hash });
                        debug!("remote desired state refreshed");
                    }
                    Err(e) => warn!("remote desired state publisher returned unparseable body: {e}"),
                },
                Err(e) => warn!("remote desired state publisher returned an error status: {e}"),
            },
            Err(e) => warn!("remote desired state publisher unreachable: {e}"),
        }
    }

    /// Runs until `cancel` fires: polls on `ttl`, or immediately whenever
    /// `force_refresh` is called.
    pub async fn run(self, ttl: Duration, cancel: CancellationToken) {
        self.poll_once().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(ttl) => self.poll_once().await,
                _ = self.inner.force_refresh.notified() => self.poll_once().await,
            }
        }
    }
}

#[cfg(test)]
#[path = "remote_state_tests.rs"]
mod tests;
