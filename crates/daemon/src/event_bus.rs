// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable event fan-in: every mutation the daemon produces is appended to
//! the WAL before anything downstream (state fold, broadcast) observes it.

use std::sync::Arc;

use nf_core::Event;
use nf_storage::{Wal, WalEntry, WalError};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Handle for appending events to the WAL. Cheap to clone — every clone
/// shares the same underlying file handle and notifies the same reader.
#[derive(Clone)]
pub struct EventBus {
    pub wal: Arc<Mutex<Wal>>,
    notify: Arc<Notify>,
}

impl EventBus {
    pub fn new(wal: Wal) -> (Self, EventReader) {
        let wal = Arc::new(Mutex::new(wal));
        let notify = Arc::new(Notify::new());
        let bus = Self { wal: Arc::clone(&wal), notify: Arc::clone(&notify) };
        let reader = EventReader { wal, notify };
        (bus, reader)
    }

    /// Appends an event to the WAL and wakes the reader. Does not flush —
    /// callers that need a durability guarantee before continuing should
    /// flush explicitly (`wal.lock().flush()`).
    pub fn send(&self, event: Event) -> Result<u64, WalError> {
        let seq = self.wal.lock().append(&event)?;
        self.notify.notify_one();
        Ok(seq)
    }
}

/// Sequential reader over the WAL's unprocessed tail, used by the engine
/// loop to observe every appended event exactly once.
pub struct EventReader {
    wal: Arc<Mutex<Wal>>,
    notify: Arc<Notify>,
}

impl EventReader {
    /// The WAL sequence number up through which every entry has been handed
    /// to this reader. Used to pick the `seq` a snapshot checkpoint is taken at.
    pub fn processed_seq(&self) -> u64 {
        self.wal.lock().processed_seq()
    }

    /// Waits for and returns the next unprocessed entry, marking it processed
    /// once handed to the caller. Never returns `Err` for "nothing yet" —
    /// it parks on the notifier instead of busy-polling.
    pub async fn recv(&mut self) -> Result<WalEntry, WalError> {
        loop {
            if let Some(entry) = self.wal.lock().next_unprocessed()? {
                self.wal.lock().mark_processed(entry.seq);
                return Ok(entry);
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
#[path = "event_bus_tests.rs"]
mod tests;
