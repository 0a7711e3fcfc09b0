// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log: one JSON-encoded [`Event`] per line, `seq`-numbered.
//!
//! Corrupt or non-UTF-8 trailing data is treated as the tail of an
//! interrupted write: the corrupt suffix is rotated out to a `.bak` file
//! (same rotation scheme as [`crate::snapshot::rotate_bak_path`]) and replay
//! continues from the last well-formed line.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nf_core::Event;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::rotate_bak_path;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single WAL record: its sequence number plus the event it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// How many buffered-but-unflushed appends trigger a flush on the next
/// `needs_flush` check, independent of the periodic flush interval.
const FLUSH_THRESHOLD: u64 = 100;

pub struct Wal {
    path: PathBuf,
    file: File,
    write_seq: u64,
    processed_seq: u64,
    /// Internal enumeration cursor for `next_unprocessed`, seeded from
    /// `processed_seq` at open time but advanced independently of it —
    /// `mark_processed` is the caller's durability checkpoint, this is just
    /// "what have I already handed out this session."
    read_cursor: u64,
    unflushed: u64,
}

impl Wal {
    /// Opens (creating if absent) the WAL at `path`. `processed_seq` is the
    /// sequence number up to which a loaded snapshot already accounts for;
    /// [`Wal::next_unprocessed`] starts just past it.
    ///
    /// If the file's tail is corrupt (malformed JSON or non-UTF-8 bytes),
    /// the corrupt suffix is rotated to a `.bak` file and the clean prefix
    /// is kept, preserving every well-formed entry already durable.
    pub fn open(path: impl AsRef<Path>, processed_seq: u64) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            File::create(&path)?;
        }

        let (write_seq, valid_bytes, corrupt) = scan(&path)?;
        if corrupt {
            let bak = rotate_bak_path(&path);
            let raw = fs::read(&path)?;
            fs::write(&bak, &raw)?;
            fs::write(&path, &raw[..valid_bytes])?;
        }

        let file = OpenOptions::new().append(true).read(true).open(&path)?;
        Ok(Self { path, file, write_seq, processed_seq, read_cursor: processed_seq, unflushed: 0 })
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    /// Appends `event`, returning its assigned sequence number. Buffered in
    /// the OS page cache until [`Wal::flush`].
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        self.write_seq += 1;
        let entry = WalEntry { seq: self.write_seq, event: event.clone() };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.unflushed += 1;
        Ok(self.write_seq)
    }

    pub fn flush(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.unflushed = 0;
        Ok(())
    }

    pub fn needs_flush(&self) -> bool {
        self.unflushed >= FLUSH_THRESHOLD
    }

    /// Marks `seq` as folded into `MaterializedState`; `next_unprocessed`
    /// will not return it (or anything earlier) again this session.
    pub fn mark_processed(&mut self, seq: u64) {
        if seq > self.processed_seq {
            self.processed_seq = seq;
        }
    }

    /// Reads the next entry past the internal read cursor, advancing it on
    /// success. Corrupt lines encountered along the way are skipped, not
    /// treated as the end of the log — only EOF without a further valid
    /// entry yields `Ok(None)`.
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, WalError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut line = String::new();
        loop {
            line.clear();
            let read = read_line_lossy(&mut reader, &mut line)?;
            if read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<WalEntry>(trimmed) else {
                continue;
            };
            if entry.seq > self.read_cursor {
                self.read_cursor = entry.seq;
                return Ok(Some(entry));
            }
        }
    }

    /// All entries with `seq > after`, in order. Stops at the first corrupt
    /// or non-UTF-8 line rather than erroring.
    pub fn entries_after(&self, after: u64) -> Result<Vec<WalEntry>, WalError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut out = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if read_line_lossy(&mut reader, &mut line)? == 0 {
                break;
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<WalEntry>(trimmed) else {
                break;
            };
            if entry.seq > after {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Rewrites the WAL keeping only entries with `seq >= keep_from`,
    /// called after a snapshot checkpoint has durably captured everything
    /// before it.
    pub fn truncate_before(&mut self, keep_from: u64) -> Result<(), WalError> {
        let kept = self.entries_after(keep_from.saturating_sub(1))?;
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut f = File::create(&tmp)?;
            for entry in &kept {
                let mut line = serde_json::to_vec(entry)?;
                line.push(b'\n');
                f.write_all(&line)?;
            }
            f.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.file = OpenOptions::new().append(true).read(true).open(&self.path)?;
        Ok(())
    }
}

/// Reads a line, tolerating non-UTF-8 bytes by reading raw and lossily
/// converting rather than erroring the whole WAL out.
fn read_line_lossy(reader: &mut BufReader<File>, out: &mut String) -> io::Result<usize> {
    let mut buf = Vec::new();
    let read = reader.read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Ok(0);
    }
    out.push_str(&String::from_utf8_lossy(&buf));
    Ok(read)
}

/// Scans the whole file once, returning `(last_valid_seq, valid_byte_len, found_corruption)`.
fn scan(path: &Path) -> io::Result<(u64, usize, bool)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut seq = 0u64;
    let mut valid_bytes = 0usize;
    let mut corrupt = false;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        let text = String::from_utf8(buf.clone());
        let parsed = text.ok().and_then(|t| serde_json::from_str::<WalEntry>(t.trim_end()).ok());
        match parsed {
            Some(entry) if entry.seq == seq + 1 => {
                seq = entry.seq;
                valid_bytes += read;
            }
            _ => {
                corrupt = true;
                break;
            }
        }
    }

    reader.seek(SeekFrom::Start(0))?;
    Ok((seq, valid_bytes, corrupt))
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
