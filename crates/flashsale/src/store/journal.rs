//! Append-only command journal for [`MemoryStore`](crate::MemoryStore).
//!
//! Every state mutation is written as one JSON object per line and synced
//! before the mutation becomes visible. On open, the journal is replayed in
//! order to rebuild the keyspace.
//!
//! # Recovery
//!
//! A crash mid-write can leave a partial final line. Replay stops there and
//! truncates the file at the start of that line, so the journal always holds
//! a valid prefix of commands. An unreadable line anywhere else is corruption
//! and refuses to open.
//!
//! A failed append is rolled back to the last committed record before the
//! error is returned. If even the rollback fails, the journal refuses every
//! later append rather than write after torn bytes.
//!
//! # Growth
//!
//! The journal records commands, not state, so it grows with every lock
//! round-trip and every delivery. [`Journal::rewrite`] replaces it with the
//! minimal command list that rebuilds the current state.

use crate::{Fields, StoreError, StreamId};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

/// One journaled state mutation.
///
/// Multi-step scripted commands are recorded as a single record so that
/// replay can never observe half of them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Record {
    Set {
        key: String,
        value: String,
        expires_at: Option<u64>,
    },
    Del {
        key: String,
    },
    IncrBy {
        key: String,
        by: i64,
    },
    Admit {
        stock_key: String,
        marker_key: String,
        member: String,
    },
    XAdd {
        key: String,
        id: StreamId,
        fields: Fields,
    },
    GroupCreate {
        key: String,
        group: String,
        last_delivered: StreamId,
    },
    GroupDestroy {
        key: String,
        group: String,
    },
    Deliver {
        key: String,
        group: String,
        consumer: String,
        ids: Vec<StreamId>,
        at: u64,
    },
    Ack {
        key: String,
        group: String,
        ids: Vec<StreamId>,
    },
    /// Written by rewrites only.
    SetMembers {
        key: String,
        members: Vec<String>,
    },
    /// Written by rewrites only: one pending entry with its delivery state.
    Pending {
        key: String,
        group: String,
        id: StreamId,
        consumer: String,
        count: u64,
        delivered_at: u64,
    },
}

pub(crate) struct Journal {
    file: File,
    path: PathBuf,
    /// Length of the committed prefix.
    len: u64,
    poisoned: bool,
}

impl Journal {
    /// Opens (or creates) the journal at `path` and returns it with every
    /// complete record it already holds.
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<Record>), StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let (records, valid_len) = Self::parse(&raw)?;
        if valid_len < raw.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = raw.len() - valid_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let journal = Self {
            file,
            path,
            len: valid_len as u64,
            poisoned: false,
        };
        Ok((journal, records))
    }

    /// Parses complete lines, returning the records and the byte length of
    /// the valid prefix.
    fn parse(raw: &[u8]) -> Result<(Vec<Record>, usize), StoreError> {
        let mut records = Vec::new();
        let mut offset = 0;
        let mut lines = raw.split_inclusive(|b| *b == b'\n').enumerate().peekable();

        while let Some((line_no, line)) = lines.next() {
            let is_last = lines.peek().is_none();
            let complete = line.last() == Some(&b'\n');
            let body = line.strip_suffix(b"\n").unwrap_or(line);

            if body.iter().all(u8::is_ascii_whitespace) && complete {
                offset += line.len();
                continue;
            }

            let parsed = if complete {
                serde_json::from_slice::<Record>(body).ok()
            } else {
                None
            };

            match parsed {
                Some(record) => {
                    records.push(record);
                    offset += line.len();
                }
                // A torn or garbled final line is what a crash mid-append
                // leaves behind.
                None if is_last => break,
                None => return Err(StoreError::CorruptJournal { line: line_no + 1 }),
            }
        }

        Ok((records, offset))
    }

    /// Appends `record` and syncs it to disk.
    ///
    /// On error nothing of the record stays in the file.
    pub(crate) fn append(&mut self, record: &Record) -> Result<(), StoreError> {
        if self.poisoned {
            return Err(StoreError::JournalPoisoned);
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        match self.write_committed(&line) {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(err) => {
                self.rollback();
                Err(err.into())
            }
        }
    }

    fn write_committed(&mut self, line: &[u8]) -> io::Result<()> {
        // Bytes past the committed prefix belong to a write that never
        // completed.
        if self.file.metadata()?.len() != self.len {
            self.file.set_len(self.len)?;
        }
        self.file.write_all(line)?;
        self.file.sync_data()
    }

    fn rollback(&mut self) {
        let truncated = self
            .file
            .set_len(self.len)
            .and_then(|()| self.file.sync_data());
        if let Err(err) = truncated {
            tracing::error!(
                path = %self.path.display(),
                error = %err,
                "failed to roll back a torn journal append; refusing further writes"
            );
            self.poisoned = true;
        }
    }

    /// Atomically replaces the journal with `records`.
    ///
    /// The new journal is written and synced next to the old one, then
    /// renamed over it, so a crash leaves either the old or the new file.
    pub(crate) fn rewrite(&mut self, records: &[Record]) -> Result<(), StoreError> {
        if self.poisoned {
            return Err(StoreError::JournalPoisoned);
        }
        let mut staging = self.path.clone().into_os_string();
        staging.push(".rewrite");
        let staging = PathBuf::from(staging);

        let mut body = Vec::new();
        for record in records {
            serde_json::to_writer(&mut body, record)?;
            body.push(b'\n');
        }
        {
            let mut file = File::create(&staging)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        std::fs::rename(&staging, &self.path)?;
        #[cfg(unix)]
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            File::open(dir)?.sync_all()?;
        }

        self.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.len = body.len() as u64;
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
