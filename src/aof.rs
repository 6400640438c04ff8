//! Append-Only File persistence
//!
//! Every mutating command is serialized in its RESP wire form and appended
//! to a single log file, records concatenated without any extra framing.
//! On startup the file is replayed through the dispatcher to rebuild the
//! keyspace.
//!
//! ## Durability policies
//!
//! | Policy     | After each append          | Timer tick                |
//! |------------|----------------------------|---------------------------|
//! | `always`   | fsync before returning     | none                      |
//! | `everysec` | mark dirty                 | fsync if dirty (1000 ms)  |
//! | `no`       | mark dirty                 | none (OS decides)         |
//!
//! Replay is best-effort at the tail: a final record cut short by a crash
//! is ignored, while a malformed record anywhere is corruption and aborts
//! startup.

use crate::protocol::{self, ParseError, RespValue};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// How aggressively appends are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// fsync after every append, before the command replies.
    Always,
    /// Mark dirty; a repeating 1-second timer performs the fsync.
    #[default]
    Everysec,
    /// Mark dirty and leave flushing entirely to the operating system.
    No,
}

impl FsyncPolicy {
    /// Parses the `appendfsync` configuration value.
    pub fn from_config(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Some(FsyncPolicy::Always),
            "everysec" => Some(FsyncPolicy::Everysec),
            "no" => Some(FsyncPolicy::No),
            _ => None,
        }
    }
}

/// Errors surfaced by the AOF layer.
#[derive(Debug, Error)]
pub enum AofError {
    /// Filesystem failure while reading or writing the log
    #[error("aof I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The log contains a malformed RESP record
    #[error("aof corrupt: {0}")]
    Corrupt(#[from] ParseError),
}

/// The append-only command log.
#[derive(Debug)]
pub struct Aof {
    file: File,
    path: PathBuf,
    policy: FsyncPolicy,
    dirty: bool,
}

impl Aof {
    /// Opens the log for appending, creating it if absent.
    pub fn open(path: impl Into<PathBuf>, policy: FsyncPolicy) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file,
            path,
            policy,
            dirty: false,
        })
    }

    /// The configured durability policy.
    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    /// Serializes one command and appends it to the log.
    ///
    /// Under `always` the record is fsynced before this returns, so a
    /// successful return means the command is durable.
    pub fn append(&mut self, command: &RespValue) -> std::io::Result<()> {
        let bytes = command.serialize();
        self.file.write_all(&bytes)?;
        match self.policy {
            FsyncPolicy::Always => self.file.sync_data()?,
            FsyncPolicy::Everysec | FsyncPolicy::No => self.dirty = true,
        }
        Ok(())
    }

    /// Flushes pending appends to stable storage if any are outstanding.
    ///
    /// Driven by the 1-second timer under the `everysec` policy.
    pub fn flush(&mut self) -> std::io::Result<()> {
        if self.dirty {
            self.file.sync_data()?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Reads the whole log back as a sequence of RESP command arrays.
    ///
    /// A trailing incomplete record (torn final write) is skipped; any
    /// malformed record is corruption and fails the load.
    pub fn load_commands(&self) -> Result<Vec<RespValue>, AofError> {
        let mut contents = Vec::new();
        File::open(&self.path)?.read_to_end(&mut contents)?;

        let mut commands = Vec::new();
        let mut offset = 0;
        while offset < contents.len() {
            match protocol::parse(&contents[offset..])? {
                Some((value, consumed)) => {
                    commands.push(value);
                    offset += consumed;
                }
                None => {
                    warn!(
                        trailing_bytes = contents.len() - offset,
                        "ignoring incomplete record at end of AOF"
                    );
                    break;
                }
            }
        }
        Ok(commands)
    }
}
