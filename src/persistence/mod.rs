//! Append-Only Persistence
//!
//! Every state-changing command is appended to a journal file as one RESP
//! array, the same framing clients use on the wire. On startup the journal is
//! replayed from the beginning into an empty store.
//!
//! ```text
//!   client ──► CommandHandler ──► StorageEngine   (1. mutate)
//!                    │
//!                    └──────────► AppendLog        (2. append record)
//!
//!   startup:  AppendLog::load ──► replay::apply_record ──► CommandHandler
//! ```
//!
//! ## File Format
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$4\r\nuser\r\n$3\r\nbob\r\n
//! *3\r\n$5\r\nLPUSH\r\n$4\r\njobs\r\n$2\r\nj1\r\n
//! ```
//!
//! Records are written back to back and never rewritten.

pub mod aof;
pub mod replay;

use std::str::FromStr;
use thiserror::Error;

pub use aof::AppendLog;
pub use replay::{is_replayable, ReplayStats, REPLAYABLE_COMMANDS};

/// Errors raised while opening, writing, or replaying the journal.
#[derive(Debug, Error)]
pub enum AofError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file ends in the middle of a record
    #[error("journal truncated: incomplete record at byte {offset}")]
    Truncated { offset: u64 },

    /// Bytes that can never form a valid record
    #[error("journal corrupt at byte {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
}

/// When appended records are forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// `fdatasync` after every record
    Always,
    /// At most one sync per second
    #[default]
    EverySec,
    /// Leave flushing to the operating system
    No,
}

impl FsyncPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsyncPolicy::Always => "always",
            FsyncPolicy::EverySec => "everysec",
            FsyncPolicy::No => "no",
        }
    }
}

impl FromStr for FsyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(FsyncPolicy::Always),
            "everysec" => Ok(FsyncPolicy::EverySec),
            "no" => Ok(FsyncPolicy::No),
            other => Err(format!(
                "unknown fsync policy '{}' (expected always, everysec or no)",
                other
            )),
        }
    }
}

impl std::fmt::Display for FsyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
