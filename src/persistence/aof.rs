//! The append-only journal file.
//!
//! One [`AppendLog`] is shared by every connection. Appends are serialized by
//! a single writer lock, so records never interleave and the file order is a
//! total order over all journaled commands.

use crate::commands::CommandHandler;
use crate::persistence::replay::{self, Outcome, ReplayStats};
use crate::persistence::{AofError, FsyncPolicy};
use crate::protocol::{RespParser, RespValue};
use crate::storage::StorageEngine;
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How much of the file is read per syscall during replay.
const READ_CHUNK: usize = 64 * 1024;

/// Minimum spacing between syncs under [`FsyncPolicy::EverySec`].
const SYNC_EVERY: Duration = Duration::from_secs(1);

struct LogWriter {
    file: File,
    last_sync: Instant,
    /// Bytes written since the last sync
    dirty: bool,
}

/// An open journal file.
pub struct AppendLog {
    path: PathBuf,
    policy: FsyncPolicy,
    writer: Mutex<LogWriter>,
}

impl std::fmt::Debug for AppendLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendLog")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .finish()
    }
}

impl AppendLog {
    /// Opens the journal at `path` for appending, creating it if needed.
    ///
    /// Existing contents are kept; call [`AppendLog::load`] to replay them.
    pub fn open(path: impl AsRef<Path>, policy: FsyncPolicy) -> Result<Self, AofError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)?;

        debug!(path = %path.display(), policy = %policy, "Journal opened");

        Ok(Self {
            path,
            policy,
            writer: Mutex::new(LogWriter {
                file,
                last_sync: Instant::now(),
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    /// Appends one record `[command, args...]` to the end of the journal.
    ///
    /// The record is encoded up front and written with a single `write_all`
    /// while holding the writer lock. A write that fails partway is cut back
    /// off the file, so the next record still starts on a record boundary.
    pub fn append(&self, command: &str, args: &[Bytes]) -> Result<(), AofError> {
        let record = RespValue::command(command, args).serialize();

        let mut writer = self.writer.lock();
        write_record(&mut writer.file, &record, &self.path)?;
        writer.dirty = true;

        match self.policy {
            FsyncPolicy::Always => sync_locked(&mut writer)?,
            FsyncPolicy::EverySec if writer.last_sync.elapsed() >= SYNC_EVERY => {
                sync_locked(&mut writer)?
            }
            FsyncPolicy::EverySec | FsyncPolicy::No => {}
        }

        Ok(())
    }

    /// Forces everything appended so far to stable storage.
    pub fn sync(&self) -> Result<(), AofError> {
        sync_locked(&mut self.writer.lock())
    }

    /// Syncs only if something was appended since the last sync.
    ///
    /// Called once per second by the server under `everysec`, so a quiet
    /// journal still reaches disk.
    pub fn sync_pending(&self) -> Result<bool, AofError> {
        let mut writer = self.writer.lock();
        if !writer.dirty {
            return Ok(false);
        }
        sync_locked(&mut writer)?;
        Ok(true)
    }

    /// Replays the journal from the beginning into `storage`.
    ///
    /// Records are applied in file order. Commands outside the replay
    /// whitelist are skipped. Any framing error or an incomplete final record
    /// aborts the load.
    pub fn load(&self, storage: &Arc<StorageEngine>) -> Result<ReplayStats, AofError> {
        // No journal attached: replaying must not write records back
        let replayer = CommandHandler::new(Arc::clone(storage));

        let mut file = File::open(&self.path)?;
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);
        let mut parser = RespParser::new();
        let mut offset: u64 = 0;
        let mut stats = ReplayStats::default();

        loop {
            while let Some(&first) = buffer.first() {
                if first != b'*' {
                    return Err(AofError::Corrupt {
                        offset,
                        reason: format!("expected '*' at record start, found {:#04x}", first),
                    });
                }

                let (value, consumed) = match parser.parse(&buffer) {
                    Ok(Some(parsed)) => parsed,
                    Ok(None) => break,
                    Err(e) => {
                        return Err(AofError::Corrupt {
                            offset,
                            reason: e.to_string(),
                        })
                    }
                };

                let record = value
                    .into_bulk_items()
                    .filter(|items| !items.is_empty())
                    .ok_or_else(|| AofError::Corrupt {
                        offset,
                        reason: "record is not a non-empty array of bulk strings".to_string(),
                    })?;

                stats.records += 1;
                match replay::apply_record(&replayer, record) {
                    Outcome::Applied => stats.applied += 1,
                    Outcome::Skipped(name) => {
                        debug!(offset, command = %name, "Skipping non-replayable record");
                        stats.skipped += 1;
                    }
                    Outcome::Rejected(reason) => {
                        warn!(offset, reason = %reason, "Journal record rejected during replay");
                        stats.rejected += 1;
                    }
                }

                buffer.advance(consumed);
                offset += consumed as u64;
            }

            let n = match file.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
        }

        if !buffer.is_empty() {
            return Err(AofError::Truncated { offset });
        }

        info!(
            path = %self.path.display(),
            records = stats.records,
            applied = stats.applied,
            skipped = stats.skipped,
            rejected = stats.rejected,
            bytes = offset,
            "Journal replayed"
        );

        Ok(stats)
    }
}

/// What appending needs from the journal file.
trait RecordSink: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl RecordSink for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

fn write_record<S: RecordSink>(sink: &mut S, record: &[u8], path: &Path) -> Result<(), AofError> {
    let start = sink.size()?;

    if let Err(e) = sink.write_all(record) {
        if let Err(undo) = sink.truncate(start) {
            error!(
                path = %path.display(),
                offset = start,
                error = %undo,
                "Failed to cut partial record off the journal"
            );
        }
        return Err(e.into());
    }
    Ok(())
}

fn sync_locked(writer: &mut LogWriter) -> Result<(), AofError> {
    writer.file.sync_data()?;
    writer.last_sync = Instant::now();
    writer.dirty = false;
    Ok(())
}
