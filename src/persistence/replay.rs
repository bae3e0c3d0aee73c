//! Journal replay.
//!
//! Only commands that the dispatcher itself journals are re-applied. Anything
//! else found in the file is skipped, so a foreign or hand-edited journal can
//! never run a read command or an unknown command at startup.

use crate::commands::CommandHandler;
use crate::protocol::RespValue;
use bytes::Bytes;

/// Commands re-applied during replay.
pub const REPLAYABLE_COMMANDS: &[&str] = &[
    "SET", "DEL", "LPUSH", "RPUSH", "LPOP", "RPOP", "SADD", "SREM", "HSET", "HDEL",
];

/// Returns true if `name` (any case) is on the replay whitelist.
pub fn is_replayable(name: &str) -> bool {
    REPLAYABLE_COMMANDS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(name))
}

/// Counters reported after a journal load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records read from the file
    pub records: u64,
    /// Records re-applied to the store
    pub applied: u64,
    /// Records whose command is not replayable
    pub skipped: u64,
    /// Replayable records the dispatcher refused (bad arity, bad options)
    pub rejected: u64,
}

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Skipped(String),
    Rejected(String),
}

/// Re-applies one `[command, args...]` record through `handler`.
///
/// `handler` must not have a journal attached.
pub fn apply_record(handler: &CommandHandler, record: Vec<Bytes>) -> Outcome {
    let mut items = record.into_iter();
    let name = match items.next() {
        Some(raw) => String::from_utf8_lossy(&raw).to_ascii_uppercase(),
        None => return Outcome::Rejected("empty record".to_string()),
    };

    if !is_replayable(&name) {
        return Outcome::Skipped(name);
    }

    match handler.dispatch(&name, items.collect()) {
        RespValue::Error(reason) => Outcome::Rejected(reason),
        _ => Outcome::Applied,
    }
}
