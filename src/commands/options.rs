//! `SET` option parsing.
//!
//! `SET key value [EX seconds | PX milliseconds | EXAT unix-seconds | PXAT unix-ms]`
//!
//! Shared by the dispatcher and by journal replay, so a record is always read
//! back with the same rules it was written with.

use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Latest accepted deadline in Unix milliseconds.
pub const MAX_DEADLINE_MS: u64 = i64::MAX as u64;

/// An expiry requested by `SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// `EX` / `PX`: relative to the moment the command is applied
    Relative(Duration),
    /// `EXAT` / `PXAT`: absolute deadline in Unix milliseconds
    UnixMillis(u64),
}

impl Expiry {
    /// Time left until the deadline, or `None` if it has already passed.
    pub fn remaining(&self) -> Option<Duration> {
        match *self {
            Expiry::Relative(ttl) => Some(ttl),
            Expiry::UnixMillis(deadline) => {
                let now = unix_millis_now();
                (deadline > now).then(|| Duration::from_millis(deadline - now))
            }
        }
    }

    /// The deadline as Unix milliseconds.
    pub fn deadline_unix_ms(&self) -> u64 {
        match *self {
            Expiry::Relative(ttl) => u64::try_from(ttl.as_millis())
                .map_or(u64::MAX, |ms| unix_millis_now().saturating_add(ms)),
            Expiry::UnixMillis(deadline) => deadline,
        }
    }
}

/// Parsed trailing options of a `SET` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub expiry: Option<Expiry>,
}

/// Why a `SET` option list was rejected. `Display` is the client-facing reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR invalid expire time in 'SET' command")]
    InvalidExpireTime,
}

impl SetOptions {
    /// Parses the arguments that follow `key value`.
    pub fn parse(args: &[Bytes]) -> Result<Self, OptionError> {
        let mut options = SetOptions::default();
        let mut iter = args.iter();

        while let Some(flag) = iter.next() {
            let flag = std::str::from_utf8(flag)
                .map_err(|_| OptionError::Syntax)?
                .to_ascii_uppercase();

            let (unit, absolute) = match flag.as_str() {
                "EX" => (1000, false),
                "PX" => (1, false),
                "EXAT" => (1000, true),
                "PXAT" => (1, true),
                _ => return Err(OptionError::Syntax),
            };

            // Only one expiry option per command
            if options.expiry.is_some() {
                return Err(OptionError::Syntax);
            }

            let amount = iter.next().ok_or(OptionError::Syntax)?;
            let ms = parse_positive(amount)?
                .checked_mul(unit)
                .filter(|ms| *ms <= MAX_DEADLINE_MS)
                .ok_or(OptionError::InvalidExpireTime)?;

            options.expiry = Some(if absolute {
                Expiry::UnixMillis(ms)
            } else {
                // The absolute deadline is what gets journaled, so it must fit too
                match unix_millis_now().checked_add(ms) {
                    Some(deadline) if deadline <= MAX_DEADLINE_MS => {
                        Expiry::Relative(Duration::from_millis(ms))
                    }
                    _ => return Err(OptionError::InvalidExpireTime),
                }
            });
        }

        Ok(options)
    }
}

fn parse_positive(raw: &[u8]) -> Result<u64, OptionError> {
    let n: i64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(OptionError::NotAnInteger)?;

    if n <= 0 {
        return Err(OptionError::InvalidExpireTime);
    }
    Ok(n as u64)
}

/// Current wall-clock time in Unix milliseconds.
pub fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}
