//! Command Handler Module
//!
//! Receives parsed RESP requests, executes them against the storage engine,
//! journals the ones that changed state, and builds the reply.
//!
//! ## Supported Commands
//!
//! ### Strings and Keys
//! - `SET key value [EX seconds | PX milliseconds | EXAT unix-seconds | PXAT unix-ms]`
//! - `GET key`
//! - `DEL key [key ...]`
//! - `EXISTS key [key ...]`
//! - `TYPE key`, `TTL key`, `PTTL key`
//!
//! ### Lists
//! - `LPUSH key value [value ...]`, `RPUSH key value [value ...]`
//! - `LPOP key`, `RPOP key`
//! - `LLEN key`, `LRANGE key start stop`
//!
//! ### Sets
//! - `SADD key member [member ...]`, `SREM key member [member ...]`
//! - `SMEMBERS key`, `SISMEMBER key member`
//!
//! ### Hashes
//! - `HSET key field value [field value ...]`
//! - `HGET key field`, `HDEL key field [field ...]`, `HGETALL key`
//!
//! ### Server
//! - `PING [message]`, `ECHO message`, `DBSIZE`
//!
//! ## Journaling
//!
//! ```text
//!   lock ordering stripe of key
//!     ├─ mutate StorageEngine
//!     └─ append record to AppendLog   (only if state changed)
//!   unlock
//!   reply
//! ```
//!
//! The ordering stripe makes two writers of the same key append in the same
//! order they applied, so replay reproduces the final value. A failed append
//! is logged and the client still gets its normal reply.

use crate::commands::options::SetOptions;
use crate::persistence::AppendLog;
use crate::protocol::RespValue;
use crate::storage::{shard_index, ListEnd, StorageEngine, NUM_SHARDS};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::error;

/// Journal attached to a handler, plus the per-shard ordering stripes.
#[derive(Clone)]
struct Journal {
    log: Arc<AppendLog>,
    order: Arc<Vec<Mutex<()>>>,
}

/// Executes commands against a shared [`StorageEngine`].
///
/// Cheap to clone: every connection task gets its own copy.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    journal: Option<Journal>,
}

/// A state change to record: the command name and its arguments.
type Record = Option<(&'static str, Vec<Bytes>)>;

fn wrong_arity(cmd: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd
    ))
}

fn not_an_integer() -> RespValue {
    RespValue::error("ERR value is not an integer or out of range")
}

fn parse_i64(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn optional_bulk(value: Option<Bytes>) -> RespValue {
    match value {
        Some(v) => RespValue::bulk_string(v),
        None => RespValue::null(),
    }
}

impl CommandHandler {
    /// Creates a handler that does not journal anything.
    ///
    /// Used for journal replay and in tests.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self {
            storage,
            journal: None,
        }
    }

    /// Creates a handler that appends every state change to `log`.
    pub fn with_journal(storage: Arc<StorageEngine>, log: Arc<AppendLog>) -> Self {
        Self {
            storage,
            journal: Some(Journal {
                log,
                order: Arc::new((0..NUM_SHARDS).map(|_| Mutex::new(())).collect()),
            }),
        }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Executes a parsed request and returns the reply.
    ///
    /// The request must be a non-empty array of bulk strings.
    pub fn execute(&self, request: RespValue) -> RespValue {
        let mut items = match request.into_bulk_items() {
            Some(items) => items,
            None => return RespValue::error("ERR invalid command format"),
        };

        if items.is_empty() {
            return RespValue::error("ERR empty command");
        }

        let name = String::from_utf8_lossy(&items.remove(0)).into_owned();
        self.dispatch(&name, items)
    }

    /// Runs command `cmd` (any case) with `args`.
    pub fn dispatch(&self, cmd: &str, args: Vec<Bytes>) -> RespValue {
        let name = cmd.to_ascii_uppercase();
        match name.as_str() {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "DBSIZE" => RespValue::integer(self.storage.len() as i64),

            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "TYPE" => self.cmd_type(args),
            "TTL" => self.cmd_ttl(args, false),
            "PTTL" => self.cmd_ttl(args, true),

            "LPUSH" => self.cmd_push(args, ListEnd::Left),
            "RPUSH" => self.cmd_push(args, ListEnd::Right),
            "LPOP" => self.cmd_pop(args, ListEnd::Left),
            "RPOP" => self.cmd_pop(args, ListEnd::Right),
            "LLEN" => self.cmd_llen(args),
            "LRANGE" => self.cmd_lrange(args),

            "SADD" => self.cmd_sadd(args),
            "SREM" => self.cmd_srem(args),
            "SMEMBERS" => self.cmd_smembers(args),
            "SISMEMBER" => self.cmd_sismember(args),

            "HSET" => self.cmd_hset(args),
            "HGET" => self.cmd_hget(args),
            "HDEL" => self.cmd_hdel(args),
            "HGETALL" => self.cmd_hgetall(args),

            _ => RespValue::error(format!("ERR unknown command '{}'", name)),
        }
    }

    /// Applies a mutation of `key` and journals the record it returns.
    ///
    /// With a journal attached, the mutation and the append both happen under
    /// the ordering stripe of `key`.
    fn write<T>(&self, key: &[u8], apply: impl FnOnce(&StorageEngine) -> (T, Record)) -> T {
        let Some(journal) = &self.journal else {
            return apply(self.storage.as_ref()).0;
        };

        let _order = journal.order[shard_index(key)].lock();
        let (result, record) = apply(self.storage.as_ref());

        if let Some((command, args)) = record {
            if let Err(e) = journal.log.append(command, &args) {
                error!(
                    command = command,
                    path = %journal.log.path().display(),
                    error = %e,
                    "Failed to append to journal"
                );
            }
        }

        result
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, mut args: Vec<Bytes>) -> RespValue {
        match args.len() {
            0 => RespValue::pong(),
            1 => RespValue::bulk_string(args.swap_remove(0)),
            _ => wrong_arity("PING"),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, mut args: Vec<Bytes>) -> RespValue {
        if args.len() != 1 {
            return wrong_arity("ECHO");
        }
        RespValue::bulk_string(args.swap_remove(0))
    }

    // ========================================================================
    // String and Key Commands
    // ========================================================================

    /// SET key value [EX seconds | PX milliseconds | EXAT unix-seconds | PXAT unix-ms]
    ///
    /// Any expiry is journaled as an absolute `PXAT` deadline, so a replay
    /// restores the remaining TTL rather than a fresh one.
    fn cmd_set(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() < 2 {
            return wrong_arity("SET");
        }

        let options = match SetOptions::parse(&args[2..]) {
            Ok(options) => options,
            Err(e) => return RespValue::error(e.to_string()),
        };

        let mut args = args.into_iter();
        let (Some(key), Some(value)) = (args.next(), args.next()) else {
            return wrong_arity("SET");
        };

        let shard_key = key.clone();
        self.write(&shard_key, |storage| match options.expiry {
            None => {
                storage.set(key.clone(), value.clone());
                ((), Some(("SET", vec![key, value])))
            }
            Some(expiry) => {
                let deadline = expiry.deadline_unix_ms();

                match expiry.remaining() {
                    Some(ttl) => storage.set_with_ttl(key.clone(), value.clone(), ttl),
                    // Already past its deadline
                    None => {
                        storage.delete(&key);
                    }
                }

                let record = vec![
                    key,
                    value,
                    Bytes::from_static(b"PXAT"),
                    Bytes::from(deadline.to_string()),
                ];
                ((), Some(("SET", record)))
            }
        });

        RespValue::ok()
    }

    /// GET key
    fn cmd_get(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() != 1 {
            return wrong_arity("GET");
        }
        optional_bulk(self.storage.get(&args[0]))
    }

    /// DEL key [key ...]
    ///
    /// Each removed key is journaled as its own `DEL` record.
    fn cmd_del(&self, args: Vec<Bytes>) -> RespValue {
        if args.is_empty() {
            return wrong_arity("DEL");
        }

        let removed = args
            .into_iter()
            .filter(|key| {
                self.write(key, |storage| {
                    let removed = storage.delete(key);
                    (removed, removed.then(|| ("DEL", vec![key.clone()])))
                })
            })
            .count();

        RespValue::integer(removed as i64)
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&self, args: Vec<Bytes>) -> RespValue {
        if args.is_empty() {
            return wrong_arity("EXISTS");
        }

        let count = args.iter().filter(|key| self.storage.exists(key)).count();
        RespValue::integer(count as i64)
    }

    /// TYPE key
    fn cmd_type(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() != 1 {
            return wrong_arity("TYPE");
        }

        let name = self
            .storage
            .key_type(&args[0])
            .map(|kind| kind.as_str())
            .unwrap_or("none");
        RespValue::simple_string(name)
    }

    /// TTL key / PTTL key: -2 if the key is missing, -1 if it never expires.
    fn cmd_ttl(&self, args: Vec<Bytes>, millis: bool) -> RespValue {
        if args.len() != 1 {
            return wrong_arity(if millis { "PTTL" } else { "TTL" });
        }

        let ttl = if millis {
            self.storage.pttl(&args[0])
        } else {
            self.storage.ttl(&args[0])
        };
        RespValue::integer(ttl.unwrap_or(-2))
    }

    // ========================================================================
    // List Commands
    // ========================================================================

    /// LPUSH key value [value ...] / RPUSH key value [value ...]
    fn cmd_push(&self, args: Vec<Bytes>, end: ListEnd) -> RespValue {
        let command = match end {
            ListEnd::Left => "LPUSH",
            ListEnd::Right => "RPUSH",
        };
        if args.len() < 2 {
            return wrong_arity(command);
        }

        let key = args[0].clone();
        let len = self.write(&key, |storage| {
            let len = storage.push(key.clone(), args[1..].to_vec(), end);
            (len, Some((command, args)))
        });

        RespValue::integer(len as i64)
    }

    /// LPOP key / RPOP key
    fn cmd_pop(&self, args: Vec<Bytes>, end: ListEnd) -> RespValue {
        let command = match end {
            ListEnd::Left => "LPOP",
            ListEnd::Right => "RPOP",
        };
        if args.len() != 1 {
            return wrong_arity(command);
        }

        let key = &args[0];
        let popped = self.write(key, |storage| {
            let popped = storage.pop(key, end);
            let record = popped.is_some().then(|| (command, vec![key.clone()]));
            (popped, record)
        });

        optional_bulk(popped)
    }

    /// LLEN key
    fn cmd_llen(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() != 1 {
            return wrong_arity("LLEN");
        }
        RespValue::integer(self.storage.llen(&args[0]) as i64)
    }

    /// LRANGE key start stop
    fn cmd_lrange(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() != 3 {
            return wrong_arity("LRANGE");
        }

        let (Some(start), Some(stop)) = (parse_i64(&args[1]), parse_i64(&args[2])) else {
            return not_an_integer();
        };

        RespValue::bulk_array(self.storage.lrange(&args[0], start, stop))
    }

    // ========================================================================
    // Set Commands
    // ========================================================================

    /// SADD key member [member ...]
    fn cmd_sadd(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() < 2 {
            return wrong_arity("SADD");
        }

        let key = args[0].clone();
        let added = self.write(&key, |storage| {
            let added = storage.sadd(key.clone(), args[1..].to_vec());
            (added, (added > 0).then(|| ("SADD", args)))
        });

        RespValue::integer(added as i64)
    }

    /// SREM key member [member ...]
    fn cmd_srem(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() < 2 {
            return wrong_arity("SREM");
        }

        let key = args[0].clone();
        let removed = self.write(&key, |storage| {
            let removed = storage.srem(&key, &args[1..]);
            (removed, (removed > 0).then(|| ("SREM", args)))
        });

        RespValue::integer(removed as i64)
    }

    /// SMEMBERS key
    fn cmd_smembers(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() != 1 {
            return wrong_arity("SMEMBERS");
        }
        RespValue::bulk_array(self.storage.smembers(&args[0]))
    }

    /// SISMEMBER key member
    fn cmd_sismember(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() != 2 {
            return wrong_arity("SISMEMBER");
        }
        RespValue::integer(self.storage.sismember(&args[0], &args[1]) as i64)
    }

    // ========================================================================
    // Hash Commands
    // ========================================================================

    /// HSET key field value [field value ...]
    fn cmd_hset(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() < 3 || args.len() % 2 == 0 {
            return wrong_arity("HSET");
        }

        let key = args[0].clone();
        let created = self.write(&key, |storage| {
            let pairs = args[1..]
                .chunks_exact(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()));
            let created = storage.hset_many(key.clone(), pairs);
            (created, Some(("HSET", args)))
        });

        RespValue::integer(created as i64)
    }

    /// HGET key field
    fn cmd_hget(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() != 2 {
            return wrong_arity("HGET");
        }
        optional_bulk(self.storage.hget(&args[0], &args[1]))
    }

    /// HDEL key field [field ...]
    fn cmd_hdel(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() < 2 {
            return wrong_arity("HDEL");
        }

        let key = args[0].clone();
        let removed = self.write(&key, |storage| {
            let removed = storage.hdel(&key, &args[1..]);
            (removed, (removed > 0).then(|| ("HDEL", args)))
        });

        RespValue::integer(removed as i64)
    }

    /// HGETALL key: a flat array of alternating fields and values.
    fn cmd_hgetall(&self, args: Vec<Bytes>) -> RespValue {
        if args.len() != 1 {
            return wrong_arity("HGETALL");
        }

        let flat = self
            .storage
            .hgetall(&args[0])
            .into_iter()
            .flat_map(|(field, value)| [field, value]);
        RespValue::bulk_array(flat)
    }
}
