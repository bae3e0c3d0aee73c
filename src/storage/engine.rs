//! Sharded Multi-Type Storage Engine
//!
//! This module implements the core storage engine for ShardKV.
//! Every key maps to one [`Entry`] holding a tagged [`Value`] (string, list,
//! set or hash) plus an optional expiry instant.
//!
//! ## Design Decisions
//!
//! 1. **Partitioned Tables**: The keyspace is split into `NUM_SHARDS` independent
//!    `HashMap`s. Each map is owned by exactly one `RwLock`; no table is ever
//!    touched under a lock other than its own.
//! 2. **Deterministic Shard Hash**: A polynomial rolling hash (`h = 31*h + byte`)
//!    assigns keys to shards, so the mapping is stable across processes.
//! 3. **Lazy Expiry**: Expired entries are removed when they are accessed, plus
//!    a background sweep (see [`crate::storage::expiry`]).
//! 4. **Asymmetric Type Checks**: Reads on a key of another kind report "not
//!    found". Collection writes on a key of another kind replace it with a fresh
//!    empty collection of the requested kind.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │Shard 255│           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Single-key operations lock one shard. The only multi-shard operation is the
//! expiry scan, which locks shards in ascending index order.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Number of lock domains the keyspace is partitioned into.
pub const NUM_SHARDS: usize = 256;

/// Maps a key to its shard with a polynomial rolling hash.
///
/// The hash is deliberately simple and stable: the same key always lands in
/// the same shard, independent of process or platform.
#[inline]
pub fn shard_index(key: &[u8]) -> usize {
    let hash = key
        .iter()
        .fold(0u32, |h, &b| h.wrapping_mul(31).wrapping_add(b as u32));
    hash as usize % NUM_SHARDS
}

/// The kind of value stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    List,
    Set,
    Hash,
}

impl ValueKind {
    /// Name reported by the `TYPE` command.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Set => "set",
            ValueKind::Hash => "hash",
        }
    }
}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Hash(_) => ValueKind::Hash,
        }
    }
}

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Value,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry with TTL.
    ///
    /// A zero TTL, or one too far out for the monotonic clock to represent,
    /// means the entry never expires.
    pub fn with_ttl(value: Value, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        Self { value, expires_at }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }

    /// Remaining time to live, or None if the entry never expires.
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }
}

/// Which end of a list an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Left,
    Right,
}

/// A single shard: one independently locked sub-table of the keyspace.
#[derive(Debug, Default)]
struct Shard {
    entries: RwLock<HashMap<Bytes, Entry>>,
}

/// The main storage engine for ShardKV.
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// all client handler tasks and the expiry sweeper. All operations are
/// thread-safe.
///
/// # Example
///
/// ```
/// use shardkv::storage::{ListEnd, StorageEngine};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
///
/// engine.push(Bytes::from("queue"), vec![Bytes::from("job-1")], ListEnd::Right);
/// assert_eq!(engine.llen(b"queue"), 1);
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,

    /// Statistics: number of expired keys cleaned up (lazily or by the sweeper)
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("keys", &self.len())
            .field("expired", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new, empty storage engine.
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[shard_index(key)]
    }

    fn record_expired(&self) {
        self.expired_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs `read` against the live entry for `key`.
    ///
    /// Takes the shard's read lock on the fast path. If the entry turns out to
    /// be expired, the read lock is released and the write lock taken to remove
    /// it (lazy expiry).
    fn read_live<T>(&self, key: &[u8], read: impl FnOnce(&Entry) -> T) -> Option<T> {
        let shard = self.get_shard(key);

        {
            let entries = shard.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(read(entry)),
                Some(_) => {}
            }
        }

        let mut entries = shard.entries.write();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                self.record_expired();
                None
            }
            // Race: another writer replaced the key between the two locks
            Some(entry) => Some(read(entry)),
            None => None,
        }
    }

    /// Removes `key` if it is present but expired. Caller holds the write lock.
    fn purge_expired(&self, entries: &mut HashMap<Bytes, Entry>, key: &[u8]) {
        if entries.get(key).is_some_and(Entry::is_expired) {
            entries.remove(key);
            self.record_expired();
        }
    }

    /// Removes and returns the live entry for `key`. Caller holds the write lock.
    fn take_live(&self, entries: &mut HashMap<Bytes, Entry>, key: &[u8]) -> Option<Entry> {
        let entry = entries.remove(key)?;
        if entry.is_expired() {
            self.record_expired();
            return None;
        }
        Some(entry)
    }

    // ========================================================================
    // STRING AND KEY OPERATIONS
    // ========================================================================

    /// Sets a key to a string value without expiry, replacing any existing entry.
    pub fn set(&self, key: Bytes, value: Bytes) {
        let mut entries = self.get_shard(&key).entries.write();
        entries.insert(key, Entry::new(Value::String(value)));
    }

    /// Sets a key to a string value that expires after `ttl`.
    ///
    /// A zero `ttl` stores the value without expiry.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) {
        let mut entries = self.get_shard(&key).entries.write();
        entries.insert(key, Entry::with_ttl(Value::String(value), ttl));
    }

    /// Gets the string value for a key.
    ///
    /// Returns `None` if the key doesn't exist, has expired, or holds another kind.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.read_live(key, |entry| match &entry.value {
            Value::String(value) => Some(value.clone()),
            _ => None,
        })
        .flatten()
    }

    /// Deletes a key of any kind.
    ///
    /// Returns `true` if a live key was removed. An expired entry is cleaned up
    /// but does not count as a deletion.
    pub fn delete(&self, key: &[u8]) -> bool {
        let mut entries = self.get_shard(key).entries.write();
        self.take_live(&mut entries, key).is_some()
    }

    /// Deletes `key` only if it is still expired.
    ///
    /// Used by the sweeper after its scan: a key recreated in the meantime is
    /// left alone.
    pub fn delete_if_expired(&self, key: &[u8]) -> bool {
        let mut entries = self.get_shard(key).entries.write();
        if entries.get(key).is_some_and(Entry::is_expired) {
            entries.remove(key);
            self.record_expired();
            true
        } else {
            false
        }
    }

    /// Checks if a key exists (and is not expired).
    pub fn exists(&self, key: &[u8]) -> bool {
        self.read_live(key, |_| ()).is_some()
    }

    /// Returns the kind of the value stored at `key`, if any.
    pub fn key_type(&self, key: &[u8]) -> Option<ValueKind> {
        self.read_live(key, |entry| entry.value.kind())
    }

    /// Gets the remaining TTL for a key in milliseconds.
    ///
    /// # Returns
    ///
    /// - `Some(ms)` if the key exists and has an expiry
    /// - `Some(-1)` if the key exists but has no expiry
    /// - `None` if the key doesn't exist
    pub fn pttl(&self, key: &[u8]) -> Option<i64> {
        self.read_live(key, |entry| {
            entry
                .ttl()
                .map(|ttl| ttl.as_millis() as i64)
                .unwrap_or(-1)
        })
    }

    /// Gets the remaining TTL for a key in seconds (see [`StorageEngine::pttl`]).
    pub fn ttl(&self, key: &[u8]) -> Option<i64> {
        self.read_live(key, |entry| {
            entry.ttl().map(|ttl| ttl.as_secs() as i64).unwrap_or(-1)
        })
    }

    // ========================================================================
    // LIST OPERATIONS
    // ========================================================================

    /// Pushes values onto one end of a list, creating it if needed.
    ///
    /// A left push inserts `values` as a block in the given order, so pushing
    /// `[a, b]` onto `[c]` yields `[a, b, c]`. If the key holds another kind,
    /// it is replaced by a new list.
    ///
    /// # Returns
    /// The length of the list after the push.
    pub fn push(&self, key: Bytes, values: Vec<Bytes>, end: ListEnd) -> usize {
        let mut entries = self.get_shard(&key).entries.write();

        let (mut list, expires_at) = match self.take_live(&mut entries, &key) {
            Some(Entry {
                value: Value::List(list),
                expires_at,
            }) => (list, expires_at),
            _ => (VecDeque::with_capacity(values.len()), None),
        };

        match end {
            ListEnd::Left => {
                for value in values.into_iter().rev() {
                    list.push_front(value);
                }
            }
            ListEnd::Right => list.extend(values),
        }

        let len = list.len();
        if len > 0 {
            entries.insert(
                key,
                Entry {
                    value: Value::List(list),
                    expires_at,
                },
            );
        }
        len
    }

    /// Removes and returns the element at one end of a list.
    ///
    /// Deletes the key when the list becomes empty. Returns `None` if the key
    /// is absent, expired, or not a list.
    pub fn pop(&self, key: &[u8], end: ListEnd) -> Option<Bytes> {
        let mut entries = self.get_shard(key).entries.write();
        self.purge_expired(&mut entries, key);

        let Some(Entry {
            value: Value::List(list),
            ..
        }) = entries.get_mut(key)
        else {
            return None;
        };

        let value = match end {
            ListEnd::Left => list.pop_front(),
            ListEnd::Right => list.pop_back(),
        };

        if list.is_empty() {
            entries.remove(key);
        }

        value
    }

    /// Returns the length of a list, or 0 if the key is absent or not a list.
    pub fn llen(&self, key: &[u8]) -> usize {
        self.read_live(key, |entry| match &entry.value {
            Value::List(list) => list.len(),
            _ => 0,
        })
        .unwrap_or(0)
    }

    /// Returns a copy of a range of elements from a list.
    ///
    /// Both `start` and `stop` are inclusive. Negative indices count from the
    /// end (-1 is the last element). `start` clamps to zero and `stop` to the
    /// last element; an inverted or out-of-range window yields an empty vector.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Vec<Bytes> {
        self.read_live(key, |entry| match &entry.value {
            Value::List(list) => {
                let len = list.len() as i64;

                let mut actual_start = if start < 0 { len + start } else { start };
                let mut actual_stop = if stop < 0 { len + stop } else { stop };

                if actual_start < 0 {
                    actual_start = 0;
                }
                if actual_stop >= len {
                    actual_stop = len - 1;
                }

                if actual_start > actual_stop || actual_start >= len {
                    return Vec::new();
                }

                list.iter()
                    .skip(actual_start as usize)
                    .take((actual_stop - actual_start + 1) as usize)
                    .cloned()
                    .collect()
            }
            _ => Vec::new(),
        })
        .unwrap_or_default()
    }

    // ========================================================================
    // SET OPERATIONS
    // ========================================================================

    /// Adds members to a set, creating it if needed.
    ///
    /// If the key holds another kind, it is replaced by a new set.
    ///
    /// # Returns
    /// The number of members that were not already present.
    pub fn sadd(&self, key: Bytes, members: Vec<Bytes>) -> usize {
        let mut entries = self.get_shard(&key).entries.write();

        let (mut set, expires_at) = match self.take_live(&mut entries, &key) {
            Some(Entry {
                value: Value::Set(set),
                expires_at,
            }) => (set, expires_at),
            _ => (HashSet::with_capacity(members.len()), None),
        };

        let added = members
            .into_iter()
            .filter(|member| set.insert(member.clone()))
            .count();

        if !set.is_empty() {
            entries.insert(
                key,
                Entry {
                    value: Value::Set(set),
                    expires_at,
                },
            );
        }
        added
    }

    /// Removes members from a set, deleting the key when it becomes empty.
    ///
    /// # Returns
    /// The number of members that were actually removed.
    pub fn srem(&self, key: &[u8], members: &[Bytes]) -> usize {
        let mut entries = self.get_shard(key).entries.write();
        self.purge_expired(&mut entries, key);

        let Some(Entry {
            value: Value::Set(set),
            ..
        }) = entries.get_mut(key)
        else {
            return 0;
        };

        let removed = members.iter().filter(|member| set.remove(*member)).count();

        if set.is_empty() {
            entries.remove(key);
        }
        removed
    }

    /// Returns a copy of all members of a set, sorted bytewise.
    pub fn smembers(&self, key: &[u8]) -> Vec<Bytes> {
        self.read_live(key, |entry| match &entry.value {
            Value::Set(set) => {
                let mut members: Vec<Bytes> = set.iter().cloned().collect();
                members.sort_unstable();
                members
            }
            _ => Vec::new(),
        })
        .unwrap_or_default()
    }

    /// Checks whether `member` belongs to the set stored at `key`.
    pub fn sismember(&self, key: &[u8], member: &[u8]) -> bool {
        self.read_live(key, |entry| match &entry.value {
            Value::Set(set) => set.contains(member),
            _ => false,
        })
        .unwrap_or(false)
    }

    // ========================================================================
    // HASH OPERATIONS
    // ========================================================================

    /// Sets a field in a hash, creating the hash if needed.
    ///
    /// If the key holds another kind, it is replaced by a new hash.
    ///
    /// # Returns
    /// 1 if the field was created, 0 if an existing field was overwritten.
    pub fn hset(&self, key: Bytes, field: Bytes, value: Bytes) -> usize {
        self.hset_many(key, [(field, value)])
    }

    /// Sets several fields of a hash under one shard lock, so readers see
    /// either none or all of them.
    ///
    /// # Returns
    /// The number of fields that were created.
    pub fn hset_many<I>(&self, key: Bytes, pairs: I) -> usize
    where
        I: IntoIterator<Item = (Bytes, Bytes)>,
    {
        let mut entries = self.get_shard(&key).entries.write();

        let (mut hash, expires_at) = match self.take_live(&mut entries, &key) {
            Some(Entry {
                value: Value::Hash(hash),
                expires_at,
            }) => (hash, expires_at),
            _ => (HashMap::new(), None),
        };

        let created = pairs
            .into_iter()
            .map(|(field, value)| hash.insert(field, value))
            .filter(Option::is_none)
            .count();

        entries.insert(
            key,
            Entry {
                value: Value::Hash(hash),
                expires_at,
            },
        );
        created
    }

    /// Gets the value of a field in a hash.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> Option<Bytes> {
        self.read_live(key, |entry| match &entry.value {
            Value::Hash(hash) => hash.get(field).cloned(),
            _ => None,
        })
        .flatten()
    }

    /// Deletes fields from a hash, deleting the key when it becomes empty.
    ///
    /// # Returns
    /// The number of fields that were actually removed.
    pub fn hdel(&self, key: &[u8], fields: &[Bytes]) -> usize {
        let mut entries = self.get_shard(key).entries.write();
        self.purge_expired(&mut entries, key);

        let Some(Entry {
            value: Value::Hash(hash),
            ..
        }) = entries.get_mut(key)
        else {
            return 0;
        };

        let removed = fields
            .iter()
            .filter(|field| hash.remove(*field).is_some())
            .count();

        if hash.is_empty() {
            entries.remove(key);
        }
        removed
    }

    /// Returns a copy of all field/value pairs of a hash, sorted by field.
    pub fn hgetall(&self, key: &[u8]) -> Vec<(Bytes, Bytes)> {
        self.read_live(key, |entry| match &entry.value {
            Value::Hash(hash) => {
                let mut pairs: Vec<(Bytes, Bytes)> = hash
                    .iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect();
                pairs.sort_unstable_by(|a, b| a.0.cmp(&b.0));
                pairs
            }
            _ => Vec::new(),
        })
        .unwrap_or_default()
    }

    // ========================================================================
    // WHOLE-STORE OPERATIONS
    // ========================================================================

    /// Scans every shard and returns the keys whose entries have expired.
    ///
    /// All shard locks are taken in ascending index order and held together,
    /// so the scan sees one consistent snapshot. They are all released before
    /// this method returns; nothing is deleted here.
    pub fn collect_expired_keys(&self) -> Vec<Bytes> {
        let guards: Vec<_> = self.shards.iter().map(|shard| shard.entries.read()).collect();

        let now = Instant::now();
        let expired = guards
            .iter()
            .flat_map(|entries| entries.iter())
            .filter(|(_, entry)| entry.expires_at.is_some_and(|exp| now >= exp))
            .map(|(key, _)| key.clone())
            .collect();

        drop(guards);
        expired
    }

    /// Returns a sorted copy of every live entry's key and value.
    pub fn snapshot(&self) -> Vec<(Bytes, Value)> {
        let mut items: Vec<(Bytes, Value)> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .entries
                    .read()
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired())
                    .map(|(key, entry)| (key.clone(), entry.value.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        items.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        items
    }

    /// Returns the number of stored keys, including expired keys that have
    /// not been cleaned up yet.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.entries.read().len()).sum()
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Database statistics.
#[derive(Debug, Clone, Copy)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total expired keys cleaned up
    pub expired: u64,
}
