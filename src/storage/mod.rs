//! Storage Engine Module
//!
//! The in-memory keyspace for ShardKV: a sharded, thread-safe table of
//! strings, lists, sets and hashes with per-key TTL, plus the background
//! sweeper that removes expired keys nobody reads anymore.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...256   │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use shardkv::storage::{ListEnd, StorageEngine};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set_with_ttl(
//!     Bytes::from("session"),
//!     Bytes::from("token123"),
//!     Duration::from_secs(3600),
//! );
//! assert!(engine.exists(b"session"));
//!
//! engine.push(Bytes::from("jobs"), vec![Bytes::from("a"), Bytes::from("b")], ListEnd::Left);
//! assert_eq!(engine.lrange(b"jobs", 0, -1), vec![Bytes::from("a"), Bytes::from("b")]);
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{
    shard_index, Entry, ListEnd, StorageEngine, StorageStats, Value, ValueKind, NUM_SHARDS,
};
pub use expiry::{
    start_expiry_sweeper, sweep_once, ExpiryConfig, ExpirySweeper, DEFAULT_SWEEP_INTERVAL,
};
