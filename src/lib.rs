//! # ShardKV - A Sharded In-Memory Key-Value Store
//!
//! ShardKV keeps strings, lists, sets and hashes in memory behind 256
//! independently locked shards, expires keys both lazily and with a background
//! sweep, and journals every state change to an append-only file that is
//! replayed on startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              ShardKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐   ┌───────────┐  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │──>│ AppendLog │  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │   │ (journal) │  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘   └───────────┘  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   RESP      │    │              StorageEngine                   │   │
//! │  │   Parser    │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │   │
//! │  │             │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...255  │ │   │
//! │  └─────────────┘    │  │RwLock  │ │RwLock  │ │RwLock  │ │        │ │   │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │   │
//! │                     └──────────────────────────────────────────────┘   │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │           ExpirySweeper                         │ │
//! │                     │      (Background Tokio Task)                    │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use shardkv::persistence::{AppendLog, FsyncPolicy};
//! use shardkv::{handle_connection, start_expiry_sweeper, CommandHandler, ConnectionStats, StorageEngine};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!
//!     let journal = Arc::new(AppendLog::open("shardkv.aof", FsyncPolicy::EverySec)?);
//!     journal.load(&storage)?;
//!
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&storage), Duration::from_secs(5));
//!     let commands = CommandHandler::with_journal(Arc::clone(&storage), journal);
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let handler = commands.clone();
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: Sharded multi-type store and the expiry sweeper
//! - [`persistence`]: Append-only journal and its replay
//! - [`commands`]: Command dispatch and journaling
//! - [`protocol`]: RESP types and parser, shared by the wire and the journal
//! - [`connection`]: Per-client read/execute/reply loop
//! - [`config`]: Command-line configuration
//!
//! ## Lazy + Active Expiry
//!
//! 1. **Lazy**: Every read checks the key's deadline and removes it if passed
//! 2. **Active**: A background task periodically removes expired keys nobody reads

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use config::{CliAction, ConfigError, ServerConfig};
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::{AofError, AppendLog, FsyncPolicy};
pub use protocol::{ParseError, RespParser, RespValue};
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port ShardKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host ShardKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of ShardKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
