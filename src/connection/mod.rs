//! Client Connections
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener (main.rs)                  │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept(), spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Parse RESP  │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send reply  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The handler is generic over the stream type, so the same loop serves TCP
//! sockets in production and in-memory mocks in tests.

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, MAX_BUFFER_SIZE,
};
