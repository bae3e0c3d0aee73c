//! Command Processing
//!
//! Sits between the connection layer and the storage engine:
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌─────────────────┐
//! │ CommandHandler  │─────►│   AppendLog     │  (persistence module)
//! │  - Dispatch     │      └─────────────────┘
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;
pub mod options;

pub use handler::CommandHandler;
pub use options::{Expiry, OptionError, SetOptions};
