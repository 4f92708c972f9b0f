//! Command Dispatch Module
//!
//! Receives decoded requests, runs them against the storage engine, and
//! builds the reply for the connection layer to encode.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Request decoder │  (protocol module)
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │──── SAVE ───> SnapshotStore
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - Server: `PING`, `ECHO`, `SAVE`
//! - Strings: `SET`, `SETEX`, `PSETEX`, `SETEAXT`, `GET`, `INCR`, `DECR`
//! - Keys: `EXISTS`, `DEL`
//! - Lists: `LPUSH`, `RPUSH`, `LRANGE`

pub mod handler;

pub use handler::CommandHandler;
