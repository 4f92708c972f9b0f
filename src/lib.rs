//! # FlintKV
//!
//! A single-node, in-memory key-value server speaking a RESP-style protocol
//! over TCP. Values are strings or lists of strings, and string keys may carry
//! an expiry deadline that is enforced lazily on access.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               FlintKV                                │
//! │                                                                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐               │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │──── SAVE ──┐  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │            │  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘            ▼  │
//! │                            │                  │          ┌──────────┐│
//! │                     ┌──────┴──────┐           ▼          │ Snapshot ││
//! │                     │   Request   │  ┌────────────────┐  │  Store   ││
//! │                     │   Decoder   │  │ StorageEngine  │<─┤          ││
//! │                     └─────────────┘  │   64 shards    │  └──────────┘│
//! │                                      └────────────────┘              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flintkv::{CommandHandler, ConnectionStats, SnapshotStore, StorageEngine};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::new());
//! let snapshot = Arc::new(SnapshotStore::new(Arc::clone(&storage), "flintkv.snapshot"));
//! snapshot.load()?;
//!
//! let handler = CommandHandler::new(storage, snapshot);
//! let stats = Arc::new(ConnectionStats::new());
//! let listener = TcpListener::bind("127.0.0.1:6379").await?;
//! loop {
//!     let (stream, addr) = listener.accept().await?;
//!     tokio::spawn(handle_connection(stream, addr, handler.clone(), Arc::clone(&stats)));
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: request decoder and reply encoder
//! - [`storage`]: sharded keyspace, expiry policies, snapshots
//! - [`commands`]: command dispatch
//! - [`connection`]: per-client read/execute/reply loop

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, Request, RespParser, RespValue};
pub use storage::{SnapshotStore, StorageEngine};

pub const DEFAULT_PORT: u16 = 6379;

pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Snapshot file used when none is configured
pub const DEFAULT_SNAPSHOT_PATH: &str = "flintkv.snapshot";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
