//! Storage Engine Module
//!
//! The keyspace, its expiry policies, and snapshot persistence.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ point-in-time copy / restore
//!              ┌─────────────┴─────────────┐
//!              │       SnapshotStore       │
//!              └───────────────────────────┘
//! ```
//!
//! - **Sharded Storage**: 64 independent shards reduce lock contention
//! - **Typed Values**: strings and lists, never mixed under one key
//! - **Lazy Expiry**: expired keys are removed when next read, never swept
//!
//! ## Example
//!
//! ```
//! use flintkv::storage::{StorageEngine, Value};
//!
//! let engine = StorageEngine::new();
//! engine.rpush("queue", vec!["a".into(), "b".into()]).unwrap();
//! assert_eq!(engine.lrange("queue", 0, -1), Some(vec!["a".into(), "b".into()]));
//! assert_eq!(engine.incr("hits"), Ok(1));
//! assert_eq!(engine.get("hits"), Some(Value::Str("1".into())));
//! ```

pub mod engine;
pub mod expiry;
pub mod snapshot;

pub use engine::{Entry, StorageEngine, StorageError, StorageResult, StorageStats, Value};
pub use expiry::{now_millis, ExpiryKind, ExpiryPolicy};
pub use snapshot::{SnapshotError, SnapshotStore};
