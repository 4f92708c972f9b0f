//! Thread-Safe Keyspace Engine
//!
//! This module implements the keyspace: a sharded map from key to [`Entry`],
//! where every entry holds either a string or a list plus one expiry policy.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A key always hashes to the same shard. Every read-modify-write on a key
//! (`incr`, `decr`, the list pushes, the evict-on-read in `get`) runs under
//! that shard's write lock, so operations on one key are linearizable while
//! keys in other shards proceed in parallel.
//!
//! ## Expiry
//!
//! Expiry is lazy. A read that finds an expired entry removes it and reports
//! a miss. `exists` and `delete` look at presence only and never evaluate
//! expiry.

use crate::storage::expiry::{now_millis, ExpiryKind, ExpiryPolicy};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::trace;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    /// Insertion order is significant and duplicates are allowed.
    List(Vec<String>),
}

impl Value {
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items),
            Value::Str(_) => None,
        }
    }
}

/// A stored value with its expiry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Value,
    pub expiry: ExpiryPolicy,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expiry: ExpiryPolicy::None,
        }
    }

    pub fn with_expiry(value: Value, expiry: ExpiryPolicy) -> Self {
        Self { value, expiry }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expiry.is_expired()
    }
}

/// Why a keyspace operation could not complete.
///
/// The operation never mutates the entry when it returns one of these.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// A list operation hit a string.
    #[error("Accessed value is not a list.")]
    NotAList,

    /// A string operation hit a list.
    #[error("Accessed value is not a string.")]
    NotAString,

    /// The stored string is not a 32-bit integer.
    #[error("Accessed value is not a valid number.")]
    NotParsable,

    /// The key was present but had expired; it has been evicted.
    #[error("key has expired")]
    Missing,
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
struct Shard {
    data: RwLock<HashMap<String, Entry>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

/// The keyspace shared by every connection.
///
/// Wrap it in an `Arc` and hand clones to the command handlers and to the
/// snapshot store. All operations are thread-safe.
///
/// # Example
///
/// ```
/// use flintkv::storage::{ExpiryKind, StorageEngine, Value};
///
/// let engine = StorageEngine::new();
/// engine.set("name", "Ariz");
/// assert_eq!(engine.get("name"), Some(Value::Str("Ariz".into())));
///
/// engine.set_with_expiry("session", "abc123", ExpiryKind::Seconds, 60);
/// assert!(engine.exists("session"));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
    list_op_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::new()).collect();

        Self {
            shards,
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            list_op_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    fn record_eviction(&self, key: &str) {
        self.expired_count.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "Evicted expired key");
    }

    /// Stores a string with no expiry, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key.into(), Entry::new(Value::Str(value.into())));
    }

    /// Stores a string with an expiry policy built from `amount` and `kind`.
    ///
    /// The previous entry, value and policy alike, is discarded.
    pub fn set_with_expiry(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        kind: ExpiryKind,
        amount: i64,
    ) {
        let policy = ExpiryPolicy::from_kind(kind, amount, now_millis());
        self.insert(key.into(), Entry::with_expiry(Value::Str(value.into()), policy));
    }

    fn insert(&self, key: String, entry: Entry) {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        self.get_shard(&key).data.write().insert(key, entry);
    }

    /// Runs `f` on the entry for `key` if it is present and live.
    ///
    /// An expired entry is removed under the write lock and `f` is not called.
    fn with_live_entry<R>(&self, key: &str, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        let shard = self.get_shard(key);

        {
            let data = shard.data.read();
            match data.get(key) {
                Some(entry) if !entry.is_expired() => return Some(f(entry)),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: re-check under the write lock, another writer may have
        // replaced the entry in between.
        let mut data = shard.data.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                self.record_eviction(key);
                None
            }
            Some(entry) => Some(f(entry)),
            None => None,
        }
    }

    /// Returns the value for `key`, or `None` if absent or expired.
    ///
    /// An expired key is removed as a side effect.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.with_live_entry(key, |entry| entry.value.clone())
    }

    /// Returns a copy of the whole entry, policy included.
    pub fn get_entry(&self, key: &str) -> Option<Entry> {
        self.with_live_entry(key, Entry::clone)
    }

    /// Checks presence. Expiry is not evaluated.
    pub fn exists(&self, key: &str) -> bool {
        self.get_shard(key).data.read().contains_key(key)
    }

    /// Removes a key. Returns `true` if it was present, expired or not.
    pub fn delete(&self, key: &str) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.get_shard(key).data.write().remove(key).is_some()
    }

    /// Removes every present key and returns how many were removed.
    pub fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> u64 {
        keys.iter().filter(|k| self.delete(k.as_ref())).count() as u64
    }

    /// Increments the integer stored at `key`, creating it as `"1"` if absent.
    pub fn incr(&self, key: &str) -> StorageResult<i32> {
        self.add(key, 1)
    }

    /// Decrements the integer stored at `key`, creating it as `"-1"` if absent.
    pub fn decr(&self, key: &str) -> StorageResult<i32> {
        self.add(key, -1)
    }

    /// 32-bit arithmetic with wraparound. The expiry policy is kept.
    fn add(&self, key: &str, delta: i32) -> StorageResult<i32> {
        let shard = self.get_shard(key);
        let mut data = shard.data.write();

        let Some(entry) = data.get_mut(key) else {
            data.insert(key.to_string(), Entry::new(Value::Str(delta.to_string())));
            return Ok(delta);
        };

        if entry.is_expired() {
            data.remove(key);
            self.record_eviction(key);
            return Err(StorageError::Missing);
        }

        match &mut entry.value {
            Value::Str(s) => {
                let current = s.parse::<i32>().map_err(|_| StorageError::NotParsable)?;
                let next = current.wrapping_add(delta);
                *s = next.to_string();
                Ok(next)
            }
            Value::List(_) => Err(StorageError::NotAString),
        }
    }

    /// Head push.
    ///
    /// A new list receives `values` reversed, so the last value ends up at the
    /// head. An existing list gets `values` appended in the order given.
    /// Returns the resulting length.
    pub fn lpush(&self, key: &str, values: Vec<String>) -> StorageResult<usize> {
        self.push(key, values, true)
    }

    /// Tail push. Creates the list if missing. Returns the resulting length.
    pub fn rpush(&self, key: &str, values: Vec<String>) -> StorageResult<usize> {
        self.push(key, values, false)
    }

    fn push(&self, key: &str, mut values: Vec<String>, reverse_new: bool) -> StorageResult<usize> {
        self.list_op_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(key);
        let mut data = shard.data.write();

        let Some(entry) = data.get_mut(key) else {
            if reverse_new {
                values.reverse();
            }
            let len = values.len();
            data.insert(key.to_string(), Entry::new(Value::List(values)));
            return Ok(len);
        };

        if entry.is_expired() {
            data.remove(key);
            self.record_eviction(key);
            return Err(StorageError::Missing);
        }

        match &mut entry.value {
            Value::List(items) => {
                items.extend(values);
                Ok(items.len())
            }
            Value::Str(_) => Err(StorageError::NotAList),
        }
    }

    /// Returns the inclusive range `[start, end]` of the list at `key`.
    ///
    /// `None` if the key is absent, expired, or not a list. See [`slice_range`]
    /// for the index rules.
    pub fn lrange(&self, key: &str, start: i64, end: i64) -> Option<Vec<String>> {
        self.with_live_entry(key, |entry| {
            entry
                .value
                .as_list()
                .map(|items| slice_range(items, start, end))
        })
        .flatten()
    }

    /// Returns the number of keys currently stored, expired ones included.
    pub fn len(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.data.read().len() as u64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            list_ops: self.list_op_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Copies every entry out as one point-in-time view of the keyspace.
    ///
    /// Read guards for all shards are taken in index order before anything is
    /// copied, and held until the copy is done. Writers only ever hold a
    /// single shard lock, so this cannot deadlock.
    pub fn entries(&self) -> Vec<(String, Entry)> {
        let guards: Vec<_> = self.shards.iter().map(|shard| shard.data.read()).collect();

        let total = guards.iter().map(|data| data.len()).sum();
        let mut out = Vec::with_capacity(total);
        for data in &guards {
            out.extend(data.iter().map(|(k, e)| (k.clone(), e.clone())));
        }
        out
    }

    /// Inserts an entry as-is, policy included. Used when loading snapshots.
    pub fn restore(&self, key: String, entry: Entry) {
        self.get_shard(&key).data.write().insert(key, entry);
    }
}

/// Index rules for `LRANGE`.
///
/// With `n` elements: if the raw `start` is past the last index the result is
/// empty. Otherwise a negative index `i` becomes `n + i`, a non-negative `end`
/// is clamped to `n - 1`, and the bounds are swapped if reversed. Bounds that
/// still fall before the head are clamped to 0; a range lying entirely before
/// the head is empty.
pub fn slice_range(items: &[String], start: i64, end: i64) -> Vec<String> {
    let n = items.len() as i64;
    if n == 0 || start > n - 1 {
        return Vec::new();
    }

    let start = if start < 0 { n + start } else { start };
    let end = if end < 0 { n + end } else { end.min(n - 1) };

    let lo = start.min(end).max(0);
    let hi = start.max(end);
    if hi < 0 {
        return Vec::new();
    }

    items[lo as usize..=hi as usize].to_vec()
}

/// Operation counters.
#[derive(Debug, Clone, Copy)]
pub struct StorageStats {
    /// Keys currently stored, including expired ones not yet evicted
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub list_ops: u64,
    /// Keys evicted lazily on access
    pub expired: u64,
}
