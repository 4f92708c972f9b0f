//! Expiry Policies
//!
//! An entry carries at most one expiry policy. Policies are only evaluated
//! when the key is accessed; nothing sweeps the keyspace in the background,
//! so an expired entry stays in memory until it is next read.
//!
//! All instants are Unix-epoch milliseconds taken from the wall clock, which
//! keeps policies meaningful after a snapshot is restored in a new process.
//!
//! | Policy       | Built from                 | Expired when                     |
//! |--------------|----------------------------|----------------------------------|
//! | `None`       | plain `SET`, list creation | never                            |
//! | `RelativeAt` | `SETEX n` / `PSETEX n`     | `now - set_at >= threshold_ms`   |
//! | `AbsoluteAt` | `SETEAXT n`                | `now > target`                   |

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix-epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// How the numeric argument of a `SET*` command is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryKind {
    /// Relative, in seconds (`SETEX`).
    Seconds,
    /// Relative, in milliseconds (`PSETEX`).
    Millis,
    /// Absolute Unix timestamp in seconds (`SETEAXT`).
    UnixSeconds,
}

/// When an entry stops being visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpiryPolicy {
    /// Never expires.
    #[default]
    None,

    /// Expires once `threshold_ms` have elapsed since `set_at`.
    RelativeAt { set_at: i64, threshold_ms: i64 },

    /// Expires once the clock passes `target`.
    AbsoluteAt { target: i64 },
}

impl ExpiryPolicy {
    /// Builds the policy for `amount` interpreted as `kind`, relative to `now`.
    pub fn from_kind(kind: ExpiryKind, amount: i64, now: i64) -> Self {
        match kind {
            ExpiryKind::Seconds => ExpiryPolicy::RelativeAt {
                set_at: now,
                threshold_ms: amount.saturating_mul(1000),
            },
            ExpiryKind::Millis => ExpiryPolicy::RelativeAt {
                set_at: now,
                threshold_ms: amount,
            },
            ExpiryKind::UnixSeconds => ExpiryPolicy::AbsoluteAt {
                target: amount.saturating_mul(1000),
            },
        }
    }

    /// Checks the policy against the given instant.
    #[inline]
    pub fn is_expired_at(&self, now: i64) -> bool {
        match *self {
            ExpiryPolicy::None => false,
            ExpiryPolicy::RelativeAt {
                set_at,
                threshold_ms,
            } => now.saturating_sub(set_at) >= threshold_ms,
            ExpiryPolicy::AbsoluteAt { target } => now > target,
        }
    }

    /// Checks the policy against the current time.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ExpiryPolicy::None)
    }
}
