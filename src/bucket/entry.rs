//! Cached entries and TTL sentinels
//!
//! An entry pairs a string value with an absolute wall-clock expiry in
//! nanoseconds. A non-positive expiry means the entry never expires; an
//! entry is expired strictly after its expiry instant, so `now == expiry`
//! still reads as valid.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// TTL selector for a single write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Use the bucket's default TTL
    Default,
    /// Never expire
    Never,
    /// Expire after the given duration
    After(Duration),
}

/// Stored value with its absolute expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Cached data
    pub value: String,
    /// Wall-clock nanoseconds since the Unix epoch (`<= 0` = never expire)
    pub expires_at: i64,
}

impl Entry {
    pub(crate) fn new(value: String, expires_at: i64) -> Self {
        Self { value, expires_at }
    }

    /// Check expiry against a caller-supplied clock reading
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at > 0 && now > self.expires_at
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_nanos())
    }

    /// Expiry as a `SystemTime` (`None` when the entry never expires)
    pub fn expiry_time(&self) -> Option<SystemTime> {
        u64::try_from(self.expires_at)
            .ok()
            .filter(|&nanos| nanos > 0)
            .map(|nanos| UNIX_EPOCH + Duration::from_nanos(nanos))
    }
}

/// Current wall clock in nanoseconds since the Unix epoch
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Absolute expiry for an effective TTL (`None` or zero = never)
pub(crate) fn expiry_after(ttl: Option<Duration>) -> i64 {
    match ttl {
        Some(d) if d > Duration::ZERO => now_nanos() + d.as_nanos() as i64,
        _ => 0,
    }
}
