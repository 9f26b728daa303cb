//! Lock-protected in-memory map backing one bucket
//!
//! Reads take the shared lock and never mutate: an expired hit simply reads
//! as absent and is left for the sweeper. The eviction callback is held as
//! an `Arc` and invoked only after every lock has been released, so a
//! callback may itself call back into the bucket.

use crate::bucket::entry::{Entry, Ttl, expiry_after, now_nanos};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Callback invoked with the key and last stored value of an evicted entry
pub type EvictionCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Shared map of key to entry with a per-bucket default TTL
pub(crate) struct BucketCore {
    items: RwLock<HashMap<String, Entry>>,
    default_ttl: Option<Duration>,
    on_evicted: Mutex<Option<EvictionCallback>>,
}

impl BucketCore {
    pub(crate) fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            default_ttl,
            on_evicted: Mutex::new(None),
        }
    }

    pub(crate) fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Absolute expiry for a write issued now
    fn expiry_for(&self, ttl: Ttl) -> i64 {
        let effective = match ttl {
            Ttl::Default => self.default_ttl,
            Ttl::Never => None,
            Ttl::After(d) => Some(d),
        };
        expiry_after(effective)
    }

    /// Insert or overwrite. Empty keys are never inserted.
    pub(crate) fn set(&self, key: &str, value: &str, ttl: Ttl) {
        if key.is_empty() {
            return;
        }
        let entry = Entry::new(value.to_string(), self.expiry_for(ttl));
        self.items.write().insert(key.to_string(), entry);
    }

    /// Expiry-aware read; empty stored values read as absent
    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Expiry-aware read returning the whole entry
    pub(crate) fn get_entry(&self, key: &str) -> Option<Entry> {
        let items = self.items.read();
        let entry = items.get(key)?;
        if entry.is_expired_at(now_nanos()) || entry.value.is_empty() {
            return None;
        }
        Some(entry.clone())
    }

    /// Overwrite in place when the key is live, insert otherwise.
    /// Returns `true` when the key was already present.
    pub(crate) fn update(&self, key: &str, value: &str, ttl: Ttl) -> bool {
        if key.is_empty() {
            return false;
        }
        let expires_at = self.expiry_for(ttl);
        let mut items = self.items.write();
        let was_present = items
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now_nanos()));
        items.insert(key.to_string(), Entry::new(value.to_string(), expires_at));
        was_present
    }

    /// Overwrite only when the key is live. Returns `true` on overwrite.
    pub(crate) fn replace(&self, key: &str, value: &str, ttl: Ttl) -> bool {
        if key.is_empty() {
            return false;
        }
        let expires_at = self.expiry_for(ttl);
        let mut items = self.items.write();
        if items
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now_nanos()))
        {
            items.insert(key.to_string(), Entry::new(value.to_string(), expires_at));
            true
        } else {
            false
        }
    }

    /// First writer wins: returns the existing live, non-empty value
    /// untouched, or inserts and returns `None`.
    pub(crate) fn add(&self, key: &str, value: &str, ttl: Ttl) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        let expires_at = self.expiry_for(ttl);
        let mut items = self.items.write();
        match items.get(key) {
            Some(entry) if !entry.is_expired_at(now_nanos()) && !entry.value.is_empty() => {
                Some(entry.value.clone())
            }
            _ => {
                items.insert(key.to_string(), Entry::new(value.to_string(), expires_at));
                None
            }
        }
    }

    /// Rewrite an entry through a caller-supplied function that may also
    /// rename the key. The old key is dropped silently on a rename.
    /// Returns the new pair and whether the key was present.
    pub(crate) fn function_update<F>(&self, key: &str, f: F, ttl: Ttl) -> (String, String, bool)
    where
        F: FnOnce(&str, &str) -> (String, String),
    {
        let expires_at = self.expiry_for(ttl);
        let mut items = self.items.write();
        let current = items
            .get(key)
            .filter(|entry| !entry.is_expired_at(now_nanos()))
            .map(|entry| entry.value.clone());
        let was_present = current.is_some();

        let (new_key, new_value) = f(key, current.as_deref().unwrap_or(""));
        if was_present && new_key != key {
            items.remove(key);
        }
        if !new_key.is_empty() && !new_value.is_empty() {
            items.insert(new_key.clone(), Entry::new(new_value.clone(), expires_at));
        }
        (new_key, new_value, was_present)
    }

    /// Remove a key. The old value is reported only when an eviction
    /// callback is installed; otherwise the removal is silent.
    pub(crate) fn remove(&self, key: &str) -> Option<String> {
        let report = self.callback().is_some();
        let mut items = self.items.write();
        let removed = items.remove(key);
        if report { removed.map(|entry| entry.value) } else { None }
    }

    /// Remove every expired entry, then invoke the eviction callback on
    /// each removed pair with no lock held.
    pub(crate) fn sweep(&self) {
        let callback = self.callback();
        let now = now_nanos();
        let mut evicted: Vec<(String, String)> = Vec::new();
        {
            let mut items = self.items.write();
            items.retain(|key, entry| {
                if entry.is_expired_at(now) {
                    if callback.is_some() {
                        evicted.push((key.clone(), entry.value.clone()));
                    }
                    false
                } else {
                    true
                }
            });
        }
        if let Some(callback) = callback {
            for (key, value) in &evicted {
                callback(key, value);
            }
        }
    }

    /// Copy of all currently non-expired entries
    pub(crate) fn snapshot(&self) -> HashMap<String, Entry> {
        let now = now_nanos();
        let items = self.items.read();
        items
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Entry count, possibly including yet-unswept expired entries
    pub(crate) fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Drop every entry without firing evictions
    pub(crate) fn clear(&self) {
        *self.items.write() = HashMap::new();
    }

    pub(crate) fn callback(&self) -> Option<EvictionCallback> {
        self.on_evicted.lock().clone()
    }

    pub(crate) fn set_callback(&self, callback: Option<EvictionCallback>) {
        *self.on_evicted.lock() = callback;
    }
}

/// Spawn the periodic sweeper for a core.
///
/// The task holds only a `Weak` reference, so a bucket dropped without a
/// close never stays alive through its sweeper; the failed upgrade doubles
/// as the exit signal alongside the close token.
pub(crate) fn spawn_sweeper(core: &Arc<BucketCore>, interval: Duration, stop: CancellationToken) {
    let weak: Weak<BucketCore> = Arc::downgrade(core);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick completes immediately
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(core) = weak.upgrade() else { break };
                    core.sweep();
                }
            }
        }
        debug!("sweeper stopped");
    });
}
