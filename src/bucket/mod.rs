//! User-facing bucket handle
//!
//! A bucket owns one in-memory core and one working log. Mutations hit the
//! map first; when flagged persistent they are then offered to the
//! process-wide writer with a bounded wait, so a saturated queue costs the
//! caller at most the configured load delay and the append is dropped.
//! Closing serializes the live snapshot to a recovery file; dropping an
//! unclosed handle still stops its background tasks.

pub(crate) mod core;
pub(crate) mod entry;

pub use self::core::EvictionCallback;
pub use entry::{Entry, Ttl};

use self::core::BucketCore;
use crate::persist::encode_snapshot;
use crate::persist::writer::{APPENDS_DROPPED, WorkingFile, WriteRequest};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A named, independently persistable cache instance
pub struct Bucket {
    name: String,
    core: Arc<BucketCore>,
    file: Arc<WorkingFile>,
    writer: mpsc::Sender<WriteRequest>,
    load_delay: Duration,
    recovery_path: PathBuf,
    close_token: CancellationToken,
}

impl Bucket {
    pub(crate) fn new(
        name: String,
        core: Arc<BucketCore>,
        file: Arc<WorkingFile>,
        writer: mpsc::Sender<WriteRequest>,
        load_delay: Duration,
        recovery_path: PathBuf,
        close_token: CancellationToken,
    ) -> Self {
        Self {
            name,
            core,
            file,
            writer,
            load_delay,
            recovery_path,
            close_token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn core(&self) -> &Arc<BucketCore> {
        &self.core
    }

    pub(crate) fn close_token(&self) -> &CancellationToken {
        &self.close_token
    }

    pub(crate) fn working_file(&self) -> &Arc<WorkingFile> {
        &self.file
    }

    /// Write a key/value pair. No-op on an empty key or value.
    pub async fn set(&self, key: &str, value: &str, ttl: Ttl, persist: bool) {
        if key.is_empty() || value.is_empty() {
            return;
        }
        self.core.set(key, value, ttl);
        if persist {
            self.enqueue_append(key, value).await;
        }
    }

    /// Overwrite in place when the key exists (the working log is left
    /// untouched); insert with [`set`] semantics otherwise.
    ///
    /// [`set`]: Bucket::set
    pub async fn update(&self, key: &str, value: &str, ttl: Ttl, persist: bool) {
        if key.is_empty() || value.is_empty() {
            return;
        }
        let was_present = self.core.update(key, value, ttl);
        if !was_present && persist {
            self.enqueue_append(key, value).await;
        }
    }

    /// Overwrite an existing key only; absent keys are left absent
    pub async fn replace(&self, key: &str, value: &str, ttl: Ttl, persist: bool) {
        if key.is_empty() || value.is_empty() {
            return;
        }
        if self.core.replace(key, value, ttl) && persist {
            self.enqueue_append(key, value).await;
        }
    }

    /// Insert only when the key has no live, non-empty value yet.
    /// Returns the existing value untouched when there is one.
    pub async fn add(&self, key: &str, value: &str, ttl: Ttl, persist: bool) -> Option<String> {
        if key.is_empty() || value.is_empty() {
            return None;
        }
        let existing = self.core.add(key, value, ttl);
        if existing.is_none() && persist {
            self.enqueue_append(key, value).await;
        }
        existing
    }

    /// Rewrite an entry through `f`, which receives the key and the current
    /// value (`""` when absent) and returns the new pair. Returning a
    /// different key deletes the old one. Returns the new pair and whether
    /// the key was present.
    pub async fn function_update<F>(
        &self,
        key: &str,
        f: F,
        ttl: Ttl,
        persist: bool,
    ) -> (String, String, bool)
    where
        F: FnOnce(&str, &str) -> (String, String),
    {
        if key.is_empty() {
            return (String::new(), String::new(), false);
        }
        let (new_key, new_value, was_present) = self.core.function_update(key, f, ttl);
        if persist && !new_key.is_empty() && !new_value.is_empty() {
            self.enqueue_append(&new_key, &new_value).await;
        }
        (new_key, new_value, was_present)
    }

    /// Expiry-aware read
    pub fn get(&self, key: &str) -> Option<String> {
        self.core.get(key)
    }

    /// Expiry-aware read that also returns the expiry instant
    /// (`None` when the entry never expires)
    pub fn get_with_expiration(&self, key: &str) -> Option<(String, Option<SystemTime>)> {
        self.core.get_entry(key).map(|entry| {
            let expiry = entry.expiry_time();
            (entry.value, expiry)
        })
    }

    /// All live entries with non-empty values
    pub fn items(&self) -> HashMap<String, String> {
        self.core
            .snapshot()
            .into_iter()
            .filter(|(_, entry)| !entry.value.is_empty())
            .map(|(key, entry)| (key, entry.value))
            .collect()
    }

    /// Remove a key, invoking the eviction callback when one is installed
    pub fn delete(&self, key: &str) {
        if let Some(value) = self.core.remove(key)
            && let Some(callback) = self.core.callback()
        {
            callback(key, &value);
        }
    }

    /// Drop every entry without firing evictions
    pub fn flush(&self) {
        self.core.clear();
    }

    /// Number of entries, possibly including yet-unswept expired ones
    pub fn item_count(&self) -> usize {
        self.core.len()
    }

    /// Install or clear the eviction callback. The callback fires on
    /// deletes and sweeps, never on overwrites, and always runs with no
    /// internal lock held.
    pub fn on_evicted(&self, callback: Option<EvictionCallback>) {
        self.core.set_callback(callback);
    }

    /// Synchronously remove all expired entries
    pub fn delete_expired(&self) {
        self.core.sweep();
    }

    /// Sweep, then ask the writer to rewrite the working log from the
    /// current snapshot. Best-effort: on a full queue the request is
    /// dropped rather than waited for.
    pub fn compact(&self) {
        self.core.sweep();
        let request = WriteRequest::Compact {
            core: Arc::clone(&self.core),
            file: Arc::clone(&self.file),
        };
        if self.writer.try_send(request).is_err() {
            debug!(bucket = %self.name, "compaction request dropped, queue full");
        }
    }

    /// Serialize the live snapshot to the recovery file and release the
    /// working log. With `keep` false the working log is deleted; if the
    /// snapshot cannot be written the recovery file is deleted instead and
    /// the working log stays either way.
    pub fn close(self, keep: bool) {
        let snapshot = self.core.snapshot();
        let written = encode_snapshot(&snapshot)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(&self.recovery_path, bytes));

        self.file.release();

        match written {
            Ok(()) => {
                if !keep {
                    let _ = std::fs::remove_file(self.file.path());
                }
                info!(bucket = %self.name, entries = snapshot.len(), "bucket closed");
            }
            Err(e) => {
                warn!(bucket = %self.name, error = %e, "recovery snapshot failed");
                let _ = std::fs::remove_file(&self.recovery_path);
            }
        }
        self.close_token.cancel();
    }

    async fn enqueue_append(&self, key: &str, value: &str) {
        let request = WriteRequest::Append {
            key: key.to_string(),
            value: value.to_string(),
            file: Arc::clone(&self.file),
        };
        if self
            .writer
            .send_timeout(request, self.load_delay)
            .await
            .is_err()
        {
            APPENDS_DROPPED.fetch_add(1, Ordering::Relaxed);
            debug!(bucket = %self.name, key, "append dropped, queue full");
        }
    }
}

impl Drop for Bucket {
    /// Stops the sweeper and compactor for handles dropped without a close
    fn drop(&mut self) {
        self.close_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn test_bucket(
        dir: &TempDir,
        buffering: usize,
    ) -> (Bucket, mpsc::Receiver<WriteRequest>) {
        let path = dir.path().join("t.data");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        let (tx, rx) = mpsc::channel(buffering);
        let bucket = Bucket::new(
            "t".to_string(),
            Arc::new(BucketCore::new(None)),
            Arc::new(WorkingFile::new(path, file)),
            tx,
            Duration::from_millis(5),
            dir.path().join("t.rec"),
            CancellationToken::new(),
        );
        (bucket, rx)
    }

    #[tokio::test]
    async fn set_enqueues_only_when_persistent() {
        let dir = TempDir::new().unwrap();
        let (bucket, mut rx) = test_bucket(&dir, 10);

        bucket.set("a", "1", Ttl::Default, false).await;
        bucket.set("b", "2", Ttl::Default, true).await;

        match rx.try_recv().unwrap() {
            WriteRequest::Append { key, value, .. } => {
                assert_eq!((key.as_str(), value.as_str()), ("b", "2"));
            }
            WriteRequest::Compact { .. } => panic!("expected an append"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_keys_and_values_are_noops() {
        let dir = TempDir::new().unwrap();
        let (bucket, mut rx) = test_bucket(&dir, 10);

        bucket.set("", "v", Ttl::Default, true).await;
        bucket.set("k", "", Ttl::Default, true).await;
        bucket.update("", "v", Ttl::Default, true).await;
        bucket.replace("", "v", Ttl::Default, true).await;
        assert_eq!(bucket.add("", "v", Ttl::Default, true).await, None);
        let (_, _, present) = bucket
            .function_update("", |k, v| (k.to_string(), v.to_string()), Ttl::Default, true)
            .await;

        assert!(!present);
        assert_eq!(bucket.item_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_enqueues_only_on_insert() {
        let dir = TempDir::new().unwrap();
        let (bucket, mut rx) = test_bucket(&dir, 10);

        bucket.update("k", "v1", Ttl::Default, true).await;
        assert!(rx.try_recv().is_ok());

        bucket.update("k", "v2", Ttl::Default, true).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(bucket.get("k"), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn replace_on_an_empty_bucket_stays_empty() {
        let dir = TempDir::new().unwrap();
        let (bucket, mut rx) = test_bucket(&dir, 10);

        bucket.replace("k", "v", Ttl::Default, true).await;
        assert_eq!(bucket.get("k"), None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn add_keeps_the_first_value() {
        let dir = TempDir::new().unwrap();
        let (bucket, mut rx) = test_bucket(&dir, 10);

        assert_eq!(bucket.add("k", "v1", Ttl::Default, true).await, None);
        assert_eq!(
            bucket.add("k", "v2", Ttl::Default, true).await,
            Some("v1".to_string())
        );
        assert_eq!(bucket.get("k"), Some("v1".to_string()));
        // only the winning insert was offered to the writer
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn function_update_moves_the_key() {
        let dir = TempDir::new().unwrap();
        let (bucket, mut rx) = test_bucket(&dir, 10);

        bucket.set("x", "1", Ttl::Default, false).await;
        let (key, value, present) = bucket
            .function_update("x", |_, v| ("y".to_string(), format!("{v}!")), Ttl::Default, true)
            .await;

        assert_eq!((key.as_str(), value.as_str(), present), ("y", "1!", true));
        assert_eq!(bucket.get("x"), None);
        assert_eq!(bucket.get("y"), Some("1!".to_string()));
        match rx.try_recv().unwrap() {
            WriteRequest::Append { key, value, .. } => {
                assert_eq!((key.as_str(), value.as_str()), ("y", "1!"));
            }
            WriteRequest::Compact { .. } => panic!("expected an append"),
        }
    }

    #[tokio::test]
    async fn get_with_expiration_reports_the_instant() {
        let dir = TempDir::new().unwrap();
        let (bucket, _rx) = test_bucket(&dir, 10);

        bucket.set("ttl", "v", Ttl::After(Duration::from_secs(60)), false).await;
        bucket.set("forever", "v", Ttl::Never, false).await;

        let (_, expiry) = bucket.get_with_expiration("ttl").unwrap();
        assert!(expiry.unwrap() > SystemTime::now());
        let (_, expiry) = bucket.get_with_expiration("forever").unwrap();
        assert!(expiry.is_none());
        assert!(bucket.get_with_expiration("missing").is_none());
    }

    #[tokio::test]
    async fn delete_fires_the_callback_exactly_once() {
        let dir = TempDir::new().unwrap();
        let (bucket, _rx) = test_bucket(&dir, 10);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        bucket.on_evicted(Some(Arc::new(move |_: &str, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        bucket.set("k", "v", Ttl::Default, false).await;
        bucket.delete("k");
        bucket.delete("k");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eviction_callback_may_reenter_the_bucket() {
        let dir = TempDir::new().unwrap();
        let (bucket, _rx) = test_bucket(&dir, 10);
        let bucket = Arc::new(bucket);

        let seen = Arc::new(parking_lot::Mutex::new(None));
        let reentrant = Arc::clone(&bucket);
        let seen_in_callback = Arc::clone(&seen);
        bucket.on_evicted(Some(Arc::new(move |key: &str, value: &str| {
            // no internal lock is held here, so reads must succeed
            *seen_in_callback.lock() = Some((key.to_string(), value.to_string()));
            assert_eq!(reentrant.get(key), None);
        })));

        bucket.set("k", "v", Ttl::Default, false).await;
        bucket.delete("k");
        assert_eq!(
            seen.lock().clone(),
            Some(("k".to_string(), "v".to_string()))
        );
    }

    #[tokio::test]
    async fn items_filters_expired_entries() {
        let dir = TempDir::new().unwrap();
        let (bucket, _rx) = test_bucket(&dir, 10);

        bucket.set("live", "1", Ttl::Never, false).await;
        bucket
            .set("dead", "2", Ttl::After(Duration::from_nanos(1)), false)
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let items = bucket.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items.get("live").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn flush_empties_without_evictions() {
        let dir = TempDir::new().unwrap();
        let (bucket, _rx) = test_bucket(&dir, 10);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        bucket.on_evicted(Some(Arc::new(move |_: &str, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        bucket.set("a", "1", Ttl::Default, false).await;
        bucket.set("b", "2", Ttl::Default, false).await;
        bucket.flush();
        assert_eq!(bucket.item_count(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn saturated_queue_drops_appends_but_keeps_memory_complete() {
        let dir = TempDir::new().unwrap();
        let (bucket, _rx) = test_bucket(&dir, 10);

        let dropped_before = APPENDS_DROPPED.load(Ordering::Relaxed);
        // nobody drains the queue: the first 10 sends fill it, the rest
        // time out after the load delay and are dropped
        for i in 0..15 {
            bucket
                .set(&format!("k{i}"), "v", Ttl::Default, true)
                .await;
        }

        assert_eq!(bucket.item_count(), 15);
        assert!(APPENDS_DROPPED.load(Ordering::Relaxed) >= dropped_before + 5);
    }

    #[tokio::test]
    async fn compact_sweeps_and_enqueues_without_blocking() {
        let dir = TempDir::new().unwrap();
        let (bucket, mut rx) = test_bucket(&dir, 10);

        bucket
            .set("dead", "1", Ttl::After(Duration::from_nanos(1)), false)
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        bucket.compact();
        assert_eq!(bucket.item_count(), 0);
        assert!(matches!(
            rx.try_recv().unwrap(),
            WriteRequest::Compact { .. }
        ));

        // fill the queue: a further compact drops instead of waiting
        for i in 0..10 {
            bucket.set(&format!("k{i}"), "v", Ttl::Default, true).await;
        }
        bucket.compact();
    }

    #[tokio::test]
    async fn close_writes_a_decodable_snapshot() {
        let dir = TempDir::new().unwrap();
        let (bucket, _rx) = test_bucket(&dir, 10);

        bucket.set("a", "1", Ttl::Default, false).await;
        bucket.set("b", "2", Ttl::Default, false).await;
        let data_path = dir.path().join("t.data");
        let recovery_path = dir.path().join("t.rec");

        bucket.close(true);

        assert!(data_path.exists()); // keep = true
        let snapshot = crate::persist::decode_snapshot(&std::fs::read(&recovery_path).unwrap()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a").unwrap().value, "1");
    }

    #[tokio::test]
    async fn close_without_keep_removes_the_working_log() {
        let dir = TempDir::new().unwrap();
        let (bucket, _rx) = test_bucket(&dir, 10);

        bucket.set("a", "1", Ttl::Default, false).await;
        let data_path = dir.path().join("t.data");
        bucket.close(false);
        assert!(!data_path.exists());
        assert!(dir.path().join("t.rec").exists());
    }
}
