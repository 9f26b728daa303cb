//! Process-wide runtime handle
//!
//! The runtime owns the validated options and the writer task, and is the
//! factory for buckets. Terminating it stops the writer without draining
//! queued requests; dropping it unawaited cancels the writer as well.

use crate::bucket::core::{BucketCore, spawn_sweeper};
use crate::bucket::{Bucket, Ttl};
use crate::config::Options;
use crate::error::Result;
use crate::persist::compactor::spawn_compactor;
use crate::persist::recovery;
use crate::persist::writer::{WorkingFile, WriteRequest, spawn_writer};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Handle over the cache runtime: validated options plus the writer task
pub struct Runtime {
    options: Options,
    writer_tx: mpsc::Sender<WriteRequest>,
    writer: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Runtime {
    /// Validate options, create the working and recovery folders, and
    /// start the writer.
    ///
    /// Overrides that fail validation fall back to their defaults; when
    /// every override is rejected the runtime still starts on pure
    /// defaults (use [`Options::resolve`] directly to treat that as an
    /// error). Folder creation failure is the only propagated error.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialise(overrides: Option<Options>) -> Result<Self> {
        let options = match overrides {
            Some(overrides) => overrides.resolve().unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default options");
                Options::default()
            }),
            None => Options::default(),
        };

        std::fs::create_dir_all(&options.working_folder)?;
        std::fs::create_dir_all(&options.recovery_folder)?;

        let shutdown = CancellationToken::new();
        let (writer_tx, writer) = spawn_writer(
            options.internal_buffering,
            options.compaction_interval(),
            shutdown.clone(),
        );

        info!(
            working = %options.working_folder.display(),
            recovery = %options.recovery_folder.display(),
            "runtime initialised"
        );
        Ok(Self {
            options,
            writer_tx,
            writer: Mutex::new(Some(writer)),
            shutdown,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Create a bucket, repopulating it from a fresh recovery snapshot or
    /// working log when one exists.
    ///
    /// `ttl` becomes the bucket's default TTL; `Ttl::Default` falls back
    /// to the runtime's `expiration_time_secs` option.
    pub async fn new_bucket(&self, name: &str, ttl: Ttl) -> Result<Bucket> {
        let working_path = self.options.working_path(name);
        let recovery_path = self.options.recovery_path(name);
        let window = self.options.freshness_window();

        let default_ttl = match ttl {
            Ttl::After(d) => Some(d),
            Ttl::Never => None,
            Ttl::Default => self.options.default_ttl(),
        };
        let core = Arc::new(BucketCore::new(default_ttl));

        // a fresh snapshot from a clean close wins over the working log
        if recovery::file_is_fresh(&recovery_path, window) {
            match recovery::load_snapshot(&recovery_path) {
                Ok(snapshot) => {
                    let file = open_working_log(&working_path, true)?;
                    let bucket = self.assemble(name, core, file, working_path, recovery_path.clone());
                    let entries = snapshot.len();
                    for (key, entry) in snapshot {
                        // recovered values re-enter through the normal
                        // persistent path, filling the fresh log
                        bucket.set(&key, &entry.value, Ttl::Default, true).await;
                    }
                    if let Err(e) = std::fs::remove_file(&recovery_path) {
                        warn!(bucket = name, error = %e, "could not remove replayed snapshot");
                    }
                    info!(bucket = name, entries, "recovered from snapshot");
                    self.start_tasks(&bucket);
                    return Ok(bucket);
                }
                Err(e) => {
                    warn!(bucket = name, error = %e, "recovery snapshot unreadable, removing");
                    let _ = std::fs::remove_file(&recovery_path);
                }
            }
        }

        // crash leftovers: replay the log in place, memory only
        if recovery::file_is_fresh(&working_path, window) {
            match recovery::read_log(&working_path) {
                Ok(records) => {
                    let replayed = records.len();
                    for record in records {
                        core.update(&record.key, &record.value, Ttl::Default);
                    }
                    info!(bucket = name, replayed, "recovered from working log");
                }
                Err(e) => {
                    warn!(bucket = name, error = %e, "working log unreadable, starting empty");
                }
            }
            let file = open_working_log(&working_path, false)?;
            let bucket = self.assemble(name, core, file, working_path, recovery_path);
            self.start_tasks(&bucket);
            return Ok(bucket);
        }

        // nothing recoverable, start from an empty log
        let file = open_working_log(&working_path, true)?;
        let bucket = self.assemble(name, core, file, working_path, recovery_path);
        self.start_tasks(&bucket);
        Ok(bucket)
    }

    /// Stop the writer and wait for it to acknowledge by exiting.
    /// Queued requests are not drained.
    pub async fn terminate(self) {
        self.shutdown.cancel();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if writer.await.is_err() {
                warn!("writer task aborted");
            }
        }
        info!("runtime terminated");
    }

    fn assemble(
        &self,
        name: &str,
        core: Arc<BucketCore>,
        file: File,
        working_path: PathBuf,
        recovery_path: PathBuf,
    ) -> Bucket {
        Bucket::new(
            name.to_string(),
            core,
            Arc::new(WorkingFile::new(working_path, file)),
            self.writer_tx.clone(),
            self.options.load_delay(),
            recovery_path,
            CancellationToken::new(),
        )
    }

    fn start_tasks(&self, bucket: &Bucket) {
        // entries live at most one default TTL past their expiry
        if let Some(ttl) = bucket.core().default_ttl() {
            spawn_sweeper(bucket.core(), ttl * 2, bucket.close_token().clone());
        }
        spawn_compactor(
            Arc::clone(bucket.core()),
            Arc::clone(bucket.working_file()),
            self.writer_tx.clone(),
            self.options.compaction_interval(),
            bucket.close_token().clone(),
        );
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Open a bucket's working log in append mode, optionally discarding any
/// previous contents
fn open_working_log(path: &Path, truncate: bool) -> Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    if truncate {
        file.set_len(0)?;
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn options_in(dir: &TempDir) -> Options {
        Options {
            working_folder: dir.path().join("work"),
            recovery_folder: dir.path().join("rec"),
            ..Options::default()
        }
    }

    #[tokio::test]
    async fn initialise_creates_the_folders() {
        let dir = TempDir::new().unwrap();
        let runtime = Runtime::initialise(Some(options_in(&dir))).unwrap();
        assert!(dir.path().join("work").is_dir());
        assert!(dir.path().join("rec").is_dir());
        runtime.terminate().await;
    }

    #[tokio::test]
    async fn initialise_survives_fully_invalid_overrides() {
        let runtime = Runtime::initialise(Some(Options {
            interval_compacting_secs: 1,
            internal_buffering: 1,
            load_delay_ms: 1,
            ..Options::default()
        }))
        .unwrap();
        assert_eq!(runtime.options().internal_buffering, 10);
        runtime.terminate().await;
    }

    #[tokio::test]
    async fn fresh_bucket_starts_empty_with_an_empty_log() {
        let dir = TempDir::new().unwrap();
        let runtime = Runtime::initialise(Some(options_in(&dir))).unwrap();

        let bucket = runtime.new_bucket("fresh", Ttl::Never).await.unwrap();
        assert_eq!(bucket.item_count(), 0);
        assert!(dir.path().join("work/fresh.data").exists());

        bucket.close(false);
        runtime.terminate().await;
    }

    #[tokio::test]
    async fn close_then_reopen_restores_every_entry() {
        let dir = TempDir::new().unwrap();
        let runtime = Runtime::initialise(Some(options_in(&dir))).unwrap();

        let bucket = runtime
            .new_bucket("round", Ttl::After(Duration::from_secs(180)))
            .await
            .unwrap();
        for i in 0..20 {
            bucket
                .set(&format!("k{i}"), &format!("v{i}"), Ttl::Default, true)
                .await;
        }
        bucket.close(true);
        assert!(dir.path().join("rec/round.rec").exists());

        let bucket = runtime
            .new_bucket("round", Ttl::After(Duration::from_secs(180)))
            .await
            .unwrap();
        for i in 0..20 {
            assert_eq!(bucket.get(&format!("k{i}")), Some(format!("v{i}")));
        }
        // the replayed snapshot is consumed
        assert!(!dir.path().join("rec/round.rec").exists());

        bucket.close(false);
        runtime.terminate().await;
    }

    #[tokio::test]
    async fn working_log_replay_applies_last_record_wins() {
        let dir = TempDir::new().unwrap();
        let runtime = Runtime::initialise(Some(options_in(&dir))).unwrap();

        let log_path = dir.path().join("work/crashed.data");
        let mut log = File::create(&log_path).unwrap();
        writeln!(log, "{{\"key\":\"a\",\"value\":\"old\"}}").unwrap();
        writeln!(log, "{{\"key\":\"b\",\"value\":\"2\"}}").unwrap();
        writeln!(log, "{{\"key\":\"a\",\"value\":\"new\"}}").unwrap();
        drop(log);

        let bucket = runtime.new_bucket("crashed", Ttl::Never).await.unwrap();
        assert_eq!(bucket.get("a"), Some("new".to_string()));
        assert_eq!(bucket.get("b"), Some("2".to_string()));
        assert_eq!(bucket.item_count(), 2);

        bucket.close(false);
        runtime.terminate().await;
    }

    #[tokio::test]
    async fn unreadable_snapshot_falls_back_to_the_working_log() {
        let dir = TempDir::new().unwrap();
        let runtime = Runtime::initialise(Some(options_in(&dir))).unwrap();

        std::fs::write(dir.path().join("rec/mixed.rec"), b"\xc1 not msgpack").unwrap();
        let mut log = File::create(dir.path().join("work/mixed.data")).unwrap();
        writeln!(log, "{{\"key\":\"k\",\"value\":\"from-log\"}}").unwrap();
        drop(log);

        let bucket = runtime.new_bucket("mixed", Ttl::Never).await.unwrap();
        assert_eq!(bucket.get("k"), Some("from-log".to_string()));
        // the corrupt snapshot was discarded
        assert!(!dir.path().join("rec/mixed.rec").exists());

        bucket.close(false);
        runtime.terminate().await;
    }
}
