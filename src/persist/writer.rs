//! Process-wide working-log writer
//!
//! A single task owns every append and compaction, so appends to different
//! buckets never need per-file coordination. Producers reach it through a
//! bounded queue: persistent mutations use a timed send and are dropped
//! once the queue stays full past the load delay, compaction requests from
//! the public API use a non-blocking send, and the compactor waits.
//! Persistence is best-effort throughout; individual I/O failures are
//! logged and swallowed.

use crate::bucket::core::BucketCore;
use crate::persist::record::LogRecord;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Global counter for appends dropped on a saturated writer queue
pub static APPENDS_DROPPED: AtomicU64 = AtomicU64::new(0);

/// Global counter for compaction requests skipped by the per-file throttle
pub static COMPACTIONS_SKIPPED: AtomicU64 = AtomicU64::new(0);

/// A bucket's working log: its path plus the append-mode handle.
///
/// The handle is released on close; requests still in flight then find the
/// slot empty and do nothing.
pub(crate) struct WorkingFile {
    path: PathBuf,
    handle: Mutex<Option<File>>,
}

impl WorkingFile {
    pub(crate) fn new(path: PathBuf, file: File) -> Self {
        Self {
            path,
            handle: Mutex::new(Some(file)),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn release(&self) -> Option<File> {
        self.handle.lock().take()
    }

    pub(crate) fn is_released(&self) -> bool {
        self.handle.lock().is_none()
    }
}

/// Request consumed by the writer task
pub(crate) enum WriteRequest {
    /// Append one record to the bucket's working log
    Append {
        key: String,
        value: String,
        file: Arc<WorkingFile>,
    },
    /// Rewrite the working log from a live snapshot
    Compact {
        core: Arc<BucketCore>,
        file: Arc<WorkingFile>,
    },
}

/// Writer state carried across requests, including across caught panics
struct Writer {
    last_compact: HashMap<PathBuf, Instant>,
    compaction_interval: Duration,
}

impl Writer {
    fn handle(&mut self, request: WriteRequest) {
        match request {
            WriteRequest::Append { key, value, file } => self.append(&key, &value, &file),
            WriteRequest::Compact { core, file } => self.compact(&core, &file),
        }
    }

    fn append(&self, key: &str, value: &str, file: &WorkingFile) {
        let Ok(line) = LogRecord::new(key, value).to_line() else {
            return;
        };
        let mut handle = file.handle.lock();
        if let Some(log) = handle.as_mut()
            && let Err(e) = log.write_all(&line)
        {
            debug!(path = %file.path().display(), error = %e, "append failed");
        }
    }

    fn compact(&mut self, core: &BucketCore, file: &WorkingFile) {
        let now = Instant::now();
        match self.last_compact.get(file.path()) {
            Some(last) if now.duration_since(*last) < self.compaction_interval => {
                COMPACTIONS_SKIPPED.fetch_add(1, Ordering::Relaxed);
                debug!(path = %file.path().display(), "compaction throttled");
                return;
            }
            Some(_) => {
                self.last_compact.insert(file.path().to_path_buf(), now);
            }
            None => {
                // seed the throttle just in the past: the first compaction
                // of a file always runs, the next one is throttled
                let seed = now.checked_sub(Duration::from_secs(1)).unwrap_or(now);
                self.last_compact.insert(file.path().to_path_buf(), seed);
            }
        }

        let mut handle = file.handle.lock();
        let Some(log) = handle.as_mut() else {
            return;
        };
        if let Err(e) = rewrite(log, core) {
            debug!(path = %file.path().display(), error = %e, "compaction failed");
        } else {
            debug!(path = %file.path().display(), "working log compacted");
        }
    }
}

/// Truncate the log and write back the live snapshot, one record per line
fn rewrite(log: &mut File, core: &BucketCore) -> io::Result<()> {
    log.set_len(0)?;
    log.seek(SeekFrom::Start(0))?;
    for (key, entry) in core.snapshot() {
        if entry.value.is_empty() {
            continue;
        }
        if let Ok(line) = LogRecord::new(key, entry.value).to_line() {
            log.write_all(&line)?;
        }
    }
    Ok(())
}

/// Spawn the writer task.
///
/// Returns the producer side of its bounded queue and the join handle the
/// runtime awaits at termination. Queued requests are not drained on
/// shutdown.
pub(crate) fn spawn_writer(
    queue_len: usize,
    compaction_interval: Duration,
    shutdown: CancellationToken,
) -> (mpsc::Sender<WriteRequest>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(queue_len);
    let handle = tokio::spawn(async move {
        info!(queue_len, "writer started");
        let mut writer = Writer {
            last_compact: HashMap::new(),
            compaction_interval,
        };
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                request = rx.recv() => {
                    let Some(request) = request else { break };
                    // a panicking request must not take the throttle map
                    // down with it; the loop resumes with state intact
                    if catch_unwind(AssertUnwindSafe(|| writer.handle(request))).is_err() {
                        warn!("writer request panicked, resuming");
                    }
                }
            }
        }
        info!("writer stopped");
    });
    (tx, handle)
}
