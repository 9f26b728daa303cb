//! Bucket recovery at creation time
//!
//! A bucket repopulates from the first sufficiently fresh persisted
//! artifact: the recovery snapshot from a clean close wins over the
//! working log left by a crash. Staleness is judged by file mtime against
//! the configured window; stale files are ignored in place, never deleted.

use crate::bucket::entry::Entry;
use crate::error::Result;
use crate::persist::record::{self, LogRecord};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// True when a file modified at `mtime` is still young enough to replay.
/// An mtime in the future reads as age zero.
pub(crate) fn is_fresh(mtime: SystemTime, now: SystemTime, window: Duration) -> bool {
    match now.duration_since(mtime) {
        Ok(age) => age < window,
        Err(_) => true,
    }
}

/// Stat a persisted artifact and apply the freshness rule.
/// Missing or unreadable files are simply not fresh.
pub(crate) fn file_is_fresh(path: &Path, window: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .is_ok_and(|mtime| is_fresh(mtime, SystemTime::now(), window))
}

/// Read and decode a recovery snapshot
pub(crate) fn load_snapshot(path: &Path) -> Result<HashMap<String, Entry>> {
    let bytes = std::fs::read(path)?;
    record::decode_snapshot(&bytes)
}

/// Replay a working log, skipping lines that fail to parse.
/// Records come back in file order; the caller applies last-wins.
pub(crate) fn read_log(path: &Path) -> std::io::Result<Vec<LogRecord>> {
    let file = File::open(path)?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match LogRecord::from_line(&line) {
            Ok(record) => records.push(record),
            Err(e) => debug!(path = %path.display(), error = %e, "skipping malformed log line"),
        }
    }
    Ok(records)
}
