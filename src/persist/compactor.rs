//! Per-bucket compaction timer
//!
//! Each bucket gets one compactor task. On every tick it sweeps expired
//! entries out of the core and asks the writer to rewrite the working log
//! from the surviving snapshot. Unlike producer appends, the enqueue waits
//! for a free queue slot: a periodic compaction is significant work and is
//! not dropped under backpressure.

use crate::bucket::core::BucketCore;
use crate::persist::writer::{WorkingFile, WriteRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Spawn the compaction timer for one bucket.
///
/// Exits when the close token fires, when the writer queue is gone, or on
/// the zombie guard: a tick that finds the working-file handle already
/// released means the bucket was closed without the token ever firing.
pub(crate) fn spawn_compactor(
    core: Arc<BucketCore>,
    file: Arc<WorkingFile>,
    writer: mpsc::Sender<WriteRequest>,
    interval: Duration,
    stop: CancellationToken,
) {
    tokio::spawn(async move {
        debug!(path = %file.path().display(), "compactor started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the first tick completes immediately
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if file.is_released() {
                        break;
                    }
                    core.sweep();
                    let request = WriteRequest::Compact {
                        core: Arc::clone(&core),
                        file: Arc::clone(&file),
                    };
                    if writer.send(request).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(path = %file.path().display(), "compactor stopped");
    });
}
