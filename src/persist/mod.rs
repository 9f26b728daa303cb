//! Persistence layer: working logs, recovery snapshots and the background
//! tasks that maintain them

pub(crate) mod compactor;
mod record;
pub(crate) mod recovery;
pub(crate) mod writer;

pub use record::{LogRecord, decode_snapshot, encode_snapshot};
pub use writer::{APPENDS_DROPPED, COMPACTIONS_SKIPPED};
