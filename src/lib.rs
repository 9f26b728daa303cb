//! # Amphora
//!
//! In-process key-value cache with per-bucket TTL and file-backed crash
//! recovery.
//!
//! *Amphora* (ἀμφορεύς) is the Greek storage jar - a nod to buckets that
//! survive being set down.
//!
//! ## Features
//!
//! - String-keyed buckets with per-entry or per-bucket TTL
//! - Lazy expiration on reads plus a background sweeper per bucket
//! - Best-effort persistence: an append-only working log per bucket,
//!   periodically compacted from a live snapshot
//! - Binary recovery snapshots on clean close, replayed at startup while
//!   still fresh
//! - Eviction callbacks invoked outside every internal lock
//!
//! ## Example
//!
//! ```ignore
//! use amphora::prelude::*;
//!
//! let runtime = Runtime::initialise(None)?;
//! let bucket = runtime.new_bucket("sessions", Ttl::After(ttl)).await?;
//! bucket.set("user:42", "token", Ttl::Default, true).await;
//! bucket.close(true);
//! runtime.terminate().await;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ set/get/…  ┌──────────────────────────┐
//! │ application │───────────▶│ Bucket                   │──▶ sweeper
//! └─────────────┘            │  └─ BucketCore (RwLock)  │──▶ compactor
//!                            └───────────┬──────────────┘        │
//!                              append    │ bounded queue         │ compact
//!                                        ▼                       ▼
//!                            ┌──────────────────────────────────────┐
//!                            │ Writer (one per runtime)             │
//!                            │  ├─ <name>.data  append + compact    │
//!                            │  └─ throttle map per file            │
//!                            └──────────────────────────────────────┘
//! ```

// Modules
pub mod bucket;
pub mod config;
pub mod error;
pub mod persist;
pub mod prelude;
pub mod runtime;

// Re-exports for convenience
pub use bucket::{Bucket, Entry, EvictionCallback, Ttl};
pub use config::Options;
pub use error::{AmphoraError, Result};
pub use runtime::Runtime;
