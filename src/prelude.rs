//! Prelude module for common imports.
//!
//! This module re-exports commonly used types and traits for convenience.
//!
//! # Usage
//!
//! ```ignore
//! use amphora::prelude::*;
//! ```

// Error types
pub use crate::error::{AmphoraError, Result};

// Configuration
pub use crate::config::Options;

// Buckets
pub use crate::bucket::{Bucket, Entry, EvictionCallback, Ttl};

// Runtime
pub use crate::runtime::Runtime;

// Common external crates
pub use std::sync::Arc;
pub use std::time::Duration;
pub use tracing::{debug, error, info, trace, warn};
