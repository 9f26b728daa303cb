//! Configuration for amphora

use crate::error::{AmphoraError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Runtime options.
///
/// A zero (or empty, for folders) field means "use the default". Overrides
/// below the legal minimum are rejected back to the default by [`resolve`];
/// see the field comments for the thresholds.
///
/// [`resolve`]: Options::resolve
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Default entry expiration in seconds (0 = entries never expire)
    pub expiration_time_secs: u64,

    /// Working-log compacting interval in seconds (minimum 60)
    pub interval_compacting_secs: u64,

    /// Writer queue length, decoupling the in-memory cache from disk.
    /// Bigger numbers improve cache speed at the expense of crash
    /// resistance (minimum 10)
    pub internal_buffering: usize,

    /// How long a persistent mutation waits for a writer queue slot before
    /// the append is dropped, in milliseconds (minimum 5)
    pub load_delay_ms: u64,

    /// Maximum age of a recovery or working file for it to be replayed at
    /// bucket creation; the eligibility window is `maximum_age * 60`
    /// seconds (minimum 1)
    pub maximum_age: u64,

    /// Folder for working logs (`<name>.data`)
    pub working_folder: PathBuf,

    /// Folder for recovery snapshots (`<name>.rec`)
    pub recovery_folder: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            expiration_time_secs: 0,
            interval_compacting_secs: 86400, // once a day
            internal_buffering: 10,
            load_delay_ms: 10,
            maximum_age: 300,
            working_folder: executable_dir(),
            recovery_folder: executable_dir(),
        }
    }
}

/// Directory holding the running executable, falling back to the current
/// directory when it cannot be determined.
fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Options {
    /// Load options from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AmphoraError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&contents)
            .map_err(|e| AmphoraError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load options from environment variables or use defaults
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(path) = std::env::var("AMPHORA_WORKING_FOLDER") {
            options.working_folder = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("AMPHORA_RECOVERY_FOLDER") {
            options.recovery_folder = PathBuf::from(path);
        }

        if let Ok(secs) = std::env::var("AMPHORA_EXPIRATION_TIME_SECS")
            && let Ok(n) = secs.parse()
        {
            options.expiration_time_secs = n;
        }

        if let Ok(secs) = std::env::var("AMPHORA_INTERVAL_COMPACTING_SECS")
            && let Ok(n) = secs.parse()
        {
            options.interval_compacting_secs = n;
        }

        options
    }

    /// Validate overrides against the per-field minimums.
    ///
    /// A field failing validation falls back to its default and is reported
    /// with a warning. Returns `Err(AmphoraError::IllegalParameter)` only
    /// when every overridden field was rejected; callers that treat this as
    /// non-fatal (as [`Runtime::initialise`] does) proceed with
    /// `Options::default()`.
    ///
    /// [`Runtime::initialise`]: crate::runtime::Runtime::initialise
    pub fn resolve(self) -> Result<Self> {
        let mut resolved = Self::default();
        let mut overridden = 0usize;
        let mut accepted = 0usize;

        if self.expiration_time_secs != 0 {
            overridden += 1;
            accepted += 1;
            resolved.expiration_time_secs = self.expiration_time_secs;
        }

        if self.interval_compacting_secs != 0 {
            overridden += 1;
            if self.interval_compacting_secs >= 60 {
                accepted += 1;
                resolved.interval_compacting_secs = self.interval_compacting_secs;
            } else {
                warn!(
                    value = self.interval_compacting_secs,
                    "interval_compacting_secs below 60, using default"
                );
            }
        }

        if self.internal_buffering != 0 {
            overridden += 1;
            if self.internal_buffering >= 10 {
                accepted += 1;
                resolved.internal_buffering = self.internal_buffering;
            } else {
                warn!(
                    value = self.internal_buffering,
                    "internal_buffering below 10, using default"
                );
            }
        }

        if self.load_delay_ms != 0 {
            overridden += 1;
            if self.load_delay_ms >= 5 {
                accepted += 1;
                resolved.load_delay_ms = self.load_delay_ms;
            } else {
                warn!(value = self.load_delay_ms, "load_delay_ms below 5, using default");
            }
        }

        if self.maximum_age != 0 {
            overridden += 1;
            accepted += 1;
            resolved.maximum_age = self.maximum_age;
        }

        if !self.working_folder.as_os_str().is_empty() && self.working_folder != resolved.working_folder {
            overridden += 1;
            accepted += 1;
            resolved.working_folder = self.working_folder;
        }

        if !self.recovery_folder.as_os_str().is_empty() && self.recovery_folder != resolved.recovery_folder {
            overridden += 1;
            accepted += 1;
            resolved.recovery_folder = self.recovery_folder;
        }

        if overridden > 0 && accepted == 0 {
            return Err(AmphoraError::IllegalParameter);
        }
        Ok(resolved)
    }

    /// Default TTL applied to entries written with `Ttl::Default`
    /// (`None` = never expire)
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.expiration_time_secs > 0).then(|| Duration::from_secs(self.expiration_time_secs))
    }

    /// Compacting cadence, also the throttle floor between two compactions
    /// of the same file
    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.interval_compacting_secs)
    }

    /// Producer-side writer queue send timeout
    pub fn load_delay(&self) -> Duration {
        Duration::from_millis(self.load_delay_ms)
    }

    /// Replay eligibility window for recovery and working files
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.maximum_age * 60)
    }

    /// Path of the working log for a bucket name
    pub fn working_path(&self, name: &str) -> PathBuf {
        self.working_folder.join(format!("{name}.data"))
    }

    /// Path of the recovery snapshot for a bucket name
    pub fn recovery_path(&self, name: &str) -> PathBuf {
        self.recovery_folder.join(format!("{name}.rec"))
    }
}
