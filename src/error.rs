//! Error types for amphora

use thiserror::Error;

/// Main error type for amphora
#[derive(Error, Debug)]
pub enum AmphoraError {
    /// Every supplied option override was out of range. Non-fatal: the
    /// defaults apply and the runtime still starts.
    #[error("all option overrides were out of range")]
    IllegalParameter,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding error: {0}")]
    Encoding(String),

    #[error("Snapshot decoding error: {0}")]
    Decoding(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AmphoraError>;
