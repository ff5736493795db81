//! Error types for `taskq` core library.

use thiserror::Error;

/// Result type alias using `taskq` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `taskq` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job file is well-formed TOML but describes an invalid job
    #[error("Invalid job file: {0}")]
    JobFile(String),

    /// TOML deserialization error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
