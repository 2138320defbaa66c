//! Error type shared by every layer of the engine.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, NtfsError>;

#[derive(Debug, Error)]
pub enum NtfsError {
    #[error("corrupt metadata: {0}")]
    Corrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("out of space")]
    OutOfSpace,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("volume is read-only")]
    ReadOnly,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),
}

impl NtfsError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        NtfsError::Corrupt(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        NtfsError::NotFound(what.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        NtfsError::InvalidArgument(reason.into())
    }
}
