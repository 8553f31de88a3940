//! Error types for virtdb
//!
//! Provides a unified error type for all operations. "Not found" is never an
//! error: lookups return `Ok(None)` or `INVALID_PATH` instead.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using VirtDbError
pub type Result<T> = std::result::Result<T, VirtDbError>;

/// Unified error type for virtdb operations
#[derive(Debug, Error)]
pub enum VirtDbError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Caller Errors (rejected before any I/O)
    // -------------------------------------------------------------------------
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Timed out after {0:?} waiting for background merge to finish")]
    MergeTimeout(Duration),

    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
}

impl From<bincode::Error> for VirtDbError {
    fn from(e: bincode::Error) -> Self {
        VirtDbError::Serialization(e.to_string())
    }
}
