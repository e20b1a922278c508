//! Error types for the tiered caching proxy

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the proxy and its cache tiers
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Origin Errors
    // =========================================================================
    /// The origin could not be reached or did not answer in time
    #[error("Origin {origin} unavailable: {reason}")]
    OriginUnavailable { origin: String, reason: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// An L2 storage object is missing or unreadable
    #[error("Failed to read storage object {}: {source}", path.display())]
    StorageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisting an L2 storage object failed
    #[error("Failed to write storage object {}: {source}", path.display())]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The L2 entry was promoted or invalidated while the caller waited on it
    #[error("Cache entry for {key} has left its tier")]
    EntryRetired { key: String },

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
