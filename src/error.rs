// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the materialized store and the emoji replicator.
//!
//! Errors fall into two groups. Caller errors are rejections of the request
//! itself (duplicate key, unknown key, run already in progress, bad input)
//! and leave all state untouched. Operational errors come from the network,
//! the target platform or local storage.
//!
//! # Error Categories
//!
//! | Error Type | Caller error | Description |
//! |------------|--------------|-------------|
//! | `AlreadyExists` | Yes | `save` on a key that is already mapped |
//! | `NotFound` | Yes | `update` on a key that is not mapped |
//! | `AlreadyRunning` | Yes | A capture or replicate run is in progress |
//! | `InvalidKey` | Yes | Key is empty after normalization |
//! | `InvalidUri` | Yes | Value is not an absolute http(s) URI |
//! | `Download` | No | Materialization download failed or timed out |
//! | `RemoteOperation` | No | A target platform call failed |
//! | `Platform` | No | Target discovery failed |
//! | `Persist` | No | Local file I/O failed |
//! | `Serialization` | No | Snapshot could not be encoded or decoded |
//! | `Config` | No | Configuration invalid |
//!
//! Per-target failures during replication are not surfaced through this type
//! as call failures; they are collected into a
//! [`RunReport`](crate::coordinator::RunReport).

use std::path::PathBuf;
use thiserror::Error;

use crate::coordinator::SyncPhase;

/// Result type alias for replicator operations.
pub type Result<T> = std::result::Result<T, ReplicatorError>;

/// Errors that can occur in the store, the catalog or the replication engine.
#[derive(Error, Debug)]
pub enum ReplicatorError {
    /// `save` was called with a key that already has a mapping.
    #[error("Key already exists: {key}")]
    AlreadyExists { key: String },

    /// `update` was called with a key that has no mapping.
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// A run holding the single-flight guard is already in progress.
    ///
    /// Returned immediately; the in-flight run is not affected.
    #[error("A sync run is already in progress")]
    AlreadyRunning,

    /// The key is unusable after normalization (e.g. blank).
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    /// The value is not an absolute web URI.
    #[error("Invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// Downloading a remote resource failed or timed out.
    ///
    /// Any mutation that triggered the download has been rolled back.
    #[error("Download failed ({uri}): {message}")]
    Download { uri: String, message: String },

    /// A call against one target failed.
    ///
    /// Inside `replicate` this is captured per target and reported, never
    /// returned as the call result.
    #[error("Remote operation failed on target {target_id} during {phase}: {message}")]
    RemoteOperation {
        target_id: String,
        phase: SyncPhase,
        message: String,
    },

    /// The target platform could not enumerate targets.
    #[error("Platform error: {0}")]
    Platform(String),

    /// Reading or writing durable state failed.
    #[error("Persist error ({}): {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file could not be encoded or decoded.
    #[error("Serialization error ({}): {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReplicatorError {
    /// Create a persist error for the given path.
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }

    /// Create a download error.
    pub fn download(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// Check if this error is a rejection of the request itself.
    ///
    /// Caller errors leave in-memory and durable state untouched and should be
    /// reported back to the user rather than logged as failures.
    pub fn is_caller_error(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::NotFound { .. } => true,
            Self::AlreadyRunning => true,
            Self::InvalidKey(_) => true,
            Self::InvalidUri { .. } => true,
            Self::Download { .. } => false,
            Self::RemoteOperation { .. } => false,
            Self::Platform(_) => false,
            Self::Persist { .. } => false,
            Self::Serialization { .. } => false,
            Self::Config(_) => false,
        }
    }
}
