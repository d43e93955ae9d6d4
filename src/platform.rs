// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Target platform integration traits.
//!
//! Defines what the replication engine needs from the chat platform: the set
//! of targets (guilds) the bot belongs to and the emoji on each of them.
//! The session/transport layer provides an implementation.
//!
//! # Example
//!
//! ```rust,no_run
//! use emoji_replicator::platform::{BoxFuture, RemoteEmoji, Target, TargetPlatform};
//! use bytes::Bytes;
//!
//! struct MyPlatform;
//!
//! impl TargetPlatform for MyPlatform {
//!     fn list_targets(&self) -> BoxFuture<'_, Vec<Target>> {
//!         Box::pin(async { Ok(vec![Target::new("1", "main")]) })
//!     }
//!     fn list_remote_emoji(&self, _target: &Target) -> BoxFuture<'_, Vec<RemoteEmoji>> {
//!         Box::pin(async { Ok(vec![]) })
//!     }
//!     fn delete_remote_emoji(&self, _target: &Target, _emoji_id: &str) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//!     fn create_remote_emoji(&self, _target: &Target, _name: &str, _image: Bytes) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Opaque target identifier (a guild id).
pub type TargetId = String;

/// Result type for platform operations.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Boxed future returned by [`TargetPlatform`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = PlatformResult<T>> + Send + 'a>>;

/// Simplified error for platform operations.
#[derive(Debug, Clone)]
pub struct PlatformError(pub String);

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PlatformError {}

/// A replication destination.
///
/// Owned by the platform; the engine only references it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
}

impl Target {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// An emoji currently present on a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEmoji {
    /// Platform id, used for deletion.
    pub id: String,
    pub name: String,
    /// Where the platform serves the image.
    pub url: String,
}

/// Trait defining what we need from the chat platform.
///
/// Every call may suspend on the network. The engine bounds each call with
/// its configured timeout, so implementations need not add their own.
pub trait TargetPlatform: Send + Sync + 'static {
    /// All targets the bot can replicate onto.
    fn list_targets(&self) -> BoxFuture<'_, Vec<Target>>;

    /// Emoji currently present on `target`.
    fn list_remote_emoji(&self, target: &Target) -> BoxFuture<'_, Vec<RemoteEmoji>>;

    /// Delete one emoji from `target`.
    fn delete_remote_emoji(&self, target: &Target, emoji_id: &str) -> BoxFuture<'_, ()>;

    /// Create an emoji named `name` on `target` from raw image bytes.
    fn create_remote_emoji(&self, target: &Target, name: &str, image: Bytes) -> BoxFuture<'_, ()>;
}

/// A no-op platform for standalone mode.
///
/// Has no targets and no emoji; mutations are logged and succeed.
#[derive(Clone, Debug, Default)]
pub struct NoOpPlatform;

impl TargetPlatform for NoOpPlatform {
    fn list_targets(&self) -> BoxFuture<'_, Vec<Target>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn list_remote_emoji(&self, target: &Target) -> BoxFuture<'_, Vec<RemoteEmoji>> {
        let target_id = target.id.clone();
        Box::pin(async move {
            tracing::trace!(target_id = %target_id, "NoOp: list emoji (returning empty)");
            Ok(Vec::new())
        })
    }

    fn delete_remote_emoji(&self, target: &Target, emoji_id: &str) -> BoxFuture<'_, ()> {
        let target_id = target.id.clone();
        let emoji_id = emoji_id.to_string();
        Box::pin(async move {
            tracing::debug!(target_id = %target_id, emoji_id = %emoji_id, "NoOp: would delete emoji");
            Ok(())
        })
    }

    fn create_remote_emoji(&self, target: &Target, name: &str, image: Bytes) -> BoxFuture<'_, ()> {
        let target_id = target.id.clone();
        let name = name.to_string();
        Box::pin(async move {
            tracing::debug!(
                target_id = %target_id,
                name = %name,
                len = image.len(),
                "NoOp: would create emoji"
            );
            Ok(())
        })
    }
}
