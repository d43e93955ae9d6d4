//! # Emoji Replicator
//!
//! A persisted key → URI store with content materialization, and an engine
//! that replicates a captured emoji catalog onto many chat guilds.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                            emoji-replicator                               │
//! │                                                                           │
//! │  ┌───────────────────┐   ┌─────────────┐   ┌───────────────────────────┐  │
//! │  │ MaterializedStore │──►│ Fetcher     │◄──│ EmojiCatalog (capture)    │  │
//! │  │ (url.json + img/) │   │ (probe/GET) │   │ (emoji.json + emoji/)     │  │
//! │  └───────────────────┘   └─────────────┘   └───────────────────────────┘  │
//! │                                                         │                 │
//! │                                                         ▼                 │
//! │  ┌───────────────────┐   ┌─────────────────────────────────────────────┐  │
//! │  │ SyncStatusReporter│◄──│ ReplicationEngine (single-flight)           │  │
//! │  │ (read-only)       │   │  per target: list → delete all → create all │  │
//! │  └───────────────────┘   └─────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Stores, One Engine
//!
//! 1. **MaterializedStore**: user-managed shortcuts. Image URIs are downloaded
//!    and rewritten to a locally hosted copy.
//! 2. **EmojiCatalog**: the emoji set captured from a source guild, pushed to
//!    every other guild by the [`ReplicationEngine`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use emoji_replicator::{
//!     EmojiCatalog, HttpFetcher, MaterializedStore, NoOpPlatform, ReplicationEngine,
//!     ReplicatorConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> emoji_replicator::Result<()> {
//!     let config = ReplicatorConfig::from_json_file("conf/conf.json")?;
//!     let fetcher = Arc::new(HttpFetcher::new(&config.fetcher)?);
//!
//!     let store = MaterializedStore::from_config(&config, Arc::clone(&fetcher)).await?;
//!     store.save("hola", "https://example.com/hola.gif").await?;
//!
//!     let catalog = Arc::new(EmojiCatalog::from_config(&config, fetcher).await?);
//!     let engine = ReplicationEngine::new(config.sync.clone(), Arc::new(NoOpPlatform), catalog);
//!     let report = engine.replicate_all(Some("source-guild")).await?;
//!     println!("{} targets ok, {} failed", report.succeeded.len(), report.failed.len());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod media;
pub mod metrics;
pub mod platform;
pub mod resilience;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use catalog::{EmojiCatalog, EmojiRecord, SourceEmoji};
pub use config::{FetcherConfig, ReplicatorConfig, StorageConfig, SyncConfig};
pub use coordinator::{
    ReplicationEngine, RunReport, SyncOperation, SyncPhase, SyncState, SyncStatus,
    SyncStatusReporter, TargetFailure, TargetOutcome,
};
pub use error::{ReplicatorError, Result};
pub use fetcher::{FetchError, HttpFetcher, ResourceFetcher};
pub use platform::{NoOpPlatform, PlatformError, RemoteEmoji, Target, TargetId, TargetPlatform};
pub use store::{MappingEntry, MaterializedStore};
