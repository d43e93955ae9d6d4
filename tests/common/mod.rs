//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Mock TargetPlatform with per-target state and failure injection
//! - Mock ResourceFetcher with canned images and concurrency tracking
//! - Engine/store builders rooted at a temp dir

#![allow(dead_code)]

pub mod mock_fetcher;
pub mod mock_platform;

pub use mock_fetcher::*;
pub use mock_platform::*;

use emoji_replicator::{EmojiCatalog, MaterializedStore, ReplicationEngine, ReplicatorConfig};
use std::path::Path;
use std::sync::Arc;

/// Config rooted at `root` with the given remote call timeout.
pub fn config_with_timeout(root: &Path, remote_call_timeout: &str) -> ReplicatorConfig {
    let mut config = ReplicatorConfig::for_testing(root);
    config.sync.remote_call_timeout = remote_call_timeout.to_string();
    config
}

pub async fn open_store(root: &Path, fetcher: Arc<MockFetcher>) -> MaterializedStore<MockFetcher> {
    let config = ReplicatorConfig::for_testing(root);
    MaterializedStore::from_config(&config, fetcher)
        .await
        .expect("store should open")
}

pub async fn build_engine(
    config: &ReplicatorConfig,
    platform: Arc<MockPlatform>,
    fetcher: Arc<MockFetcher>,
) -> ReplicationEngine<MockPlatform, MockFetcher> {
    let catalog = EmojiCatalog::from_config(config, fetcher)
        .await
        .expect("catalog should open");
    ReplicationEngine::new(config.sync.clone(), platform, Arc::new(catalog))
}

/// Wait until `condition` holds, yielding to the runtime in between.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}
