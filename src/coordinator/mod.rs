// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! The orchestrator that ties together:
//! - The captured catalog via [`crate::catalog::EmojiCatalog`]
//! - Target discovery and emoji calls via [`crate::platform::TargetPlatform`]
//! - Per-target pipelines (list, delete, create)
//! - The single-flight run flag and its [`SyncStatusReporter`]
//!
//! # Architecture
//!
//! A replicate run:
//! 1. Takes the run flag (or fails fast with `AlreadyRunning`)
//! 2. Loads the catalog images once
//! 3. Spawns one pipeline task per distinct target into a `JoinSet`
//! 4. Joins every task, then aggregates outcomes into a [`RunReport`]
//!
//! Capture runs under the same flag, so capture and replicate never overlap.
//! Dropping a run's future aborts its remaining target tasks and releases
//! the flag.

mod pipeline;
mod status;
mod types;

pub use status::SyncStatusReporter;
pub use types::{
    RunReport, SyncOperation, SyncPhase, SyncState, SyncStatus, TargetFailure, TargetOutcome,
};

use crate::catalog::{EmojiCatalog, SourceEmoji};
use crate::config::SyncConfig;
use crate::error::{ReplicatorError, Result};
use crate::fetcher::ResourceFetcher;
use crate::metrics;
use crate::platform::{NoOpPlatform, Target, TargetId, TargetPlatform};
use crate::resilience::with_timeout;
use pipeline::PipelineSettings;
use status::RunFlag;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Reason recorded for a target whose pipeline never reported back.
const LOST_PIPELINE_REASON: &str = "target pipeline panicked or was aborted";

/// The replication engine.
///
/// Pushes the captured emoji catalog to every target the platform exposes.
///
/// # Platform Integration
///
/// The engine is handed the platform by the bot's session layer. We use it to:
/// - Enumerate targets (`list_targets`)
/// - Read, delete and create emoji on each target
///
/// We **never** mutate the catalog from a target's state except through an
/// explicit capture.
pub struct ReplicationEngine<P: TargetPlatform = NoOpPlatform, F: ResourceFetcher = crate::fetcher::HttpFetcher> {
    /// Timeouts, pacing and fan-out limits
    config: SyncConfig,

    /// Target platform (passed from the session layer)
    platform: Arc<P>,

    /// The catalog pushed to every target
    catalog: Arc<EmojiCatalog<F>>,

    /// Single-flight flag shared with status reporters
    flag: Arc<RunFlag>,
}

impl<P: TargetPlatform, F: ResourceFetcher> ReplicationEngine<P, F> {
    /// Create an idle engine.
    pub fn new(config: SyncConfig, platform: Arc<P>, catalog: Arc<EmojiCatalog<F>>) -> Self {
        Self {
            config,
            platform,
            catalog,
            flag: Arc::new(RunFlag::new()),
        }
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn catalog(&self) -> &Arc<EmojiCatalog<F>> {
        &self.catalog
    }

    /// A read-only view of the run state.
    pub fn status_reporter(&self) -> SyncStatusReporter {
        SyncStatusReporter::new(Arc::clone(&self.flag))
    }

    /// Get current run state.
    pub fn state(&self) -> SyncState {
        self.status_reporter().state()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.status_reporter().subscribe()
    }

    /// Check if a capture or replicate is in progress.
    pub fn is_running(&self) -> bool {
        self.status_reporter().is_running()
    }

    /// Push the catalog to `targets`.
    ///
    /// Returns `AlreadyRunning` immediately if another run holds the flag.
    /// Per-target failures are reported in the [`RunReport`], not as errors.
    pub async fn replicate(&self, targets: Vec<Target>) -> Result<RunReport> {
        let _guard = self.flag.acquire(SyncOperation::Replicate)?;
        self.run_replication(targets).await
    }

    /// Push the catalog to every target the platform lists, except `exclude`
    /// (usually the source guild).
    pub async fn replicate_all(&self, exclude: Option<&str>) -> Result<RunReport> {
        let _guard = self.flag.acquire(SyncOperation::Replicate)?;

        let targets = match with_timeout(
            self.config.remote_call_timeout_duration(),
            self.platform.list_targets(),
        )
        .await
        {
            Ok(Ok(targets)) => targets,
            Ok(Err(e)) => {
                error!(error = %e, "Failed to list targets");
                return Err(ReplicatorError::Platform(e.to_string()));
            }
            Err(e) => {
                error!(error = %e, "Listing targets timed out");
                return Err(ReplicatorError::Platform(e.to_string()));
            }
        };

        let targets: Vec<Target> = targets
            .into_iter()
            .filter(|t| Some(t.id.as_str()) != exclude)
            .collect();
        self.run_replication(targets).await
    }

    /// Replace the catalog from `sources`. Returns the new emoji count.
    pub async fn capture(&self, sources: Vec<SourceEmoji>) -> Result<usize> {
        let _guard = self.flag.acquire(SyncOperation::Capture)?;
        self.catalog.capture(sources).await
    }

    /// Replace the catalog with the emoji currently on `source`.
    pub async fn capture_from_target(&self, source: &Target) -> Result<usize> {
        let _guard = self.flag.acquire(SyncOperation::Capture)?;

        let remote = match with_timeout(
            self.config.remote_call_timeout_duration(),
            self.platform.list_remote_emoji(source),
        )
        .await
        {
            Ok(Ok(remote)) => remote,
            Ok(Err(e)) => return Err(list_failed(source, e.to_string())),
            Err(e) => return Err(list_failed(source, e.to_string())),
        };

        info!(
            target_id = %source.id,
            target_name = %source.name,
            emoji = remote.len(),
            "Capturing catalog from target"
        );
        let sources = remote
            .into_iter()
            .map(|emoji| SourceEmoji::new(emoji.name, emoji.url))
            .collect();
        self.catalog.capture(sources).await
    }

    /// Fan out one pipeline per target and fan the outcomes back in.
    /// The caller holds the run flag.
    async fn run_replication(&self, targets: Vec<Target>) -> Result<RunReport> {
        let started = Instant::now();

        let mut unique: BTreeMap<TargetId, Target> = BTreeMap::new();
        for target in targets {
            if unique.contains_key(&target.id) {
                debug!(target_id = %target.id, "Duplicate target ignored");
                continue;
            }
            unique.insert(target.id.clone(), target);
        }

        let images = Arc::new(self.catalog.load_images().await?);
        let emoji_count = images.len();

        info!(
            targets = unique.len(),
            emoji = emoji_count,
            "Starting replication run"
        );

        let settings = PipelineSettings {
            call_timeout: self.config.remote_call_timeout_duration(),
            rate_limit: self.config.rate_limit_config(),
        };

        // Targets that never report back keep this outcome.
        let mut outcomes: BTreeMap<TargetId, TargetOutcome> = unique
            .keys()
            .map(|id| (id.clone(), TargetOutcome::Failure(LOST_PIPELINE_REASON.to_string())))
            .collect();

        // Dropping the set aborts every task still running.
        let mut tasks = JoinSet::new();
        for (target_id, target) in unique {
            let platform = Arc::clone(&self.platform);
            let images = Arc::clone(&images);
            let settings = settings.clone();
            tasks.spawn(async move {
                let outcome = pipeline::replicate_target(platform, target, images, settings).await;
                (target_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((target_id, outcome)) => {
                    outcomes.insert(target_id, outcome);
                }
                Err(e) => {
                    warn!(error = %e, panicked = e.is_panic(), "Target pipeline did not complete");
                }
            }
        }

        let report = RunReport::from_outcomes(outcomes, emoji_count, started.elapsed());
        metrics::record_replication_run(report.succeeded.len(), report.failed.len(), report.duration);

        for failure in &report.failed {
            warn!(target_id = %failure.target_id, reason = %failure.reason, "Target failed");
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Replication run finished"
        );

        Ok(report)
    }
}

fn list_failed(target: &Target, message: String) -> ReplicatorError {
    ReplicatorError::RemoteOperation {
        target_id: target.id.clone(),
        phase: SyncPhase::List,
        message,
    }
}
