//! Per-target replication pipeline.
//!
//! Each target gets its own task running, strictly in order:
//! 1. List the emoji currently on the target
//! 2. Delete every one of them
//! 3. Create one emoji per catalog record
//!
//! The first failing call ends the pipeline for that target only. Calls are
//! never retried; the failure is reported in the run's
//! [`RunReport`](super::RunReport).
//!
//! # Timeouts and Pacing
//!
//! Every remote call is bounded by `remote_call_timeout`. A timeout is
//! reported like any other failed call. When pacing is configured, each
//! target gets its own token bucket and every call consumes one token.

use super::types::{SyncPhase, TargetOutcome};
use crate::error::ReplicatorError;
use crate::metrics;
use crate::platform::{PlatformResult, Target, TargetPlatform};
use crate::resilience::{with_timeout, RateLimitConfig, RateLimiter};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Settings shared by every target's pipeline in one run.
#[derive(Debug, Clone)]
pub(super) struct PipelineSettings {
    pub call_timeout: Duration,
    pub rate_limit: Option<RateLimitConfig>,
}

/// Bounds and paces the remote calls of one pipeline.
struct RemoteCalls<'a> {
    target: &'a Target,
    call_timeout: Duration,
    limiter: Option<RateLimiter>,
}

impl RemoteCalls<'_> {
    async fn run<T>(
        &self,
        phase: SyncPhase,
        call: impl Future<Output = PlatformResult<T>>,
    ) -> Result<T, ReplicatorError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let message = match with_timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };

        Err(ReplicatorError::RemoteOperation {
            target_id: self.target.id.clone(),
            phase,
            message,
        })
    }
}

/// Replace every emoji on `target` with the catalog `images`.
pub(super) async fn replicate_target<P: TargetPlatform>(
    platform: Arc<P>,
    target: Target,
    images: Arc<Vec<(String, Bytes)>>,
    settings: PipelineSettings,
) -> TargetOutcome {
    let span = tracing::info_span!("replicate_target", target_id = %target.id);

    async move {
        match run_pipeline(platform.as_ref(), &target, &images, &settings).await {
            Ok(()) => {
                info!(target_name = %target.name, emoji = images.len(), "Target replicated");
                TargetOutcome::Success
            }
            Err(e) => {
                if let ReplicatorError::RemoteOperation { phase, .. } = &e {
                    metrics::record_target_failure(&target.id, phase.as_str());
                }
                warn!(target_name = %target.name, error = %e, "Target replication failed");
                TargetOutcome::Failure(e.to_string())
            }
        }
    }
    .instrument(span)
    .await
}

async fn run_pipeline<P: TargetPlatform>(
    platform: &P,
    target: &Target,
    images: &[(String, Bytes)],
    settings: &PipelineSettings,
) -> Result<(), ReplicatorError> {
    let calls = RemoteCalls {
        target,
        call_timeout: settings.call_timeout,
        limiter: settings.rate_limit.clone().map(RateLimiter::new),
    };

    let existing = calls
        .run(SyncPhase::List, platform.list_remote_emoji(target))
        .await?;
    debug!(existing = existing.len(), "Listed remote emoji");

    for emoji in &existing {
        calls
            .run(SyncPhase::Delete, platform.delete_remote_emoji(target, &emoji.id))
            .await?;
        debug!(emoji_id = %emoji.id, name = %emoji.name, "Deleted remote emoji");
    }

    for (name, image) in images {
        calls
            .run(
                SyncPhase::Create,
                platform.create_remote_emoji(target, name, image.clone()),
            )
            .await?;
        debug!(name = %name, "Created remote emoji");
    }

    Ok(())
}
