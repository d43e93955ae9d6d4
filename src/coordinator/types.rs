//! Run state and report types.
//!
//! Defines the single-flight state machine shared by capture and replicate.
//!
//! # State Transitions
//!
//! ```text
//!            capture() / replicate()
//! Idle ─────────────────────────────────→ Running(op)
//!  ↑                                         │
//!  │   (completed, failed or dropped)        │
//!  └─────────────────────────────────────────┘
//!
//! Running(op) ── capture() / replicate() ──→ AlreadyRunning (no transition)
//! ```
//!
//! # State Descriptions
//!
//! - **Idle**: No run in progress. The next capture or replicate may start.
//! - **Running(Capture)**: The catalog is being replaced from source emoji.
//! - **Running(Replicate)**: The catalog is being pushed to targets.

use crate::platform::TargetId;
use serde::Serialize;
use std::time::Duration;

/// Which operation holds the run guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncOperation {
    Capture,
    Replicate,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Capture => "capture",
            SyncOperation::Replicate => "replicate",
        }
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the run guard.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SyncState {
    /// No run in progress.
    #[default]
    Idle,

    /// A run is in progress. Further capture or replicate calls are rejected.
    Running(SyncOperation),
}

impl SyncState {
    pub fn is_running(&self) -> bool {
        matches!(self, SyncState::Running(_))
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "Idle"),
            SyncState::Running(op) => write!(f, "Running({})", op),
        }
    }
}

/// Step of the per-target pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncPhase {
    /// Listing the emoji currently on the target.
    List,
    /// Deleting the target's existing emoji.
    Delete,
    /// Creating the catalog's emoji on the target.
    Create,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::List => "list",
            SyncPhase::Delete => "delete",
            SyncPhase::Create => "create",
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one target fared in a replicate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TargetOutcome {
    Success,
    Failure(String),
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TargetOutcome::Success)
    }
}

/// A target that failed, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFailure {
    pub target_id: TargetId,
    pub reason: String,
}

/// Result of a replicate run.
///
/// Every requested target appears exactly once, in either `succeeded` or
/// `failed`. Both lists are ordered by target id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub succeeded: Vec<TargetId>,
    pub failed: Vec<TargetFailure>,
    /// Number of catalog emoji pushed to each target.
    pub emoji_count: usize,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl RunReport {
    /// Build a report from per-target outcomes.
    pub fn from_outcomes(
        outcomes: impl IntoIterator<Item = (TargetId, TargetOutcome)>,
        emoji_count: usize,
        duration: Duration,
    ) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (target_id, outcome) in outcomes {
            match outcome {
                TargetOutcome::Success => succeeded.push(target_id),
                TargetOutcome::Failure(reason) => failed.push(TargetFailure { target_id, reason }),
            }
        }
        succeeded.sort();
        failed.sort_by(|a, b| a.target_id.cmp(&b.target_id));

        Self {
            succeeded,
            failed,
            emoji_count,
            duration,
        }
    }

    pub fn total_targets(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    /// Outcome for one target, if it was part of the run.
    pub fn outcome(&self, target_id: &str) -> Option<TargetOutcome> {
        if self.succeeded.iter().any(|id| id == target_id) {
            return Some(TargetOutcome::Success);
        }
        self.failed
            .iter()
            .find(|f| f.target_id == target_id)
            .map(|f| TargetOutcome::Failure(f.reason.clone()))
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

/// Diagnostics snapshot from a [`SyncStatusReporter`](super::SyncStatusReporter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Runs (capture or replicate) that acquired the guard and finished.
    pub runs_completed: u64,
    /// Calls rejected with `AlreadyRunning`.
    pub runs_rejected: u64,
}
