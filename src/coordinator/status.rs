// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-flight run flag and its read-only view.
//!
//! The flag is an `AtomicBool` flipped with compare-and-swap, so a second
//! capture or replicate is rejected without waiting. A [`RunGuard`] owns the
//! flag for the duration of a run and clears it on drop, which covers normal
//! completion, early error returns and the caller dropping the future.

use super::types::{SyncOperation, SyncState, SyncStatus};
use crate::error::{ReplicatorError, Result};
use crate::metrics;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// State shared between the engine and its status reporters.
#[derive(Debug)]
pub(super) struct RunFlag {
    running: AtomicBool,
    state_tx: watch::Sender<SyncState>,
    runs_completed: AtomicU64,
    runs_rejected: AtomicU64,
}

impl RunFlag {
    pub(super) fn new() -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            running: AtomicBool::new(false),
            state_tx,
            runs_completed: AtomicU64::new(0),
            runs_rejected: AtomicU64::new(0),
        }
    }

    /// Take the flag for `operation`, or fail with `AlreadyRunning`.
    pub(super) fn acquire(&self, operation: SyncOperation) -> Result<RunGuard<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.runs_rejected.fetch_add(1, Ordering::Relaxed);
            metrics::record_run_rejected(operation.as_str());
            let current = self.state();
            warn!(
                operation = %operation,
                current = %current,
                "Run rejected, another run is in progress"
            );
            return Err(ReplicatorError::AlreadyRunning);
        }

        let state = SyncState::Running(operation);
        self.state_tx.send_replace(state);
        metrics::set_sync_state(&state.to_string());
        metrics::record_run_started(operation.as_str());
        debug!(operation = %operation, "Run guard acquired");

        Ok(RunGuard { flag: self })
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn state(&self) -> SyncState {
        *self.state_tx.borrow()
    }
}

/// Holds the run flag; releasing it returns the engine to `Idle`.
#[must_use = "the run flag is released as soon as the guard drops"]
pub(super) struct RunGuard<'a> {
    flag: &'a RunFlag,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.runs_completed.fetch_add(1, Ordering::Relaxed);
        // Idle must be published before the flag clears.
        self.flag.state_tx.send_replace(SyncState::Idle);
        metrics::set_sync_state(&SyncState::Idle.to_string());
        self.flag.running.store(false, Ordering::Release);
        debug!("Run guard released");
    }
}

/// Read-only view of the engine's run state.
///
/// Cheap to clone; hand it to whatever answers "is a sync running?".
#[derive(Debug, Clone)]
pub struct SyncStatusReporter {
    flag: Arc<RunFlag>,
}

impl SyncStatusReporter {
    pub(super) fn new(flag: Arc<RunFlag>) -> Self {
        Self { flag }
    }

    /// Whether a capture or replicate currently holds the run guard.
    pub fn is_running(&self) -> bool {
        self.flag.is_running()
    }

    pub fn state(&self) -> SyncState {
        self.flag.state()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.flag.state_tx.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.flag.state(),
            runs_completed: self.flag.runs_completed.load(Ordering::Relaxed),
            runs_rejected: self.flag.runs_rejected.load(Ordering::Relaxed),
        }
    }
}
