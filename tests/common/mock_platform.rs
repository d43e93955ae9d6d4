//! Mock TargetPlatform for testing.
//!
//! Keeps an in-memory emoji set per target and records every call in the
//! order it actually ran. Failures, hangs, panics and a start gate can be
//! injected per target and phase.

use bytes::Bytes;
use emoji_replicator::platform::{BoxFuture, PlatformError, RemoteEmoji, Target, TargetPlatform};
use emoji_replicator::SyncPhase;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// A recorded platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    ListTargets,
    List { target: String },
    Delete { target: String, emoji_id: String },
    Create { target: String, name: String, len: usize },
}

impl PlatformCall {
    pub fn target(&self) -> Option<&str> {
        match self {
            PlatformCall::ListTargets => None,
            PlatformCall::List { target }
            | PlatformCall::Delete { target, .. }
            | PlatformCall::Create { target, .. } => Some(target),
        }
    }
}

#[derive(Default)]
struct Faults {
    failures: HashMap<(String, SyncPhase), String>,
    hangs: HashSet<(String, SyncPhase)>,
    panics: HashSet<String>,
    delays: HashMap<String, Duration>,
    list_targets_error: Option<String>,
}

/// Mock implementation of TargetPlatform that records all calls.
///
/// # Example
/// ```rust,ignore
/// let platform = MockPlatform::new()
///     .with_target("g1", &["old_a", "old_b"])
///     .with_target("g2", &[]);
/// platform.fail("g2", SyncPhase::Delete, "missing permissions");
///
/// // Use in tests...
///
/// assert_eq!(platform.emoji_names("g1"), vec!["wave"]);
/// ```
#[derive(Default)]
pub struct MockPlatform {
    targets: Mutex<Vec<Target>>,
    emoji: Mutex<HashMap<String, Vec<RemoteEmoji>>>,
    calls: Mutex<Vec<PlatformCall>>,
    faults: Mutex<Faults>,
    /// When set, every `list_remote_emoji` waits for one permit.
    gate: Mutex<Option<Arc<Semaphore>>>,
    next_id: AtomicU64,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    /// Add a target holding emoji with the given names.
    pub fn with_target(self, id: &str, existing: &[&str]) -> Self {
        self.targets
            .lock()
            .unwrap()
            .push(Target::new(id, format!("guild {}", id)));
        let emoji = existing
            .iter()
            .map(|name| self.remote(id, name))
            .collect();
        self.emoji.lock().unwrap().insert(id.to_string(), emoji);
        self
    }

    /// Make `phase` on `target` fail with `message`.
    pub fn fail(&self, target: &str, phase: SyncPhase, message: &str) {
        self.faults
            .lock()
            .unwrap()
            .failures
            .insert((target.to_string(), phase), message.to_string());
    }

    /// Make `phase` on `target` never complete.
    pub fn hang(&self, target: &str, phase: SyncPhase) {
        self.faults
            .lock()
            .unwrap()
            .hangs
            .insert((target.to_string(), phase));
    }

    /// Make every call against `target` panic.
    pub fn panic_on(&self, target: &str) {
        self.faults.lock().unwrap().panics.insert(target.to_string());
    }

    /// Delay every call against `target`.
    pub fn delay(&self, target: &str, delay: Duration) {
        self.faults
            .lock()
            .unwrap()
            .delays
            .insert(target.to_string(), delay);
    }

    pub fn fail_list_targets(&self, message: &str) {
        self.faults.lock().unwrap().list_targets_error = Some(message.to_string());
    }

    /// Hold every list call until [`MockPlatform::open_gate`] releases it.
    pub fn close_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn open_gate(&self, permits: usize) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(permits);
        }
    }

    // =========================================================================
    // Assertions
    // =========================================================================

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, target: &str) -> Vec<PlatformCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.target() == Some(target))
            .collect()
    }

    /// Names currently on `target`, sorted.
    pub fn emoji_names(&self, target: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .emoji
            .lock()
            .unwrap()
            .get(target)
            .map(|list| list.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn remote_emoji(&self, target: &str) -> Vec<RemoteEmoji> {
        self.emoji
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or_default()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn remote(&self, target: &str, name: &str) -> RemoteEmoji {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        RemoteEmoji {
            id: id.to_string(),
            name: name.to_string(),
            url: format!("https://cdn.test/{}/{}.png", target, id),
        }
    }

    /// Apply injected faults for one call, after recording it.
    async fn enter(&self, target: &str, phase: SyncPhase, call: PlatformCall) -> Result<(), PlatformError> {
        self.calls.lock().unwrap().push(call);

        let (panics, hangs, failure, delay) = {
            let faults = self.faults.lock().unwrap();
            let key = (target.to_string(), phase);
            (
                faults.panics.contains(target),
                faults.hangs.contains(&key),
                faults.failures.get(&key).cloned(),
                faults.delays.get(target).copied(),
            )
        };

        if panics {
            panic!("injected panic on target {}", target);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if hangs {
            std::future::pending::<()>().await;
        }
        match failure {
            Some(message) => Err(PlatformError(message)),
            None => Ok(()),
        }
    }
}

impl TargetPlatform for MockPlatform {
    fn list_targets(&self) -> BoxFuture<'_, Vec<Target>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(PlatformCall::ListTargets);
            let error = self.faults.lock().unwrap().list_targets_error.clone();
            if let Some(message) = error {
                return Err(PlatformError(message));
            }
            Ok(self.targets.lock().unwrap().clone())
        })
    }

    fn list_remote_emoji(&self, target: &Target) -> BoxFuture<'_, Vec<RemoteEmoji>> {
        let target_id = target.id.clone();
        Box::pin(async move {
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            self.enter(
                &target_id,
                SyncPhase::List,
                PlatformCall::List {
                    target: target_id.clone(),
                },
            )
            .await?;
            Ok(self.remote_emoji(&target_id))
        })
    }

    fn delete_remote_emoji(&self, target: &Target, emoji_id: &str) -> BoxFuture<'_, ()> {
        let target_id = target.id.clone();
        let emoji_id = emoji_id.to_string();
        Box::pin(async move {
            self.enter(
                &target_id,
                SyncPhase::Delete,
                PlatformCall::Delete {
                    target: target_id.clone(),
                    emoji_id: emoji_id.clone(),
                },
            )
            .await?;
            if let Some(list) = self.emoji.lock().unwrap().get_mut(&target_id) {
                list.retain(|e| e.id != emoji_id);
            }
            Ok(())
        })
    }

    fn create_remote_emoji(&self, target: &Target, name: &str, image: Bytes) -> BoxFuture<'_, ()> {
        let target_id = target.id.clone();
        let name = name.to_string();
        Box::pin(async move {
            self.enter(
                &target_id,
                SyncPhase::Create,
                PlatformCall::Create {
                    target: target_id.clone(),
                    name: name.clone(),
                    len: image.len(),
                },
            )
            .await?;
            let emoji = self.remote(&target_id, &name);
            self.emoji
                .lock()
                .unwrap()
                .entry(target_id)
                .or_default()
                .push(emoji);
            Ok(())
        })
    }
}
