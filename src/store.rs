// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable key → URI mapping with content materialization.
//!
//! Keys are trimmed and lowercased. Values are absolute web URIs. When a
//! value turns out to be an image, the store downloads it and rewrites the
//! value to a locally hosted copy under the configured public base.
//!
//! # Mutation Protocol
//!
//! ```text
//! lock writer → validate against current map → materialize (probe, download, stage)
//!     → persist next snapshot → commit staged file → publish next map → unlock
//! ```
//!
//! Every step before "publish" can fail without side effects visible to
//! readers: the staged file is discarded, the snapshot on disk is the old one
//! (atomic rename), and the in-memory map was never swapped. Writers are
//! serialized by a per-store mutex; readers only ever see committed maps.

use crate::config::ReplicatorConfig;
use crate::error::{ReplicatorError, Result};
use crate::fetcher::{normalize_extension, ResourceFetcher};
use crate::media::{file_stem, MediaDir, StagedMedia};
use crate::metrics;
use crate::resilience::with_timeout;
use crate::snapshot::SnapshotFile;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// One key → URI mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub key: String,
    pub value: String,
}

/// Normalize a user-supplied key: trim and lowercase.
pub fn normalize_key(raw: &str) -> Result<String> {
    let key = raw.trim().to_lowercase();
    if key.is_empty() {
        return Err(ReplicatorError::InvalidKey(raw.to_string()));
    }
    Ok(key)
}

/// Check that `value` is an absolute http(s) URI and return it trimmed.
pub fn validate_uri(value: &str) -> Result<String> {
    let value = value.trim();
    let url = Url::parse(value).map_err(|e| ReplicatorError::InvalidUri {
        uri: value.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(value.to_string()),
        "http" | "https" => Err(ReplicatorError::InvalidUri {
            uri: value.to_string(),
            reason: "missing host".to_string(),
        }),
        other => Err(ReplicatorError::InvalidUri {
            uri: value.to_string(),
            reason: format!("unsupported scheme {:?}", other),
        }),
    }
}

/// Bring keys loaded from disk into normalized form.
///
/// Snapshots written by older tooling may hold mixed-case or padded keys.
/// When several raw keys normalize to the same key, the one already in
/// normalized form wins, otherwise the first in sorted order. Blank keys are
/// dropped. Returns the normalized map and whether anything changed.
fn normalize_loaded(raw: BTreeMap<String, String>) -> (BTreeMap<String, String>, bool) {
    let mut entries = BTreeMap::new();
    let mut changed = false;
    let mut pending = Vec::new();

    for (raw_key, value) in raw {
        match normalize_key(&raw_key) {
            Ok(key) if key == raw_key => {
                entries.insert(key, value);
            }
            Ok(key) => pending.push((raw_key, key, value)),
            Err(_) => {
                warn!(key = ?raw_key, "Dropping blank key from mapping snapshot");
                changed = true;
            }
        }
    }

    for (raw_key, key, value) in pending {
        changed = true;
        if let Some(kept) = entries.get(&key) {
            warn!(
                key = %key,
                dropped = ?raw_key,
                dropped_value = %value,
                kept = %kept,
                "Duplicate key in mapping snapshot after normalization"
            );
            continue;
        }
        debug!(from = ?raw_key, to = %key, "Normalized key from mapping snapshot");
        entries.insert(key, value);
    }

    (entries, changed)
}

/// Result of materializing one value.
struct Materialized {
    value: String,
    staged: Option<StagedMedia>,
}

/// Persisted key → URI mapping.
pub struct MaterializedStore<F: ResourceFetcher> {
    snapshot: SnapshotFile,
    media: MediaDir,
    fetcher: Arc<F>,
    download_timeout: Duration,
    /// Committed mapping, always equal to the snapshot on disk.
    entries: RwLock<BTreeMap<String, String>>,
    /// Serializes read-modify-write-persist sequences.
    writer: Mutex<()>,
}

impl<F: ResourceFetcher> MaterializedStore<F> {
    /// Load the store, creating an empty snapshot if none exists.
    pub async fn open(
        snapshot: SnapshotFile,
        media: MediaDir,
        fetcher: Arc<F>,
        download_timeout: Duration,
    ) -> Result<Self> {
        let raw: BTreeMap<String, String> = snapshot.load_or_init().await?;
        let (entries, changed) = normalize_loaded(raw);
        if changed {
            snapshot.write(&entries).await?;
            info!(path = %snapshot.path().display(), "Rewrote mapping snapshot with normalized keys");
        }
        media.ensure_dir().await?;
        info!(
            path = %snapshot.path().display(),
            entries = entries.len(),
            "Mapping store loaded"
        );

        Ok(Self {
            snapshot,
            media,
            fetcher,
            download_timeout,
            entries: RwLock::new(entries),
            writer: Mutex::new(()),
        })
    }

    /// Open the URL store described by `config.storage`.
    pub async fn from_config(config: &ReplicatorConfig, fetcher: Arc<F>) -> Result<Self> {
        let base = config.public_base()?;
        let media = MediaDir::new(
            config.storage.url_media_path(),
            &base,
            &config.storage.url_media_dir,
        )?;
        Self::open(
            SnapshotFile::new(config.storage.url_map_path()),
            media,
            fetcher,
            config.sync.download_timeout_duration(),
        )
        .await
    }

    pub fn media(&self) -> &MediaDir {
        &self.media
    }

    /// Path of the mapping snapshot file.
    pub fn snapshot_path(&self) -> &Path {
        self.snapshot.path()
    }

    /// Look up a key. Invalid keys simply aren't found.
    pub async fn get(&self, key: &str) -> Option<String> {
        let key = normalize_key(key).ok()?;
        self.entries.read().await.get(&key).cloned()
    }

    /// All mappings, ordered by key.
    pub async fn list(&self) -> Vec<MappingEntry> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(key, value)| MappingEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Add a new mapping. Returns the stored value (materialized or original).
    pub async fn save(&self, key: &str, value: &str) -> Result<String> {
        let result = self.save_inner(key, value).await;
        metrics::record_store_mutation("save", result.is_ok());
        result
    }

    /// Replace an existing mapping. Returns the stored value.
    pub async fn update(&self, key: &str, value: &str) -> Result<String> {
        let result = self.update_inner(key, value).await;
        metrics::record_store_mutation("update", result.is_ok());
        result
    }

    /// Remove a mapping. Removing an absent or blank key succeeds without
    /// touching disk.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let result = self.delete_inner(key).await;
        metrics::record_store_mutation("delete", result.is_ok());
        result
    }

    async fn save_inner(&self, key: &str, value: &str) -> Result<String> {
        let key = normalize_key(key)?;
        let value = validate_uri(value)?;

        let _writer = self.writer.lock().await;
        let current = self.entries.read().await.clone();
        if current.contains_key(&key) {
            return Err(ReplicatorError::AlreadyExists { key });
        }

        let materialized = self.materialize(&key, &value).await?;
        let stored = materialized.value.clone();
        let mut next = current.clone();
        next.insert(key.clone(), stored.clone());
        self.commit(&current, next, materialized.staged).await?;

        info!(key = %key, value = %stored, "Saved mapping");
        Ok(stored)
    }

    async fn update_inner(&self, key: &str, value: &str) -> Result<String> {
        let key = normalize_key(key)?;
        let value = validate_uri(value)?;

        let _writer = self.writer.lock().await;
        let current = self.entries.read().await.clone();
        let Some(prior) = current.get(&key).cloned() else {
            return Err(ReplicatorError::NotFound { key });
        };

        let materialized = self.materialize(&key, &value).await?;
        let stored = materialized.value.clone();
        let mut next = current.clone();
        next.insert(key.clone(), stored.clone());
        self.commit(&current, next, materialized.staged).await?;

        if let Some(old_file) = self.owned_file(&key, &prior) {
            if self.owned_file(&key, &stored).as_deref() != Some(old_file.as_str()) {
                self.media.remove(&old_file).await;
            }
        }

        info!(key = %key, value = %stored, "Updated mapping");
        Ok(stored)
    }

    async fn delete_inner(&self, key: &str) -> Result<()> {
        let Ok(key) = normalize_key(key) else {
            debug!(key = ?key, "Delete of blank key, nothing to do");
            return Ok(());
        };

        let _writer = self.writer.lock().await;
        let current = self.entries.read().await.clone();
        let Some(prior) = current.get(&key).cloned() else {
            debug!(key = %key, "Delete of absent key, nothing to do");
            return Ok(());
        };

        let mut next = current.clone();
        next.remove(&key);
        self.commit(&current, next, None).await?;

        if let Some(old_file) = self.owned_file(&key, &prior) {
            self.media.remove(&old_file).await;
        }

        info!(key = %key, "Deleted mapping");
        Ok(())
    }

    /// Probe `uri` and, if it's an image, download and stage a local copy.
    ///
    /// Probe failures fall back to storing the URI as-is; download failures
    /// abort the mutation.
    async fn materialize(&self, key: &str, uri: &str) -> Result<Materialized> {
        let passthrough = || Materialized {
            value: uri.to_string(),
            staged: None,
        };

        let ext = match with_timeout(self.download_timeout, self.fetcher.probe_image(uri)).await {
            Ok(Ok(Some(ext))) => match normalize_extension(&ext) {
                Some(ext) => ext,
                None => {
                    warn!(uri = %uri, ext = %ext, "Probe returned unusable extension, storing URI as-is");
                    return Ok(passthrough());
                }
            },
            Ok(Ok(None)) => {
                debug!(uri = %uri, "Not an image, storing URI as-is");
                return Ok(passthrough());
            }
            Ok(Err(e)) => {
                warn!(uri = %uri, error = %e, "Probe failed, storing URI as-is");
                return Ok(passthrough());
            }
            Err(e) => {
                warn!(uri = %uri, error = %e, "Probe timed out, storing URI as-is");
                return Ok(passthrough());
            }
        };

        let started = Instant::now();
        let bytes = match with_timeout(self.download_timeout, self.fetcher.download(uri)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                metrics::record_download(false, 0, started.elapsed());
                warn!(key = %key, uri = %uri, error = %e, "Materialization download failed");
                return Err(ReplicatorError::download(uri, e.to_string()));
            }
            Err(e) => {
                metrics::record_download(false, 0, started.elapsed());
                warn!(key = %key, uri = %uri, error = %e, "Materialization download timed out");
                return Err(ReplicatorError::download(uri, e.to_string()));
            }
        };
        metrics::record_download(true, bytes.len(), started.elapsed());

        let file_name = self.media.file_name(key, &ext);
        let staged = self.media.stage(&file_name, &bytes).await?;
        let value = self.media.public_url(&file_name);
        debug!(key = %key, uri = %uri, local = %value, len = bytes.len(), "Materialized resource");

        Ok(Materialized {
            value,
            staged: Some(staged),
        })
    }

    /// Persist `next`, move any staged file into place, then publish `next`.
    async fn commit(
        &self,
        previous: &BTreeMap<String, String>,
        next: BTreeMap<String, String>,
        staged: Option<StagedMedia>,
    ) -> Result<()> {
        if let Err(e) = self.snapshot.write(&next).await {
            if let Some(staged) = staged {
                staged.discard().await;
            }
            error!(path = %self.snapshot.path().display(), error = %e, "Failed to persist mapping snapshot");
            return Err(e);
        }

        if let Some(staged) = staged {
            match staged.commit().await {
                Ok(committed) => committed.finalize().await,
                Err(e) => {
                    // The snapshot on disk already references the new file.
                    if let Err(restore) = self.snapshot.write(previous).await {
                        error!(
                            error = %restore,
                            "Failed to restore mapping snapshot after media commit failure"
                        );
                    }
                    return Err(e);
                }
            }
        }

        *self.entries.write().await = next;
        Ok(())
    }

    /// The local file `value` points at, if it's the one this key materialized.
    fn owned_file(&self, key: &str, value: &str) -> Option<String> {
        let file_name = self.media.local_file_name(value)?;
        let (stem, _ext) = file_name.rsplit_once('.')?;
        (stem == file_stem(key)).then_some(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubFetcher;
    use std::path::Path;
    use tempfile::tempdir;

    const CAT: &str = "https://cdn.test/cat.png";
    const PAGE: &str = "https://example.test/article";

    async fn open_store(root: &Path, fetcher: StubFetcher) -> MaterializedStore<StubFetcher> {
        let config = ReplicatorConfig::for_testing(root);
        MaterializedStore::from_config(&config, Arc::new(fetcher)).await.unwrap()
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  Hola ").unwrap(), "hola");
        assert!(matches!(normalize_key("   "), Err(ReplicatorError::InvalidKey(_))));
    }

    #[test]
    fn test_validate_uri() {
        assert_eq!(validate_uri(" https://x.test/a ").unwrap(), "https://x.test/a");
        assert!(validate_uri("http://x.test").is_ok());
        assert!(matches!(validate_uri("ftp://x.test/a"), Err(ReplicatorError::InvalidUri { .. })));
        assert!(matches!(validate_uri("cat"), Err(ReplicatorError::InvalidUri { .. })));
    }

    #[tokio::test]
    async fn test_open_initializes_empty_snapshot() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new()).await;

        assert!(store.is_empty().await);
        assert!(dir.path().join("maps").join("url.json").exists());
    }

    #[tokio::test]
    async fn test_save_non_image_stores_raw_uri() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new()).await;

        let stored = store.save("News", PAGE).await.unwrap();
        assert_eq!(stored, PAGE);
        assert_eq!(store.get("news").await.as_deref(), Some(PAGE));
        assert_eq!(store.get(" NEWS ").await.as_deref(), Some(PAGE));
    }

    #[tokio::test]
    async fn test_save_image_materializes() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new().image(CAT, "png", b"meow")).await;

        let stored = store.save("cat", CAT).await.unwrap();
        assert_eq!(stored, "https://media.test/img/cat.png");
        assert_eq!(store.get("cat").await.as_deref(), Some(stored.as_str()));

        let on_disk = std::fs::read(store.media().file_path("cat.png")).unwrap();
        assert_eq!(on_disk, b"meow");
    }

    #[tokio::test]
    async fn test_save_duplicate_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new()).await;

        store.save("news", PAGE).await.unwrap();
        let err = store.save("NEWS", "https://other.test/").await.unwrap_err();
        assert!(matches!(err, ReplicatorError::AlreadyExists { ref key } if key == "news"));
        assert_eq!(store.get("news").await.as_deref(), Some(PAGE));
    }

    #[tokio::test]
    async fn test_update_absent_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new()).await;

        let err = store.update("ghost", PAGE).await.unwrap_err();
        assert!(matches!(err, ReplicatorError::NotFound { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_download_rolls_back_save() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new().broken_image(CAT, "png")).await;

        let err = store.save("cat", CAT).await.unwrap_err();
        assert!(matches!(err, ReplicatorError::Download { .. }));
        assert!(store.get("cat").await.is_none());

        let on_disk = std::fs::read_to_string(dir.path().join("maps").join("url.json")).unwrap();
        assert!(!on_disk.contains("cat"));
    }

    #[tokio::test]
    async fn test_failed_download_rolls_back_update() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new().broken_image(CAT, "png")).await;

        store.save("pet", PAGE).await.unwrap();
        assert!(store.update("pet", CAT).await.is_err());
        assert_eq!(store.get("pet").await.as_deref(), Some(PAGE));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_removes_file() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new().image(CAT, "png", b"meow")).await;

        store.save("cat", CAT).await.unwrap();
        let file = store.media().file_path("cat.png");
        assert!(file.exists());

        store.delete("Cat").await.unwrap();
        assert!(store.get("cat").await.is_none());
        assert!(!file.exists());

        store.delete("cat").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_to_non_image_removes_old_file() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new().image(CAT, "png", b"meow")).await;

        store.save("cat", CAT).await.unwrap();
        store.update("cat", PAGE).await.unwrap();

        assert_eq!(store.get("cat").await.as_deref(), Some(PAGE));
        assert!(!store.media().file_path("cat.png").exists());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_unchanged() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new().image(CAT, "png", b"meow")).await;

        // A directory squatting on the temp path makes the snapshot write fail.
        std::fs::create_dir(dir.path().join("maps").join("url.json.tmp")).unwrap();

        let err = store.save("cat", CAT).await.unwrap_err();
        assert!(matches!(err, ReplicatorError::Persist { .. }));
        assert!(store.get("cat").await.is_none());
        assert!(!store.media().file_path("cat.png").exists());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_prior_update() {
        let dir = tempdir().unwrap();
        let fetcher = StubFetcher::new()
            .image(CAT, "png", b"meow")
            .image("https://cdn.test/cat2.png", "png", b"purr");
        let store = open_store(dir.path(), fetcher).await;
        let prior = store.save("cat", CAT).await.unwrap();

        std::fs::create_dir(dir.path().join("maps").join("url.json.tmp")).unwrap();

        let err = store.update("cat", "https://cdn.test/cat2.png").await.unwrap_err();
        assert!(matches!(err, ReplicatorError::Persist { .. }));
        assert_eq!(store.get("cat").await.as_deref(), Some(prior.as_str()));
        assert_eq!(std::fs::read(store.media().file_path("cat.png")).unwrap(), b"meow");
    }

    #[tokio::test]
    async fn test_media_commit_failure_restores_snapshot() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new().image(CAT, "png", b"meow")).await;
        store.save("news", PAGE).await.unwrap();

        // A non-empty directory on the destination makes the final rename fail
        // after the new snapshot has been written.
        std::fs::create_dir_all(store.media().file_path("cat.png").join("occupied")).unwrap();

        let err = store.save("cat", CAT).await.unwrap_err();
        assert!(matches!(err, ReplicatorError::Persist { .. }));
        assert!(store.get("cat").await.is_none());

        let on_disk = std::fs::read_to_string(store.snapshot_path()).unwrap();
        assert!(on_disk.contains("news"));
        assert!(!on_disk.contains("cat"));

        let reopened = open_store(dir.path(), StubFetcher::new()).await;
        let keys: Vec<_> = reopened.list().await.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["news"]);
    }

    #[tokio::test]
    async fn test_delete_blank_key_is_noop() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new()).await;
        store.save("news", PAGE).await.unwrap();

        store.delete("   ").await.unwrap();
        store.delete("").await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_normalize_loaded_merges_collisions() {
        let raw: BTreeMap<String, String> = [
            ("Hola", "https://a.test/upper"),
            ("hola", "https://a.test/lower"),
            (" Cat ", "https://a.test/cat"),
            ("CAT", "https://a.test/cat2"),
            ("  ", "https://a.test/blank"),
            ("ok", "https://a.test/ok"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let (entries, changed) = normalize_loaded(raw);
        assert!(changed);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries["hola"], "https://a.test/lower");
        // " Cat " sorts before "CAT"
        assert_eq!(entries["cat"], "https://a.test/cat");
        assert_eq!(entries["ok"], "https://a.test/ok");
    }

    #[test]
    fn test_normalize_loaded_leaves_clean_map_alone() {
        let raw: BTreeMap<String, String> =
            [("a".to_string(), PAGE.to_string()), ("b".to_string(), PAGE.to_string())].into();
        let (entries, changed) = normalize_loaded(raw.clone());
        assert!(!changed);
        assert_eq!(entries, raw);
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path(), StubFetcher::new()).await;

        store.save("zeta", PAGE).await.unwrap();
        store.save("alpha", PAGE).await.unwrap();

        let keys: Vec<_> = store.list().await.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }
}
