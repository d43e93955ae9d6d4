// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Captured emoji catalog.
//!
//! The catalog is the set of emoji that replication pushes to every target.
//! A capture replaces it wholesale: every source image is downloaded
//! concurrently, and only when all of them arrived is the new catalog staged,
//! persisted and swapped in. A single failed download leaves the previous
//! catalog and its files exactly as they were.

use crate::config::{ReplicatorConfig, SyncConfig};
use crate::error::{ReplicatorError, Result};
use crate::fetcher::{extension_from_uri, normalize_extension, ResourceFetcher};
use crate::media::{CommittedMedia, MediaDir, StagedMedia};
use crate::metrics;
use crate::resilience::{with_timeout, Bulkhead};
use crate::snapshot::SnapshotFile;
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Extension used when neither the URI nor a probe yields one.
const FALLBACK_EXTENSION: &str = "png";

/// An emoji to capture: its name and where to download it from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEmoji {
    pub name: String,
    pub url: String,
}

impl SourceEmoji {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A captured emoji and its local copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiRecord {
    pub name: String,
    /// Remote URI the image was captured from.
    pub source_url: String,
    /// Public URI of the materialized copy.
    pub local_url: String,
    /// File name inside the emoji media directory.
    pub file_name: String,
}

/// The set of emoji to replicate, keyed by name.
pub struct EmojiCatalog<F: ResourceFetcher> {
    snapshot: SnapshotFile,
    media: MediaDir,
    fetcher: Arc<F>,
    download_timeout: Duration,
    downloads: Bulkhead,
    records: RwLock<BTreeMap<String, EmojiRecord>>,
    /// Held for the whole capture.
    writer: Mutex<()>,
}

impl<F: ResourceFetcher> EmojiCatalog<F> {
    pub async fn open(
        snapshot: SnapshotFile,
        media: MediaDir,
        fetcher: Arc<F>,
        config: &SyncConfig,
    ) -> Result<Self> {
        let records: BTreeMap<String, EmojiRecord> = snapshot.load_or_init().await?;
        media.ensure_dir().await?;
        info!(
            path = %snapshot.path().display(),
            emoji = records.len(),
            "Emoji catalog loaded"
        );

        Ok(Self {
            snapshot,
            media,
            fetcher,
            download_timeout: config.download_timeout_duration(),
            downloads: Bulkhead::new(config.max_concurrent_downloads),
            records: RwLock::new(records),
            writer: Mutex::new(()),
        })
    }

    /// Open the catalog described by `config.storage`.
    pub async fn from_config(config: &ReplicatorConfig, fetcher: Arc<F>) -> Result<Self> {
        let base = config.public_base()?;
        let media = MediaDir::new(
            config.storage.emoji_media_path(),
            &base,
            &config.storage.emoji_media_dir,
        )?;
        Self::open(
            SnapshotFile::new(config.storage.emoji_map_path()),
            media,
            fetcher,
            &config.sync,
        )
        .await
    }

    pub fn media(&self) -> &MediaDir {
        &self.media
    }

    /// All records, ordered by name.
    pub async fn snapshot(&self) -> Vec<EmojiRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Path of the catalog snapshot file.
    pub fn snapshot_path(&self) -> &Path {
        self.snapshot.path()
    }

    /// Read the materialized image of every record, ordered by name.
    ///
    /// Waits out any capture in progress, so records and files always come
    /// from the same catalog.
    pub async fn load_images(&self) -> Result<Vec<(String, Bytes)>> {
        let _writer = self.writer.lock().await;
        let records = self.snapshot().await;
        let mut images = Vec::with_capacity(records.len());
        for record in records {
            let bytes = self.media.read(&record.file_name).await?;
            images.push((record.name, bytes));
        }
        Ok(images)
    }

    /// Replace the catalog with `sources`. Returns the new emoji count.
    pub async fn capture(&self, sources: Vec<SourceEmoji>) -> Result<usize> {
        let started = Instant::now();
        let result = self.capture_inner(sources).await;
        match &result {
            Ok(count) => metrics::record_capture(true, *count, started.elapsed()),
            Err(_) => metrics::record_capture(false, 0, started.elapsed()),
        }
        result
    }

    async fn capture_inner(&self, sources: Vec<SourceEmoji>) -> Result<usize> {
        let _writer = self.writer.lock().await;

        let mut wanted: BTreeMap<String, String> = BTreeMap::new();
        for source in sources {
            let name = source.name.trim().to_string();
            if name.is_empty() {
                return Err(ReplicatorError::InvalidKey(source.name));
            }
            if let Some(previous) = wanted.insert(name.clone(), source.url) {
                warn!(name = %name, dropped = %previous, "Duplicate emoji name in capture, keeping last");
            }
        }

        info!(emoji = wanted.len(), "Capturing emoji catalog");

        // Every download is joined before any result is examined.
        let downloads = wanted.iter().map(|(name, url)| self.fetch_one(name, url));
        let fetched = join_all(downloads).await;

        let mut images = Vec::with_capacity(fetched.len());
        for ((name, url), result) in wanted.iter().zip(fetched) {
            match result {
                Ok((ext, bytes)) => images.push((name.clone(), url.clone(), ext, bytes)),
                Err(message) => {
                    warn!(name = %name, uri = %url, error = %message, "Capture aborted, keeping previous catalog");
                    return Err(ReplicatorError::download(url.clone(), format!("emoji {}: {}", name, message)));
                }
            }
        }

        let mut next = BTreeMap::new();
        let mut staged: Vec<StagedMedia> = Vec::with_capacity(images.len());
        for (name, url, ext, bytes) in images {
            let file_name = self.media.file_name(&name, &ext);
            match self.media.stage(&file_name, &bytes).await {
                Ok(file) => staged.push(file),
                Err(e) => {
                    discard_all(staged).await;
                    return Err(e);
                }
            }
            next.insert(
                name.clone(),
                EmojiRecord {
                    local_url: self.media.public_url(&file_name),
                    name,
                    source_url: url,
                    file_name,
                },
            );
        }

        if let Err(e) = self.snapshot.write(&next).await {
            error!(path = %self.snapshot.path().display(), error = %e, "Failed to persist emoji catalog");
            discard_all(staged).await;
            return Err(e);
        }

        let mut committed: Vec<CommittedMedia> = Vec::with_capacity(staged.len());
        let mut pending = staged.into_iter();
        while let Some(file) = pending.next() {
            match file.commit().await {
                Ok(done) => committed.push(done),
                Err(e) => {
                    discard_all(pending.collect()).await;
                    for done in committed.into_iter().rev() {
                        done.rollback().await;
                    }
                    let previous = self.records.read().await.clone();
                    if let Err(restore) = self.snapshot.write(&previous).await {
                        error!(error = %restore, "Failed to restore emoji catalog after media commit failure");
                    }
                    return Err(e);
                }
            }
        }
        for done in committed {
            done.finalize().await;
        }

        let count = next.len();
        let kept: BTreeSet<String> = next.values().map(|r| r.file_name.clone()).collect();
        let previous = std::mem::replace(&mut *self.records.write().await, next);

        for stale in previous.values().filter(|r| !kept.contains(&r.file_name)) {
            self.media.remove(&stale.file_name).await;
        }

        info!(emoji = count, "Emoji catalog captured");
        Ok(count)
    }

    /// Resolve the extension for `url` and download it.
    async fn fetch_one(&self, name: &str, url: &str) -> std::result::Result<(String, Bytes), String> {
        let _permit = self.downloads.acquire().await.map_err(|e| e.to_string())?;

        let ext = match extension_from_uri(url) {
            Some(ext) => ext,
            None => match with_timeout(self.download_timeout, self.fetcher.probe_image(url)).await {
                Ok(Ok(Some(ext))) => normalize_extension(&ext).unwrap_or_else(|| FALLBACK_EXTENSION.to_string()),
                Ok(Ok(None)) => FALLBACK_EXTENSION.to_string(),
                Ok(Err(e)) => {
                    debug!(name = %name, uri = %url, error = %e, "Probe failed, using fallback extension");
                    FALLBACK_EXTENSION.to_string()
                }
                Err(e) => {
                    debug!(name = %name, uri = %url, error = %e, "Probe timed out, using fallback extension");
                    FALLBACK_EXTENSION.to_string()
                }
            },
        };

        let started = Instant::now();
        let result = match with_timeout(self.download_timeout, self.fetcher.download(url)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match &result {
            Ok(bytes) => metrics::record_download(true, bytes.len(), started.elapsed()),
            Err(_) => metrics::record_download(false, 0, started.elapsed()),
        }
        result.map(|bytes| (ext, bytes))
    }
}

async fn discard_all(staged: Vec<StagedMedia>) {
    for file in staged {
        file.discard().await;
    }
}
