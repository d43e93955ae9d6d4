// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot persistence for mapping files.
//!
//! Each store persists as one JSON file holding its full contents. There is
//! no append log: every accepted mutation rewrites the whole snapshot.
//!
//! # Write Protocol
//!
//! ```text
//! serialize → write <file>.tmp → fsync → rename over <file>
//! ```
//!
//! The rename is atomic on the same filesystem, so a crash leaves either the
//! old or the new snapshot on disk, never a torn one. Callers serialize
//! writers themselves (each store holds a mutex around read-modify-write).
//!
//! # Startup
//!
//! [`SnapshotFile::load_or_init`] creates the parent directory and an empty
//! snapshot when the file is absent, then reads it back.

use crate::error::{ReplicatorError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// A JSON snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Load the snapshot, writing `T::default()` first if the file is absent.
    pub async fn load_or_init<T>(&self) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ReplicatorError::persist(parent, e))?;
        }

        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| ReplicatorError::persist(&self.path, e))?;
        if !exists {
            info!(path = %self.path.display(), "Snapshot absent, initializing empty");
            self.write(&T::default()).await?;
        }

        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| ReplicatorError::persist(&self.path, e))?;
        serde_json::from_slice(&raw).map_err(|e| ReplicatorError::Serialization {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Atomically replace the snapshot with `value`.
    pub async fn write<T: Serialize>(&self, value: &T) -> Result<()> {
        let payload = serde_json::to_vec_pretty(value).map_err(|e| ReplicatorError::Serialization {
            path: self.path.clone(),
            source: e,
        })?;

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| ReplicatorError::persist(&tmp, e))?;
        file.write_all(&payload)
            .await
            .map_err(|e| ReplicatorError::persist(&tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| ReplicatorError::persist(&tmp, e))?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ReplicatorError::persist(&self.path, e));
        }

        debug!(path = %self.path.display(), bytes = payload.len(), "Snapshot persisted");
        Ok(())
    }
}
