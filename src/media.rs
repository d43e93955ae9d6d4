// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local media directory for materialized resources.
//!
//! A [`MediaDir`] pairs a directory under `static_dir` with the public URL
//! that serves it. File names are derived deterministically from the key or
//! emoji name plus the detected extension, so re-materializing the same key
//! overwrites the same file.
//!
//! # Staged Writes
//!
//! Bytes are first written to a hidden `.partial` sibling ([`StagedMedia`]).
//! The owner persists its snapshot and only then commits (renames) the file.
//! If anything fails in between, the staged file is discarded and the
//! previously served file is untouched.
//!
//! Committing over an existing file first moves that file aside to a hidden
//! `.bak` sibling. The returned [`CommittedMedia`] either finalizes (drops the
//! backup) or rolls back (puts the backup back), so an owner committing
//! several files can undo the ones already in place when a later one fails.

use crate::error::{ReplicatorError, Result};
use bytes::Bytes;
use reqwest::Url;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Turn a key or emoji name into a safe, ASCII-only file stem.
///
/// ASCII alphanumerics, `-` and `_` are kept. Every other character becomes
/// `~<hex codepoint>~`, which keeps the mapping injective and free of path
/// separators.
pub fn file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            stem.push(c);
        } else {
            stem.push_str(&format!("~{:x}~", c as u32));
        }
    }
    stem
}

/// A directory of materialized files and the URL it is served from.
#[derive(Debug, Clone)]
pub struct MediaDir {
    dir: PathBuf,
    base_url: Url,
}

impl MediaDir {
    /// `public_base` must end with `/`; see
    /// [`ReplicatorConfig::public_base`](crate::config::ReplicatorConfig::public_base).
    pub fn new(dir: impl Into<PathBuf>, public_base: &Url, subdir: &str) -> Result<Self> {
        let base_url = public_base
            .join(&format!("{}/", subdir.trim_matches('/')))
            .map_err(|e| ReplicatorError::Config(format!("media subdir {:?}: {}", subdir, e)))?;
        Ok(Self {
            dir: dir.into(),
            base_url,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ReplicatorError::persist(&self.dir, e))
    }

    /// Deterministic file name for `name` with extension `ext`.
    pub fn file_name(&self, name: &str, ext: &str) -> String {
        format!("{}.{}", file_stem(name), ext.trim_start_matches('.'))
    }

    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Public URI for a file in this directory.
    pub fn public_url(&self, file_name: &str) -> String {
        // File names are ASCII-safe, so joining cannot fail or re-encode them.
        match self.base_url.join(file_name) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.base_url, file_name),
        }
    }

    /// If `uri` points at a file served from this directory, return its name.
    pub fn local_file_name(&self, uri: &str) -> Option<String> {
        let rest = uri.strip_prefix(self.base_url.as_str())?;
        if rest.is_empty() || rest.contains(|c: char| matches!(c, '/' | '?' | '#')) || rest.starts_with('.') {
            return None;
        }
        Some(rest.to_string())
    }

    /// Write `bytes` to a staging file for `file_name`.
    pub async fn stage(&self, file_name: &str, bytes: &[u8]) -> Result<StagedMedia> {
        self.ensure_dir().await?;
        let dest = self.file_path(file_name);
        let tmp = self.dir.join(format!(".{}.partial", file_name));
        let backup = self.dir.join(format!(".{}.bak", file_name));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| ReplicatorError::persist(&tmp, e))?;
        debug!(path = %dest.display(), len = bytes.len(), "Staged media file");
        Ok(StagedMedia { tmp, dest, backup })
    }

    /// Read a materialized file.
    pub async fn read(&self, file_name: &str) -> Result<Bytes> {
        let path = self.file_path(file_name);
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| ReplicatorError::persist(&path, e))
    }

    /// Remove a materialized file. Missing files are ignored; other errors are
    /// logged and swallowed.
    pub async fn remove(&self, file_name: &str) {
        let path = self.file_path(file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed media file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove media file"),
        }
    }
}

/// Bytes written next to their destination, not yet visible under it.
#[derive(Debug)]
#[must_use = "staged media must be committed or discarded"]
pub struct StagedMedia {
    tmp: PathBuf,
    dest: PathBuf,
    backup: PathBuf,
}

impl StagedMedia {
    /// Move the staged bytes into place, keeping any file they replace.
    ///
    /// On error the destination holds whatever it held before.
    pub async fn commit(self) -> Result<CommittedMedia> {
        let replaced = match tokio::fs::symlink_metadata(&self.dest).await {
            Ok(meta) if meta.is_file() => {
                if let Err(e) = tokio::fs::rename(&self.dest, &self.backup).await {
                    let _ = tokio::fs::remove_file(&self.tmp).await;
                    return Err(ReplicatorError::persist(&self.backup, e));
                }
                true
            }
            _ => false,
        };

        if let Err(e) = tokio::fs::rename(&self.tmp, &self.dest).await {
            let _ = tokio::fs::remove_file(&self.tmp).await;
            if replaced {
                if let Err(restore) = tokio::fs::rename(&self.backup, &self.dest).await {
                    warn!(path = %self.dest.display(), error = %restore, "Failed to restore replaced media file");
                }
            }
            return Err(ReplicatorError::persist(&self.dest, e));
        }

        Ok(CommittedMedia {
            dest: self.dest,
            backup: replaced.then_some(self.backup),
        })
    }

    /// Drop the staged bytes.
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_file(&self.tmp).await {
            warn!(path = %self.tmp.display(), error = %e, "Failed to discard staged media");
        }
    }
}

/// A committed file whose predecessor (if any) is still kept aside.
#[derive(Debug)]
#[must_use = "committed media must be finalized or rolled back"]
pub struct CommittedMedia {
    dest: PathBuf,
    backup: Option<PathBuf>,
}

impl CommittedMedia {
    /// Keep the new file and drop the one it replaced.
    pub async fn finalize(self) {
        if let Some(backup) = self.backup {
            if let Err(e) = tokio::fs::remove_file(&backup).await {
                warn!(path = %backup.display(), error = %e, "Failed to remove media backup");
            }
        }
    }

    /// Put the replaced file back, or remove the new one if it replaced nothing.
    pub async fn rollback(self) {
        let result = match &self.backup {
            Some(backup) => tokio::fs::rename(backup, &self.dest).await,
            None => tokio::fs::remove_file(&self.dest).await,
        };
        if let Err(e) = result {
            error!(path = %self.dest.display(), error = %e, "Failed to roll back media file");
        }
    }
}
