// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote resource fetching.
//!
//! The store and the catalog only need two things from the network: whether a
//! URI points at an image (and which file extension it should get), and the
//! bytes behind it. [`ResourceFetcher`] captures that, so tests can swap in a
//! mock and production uses [`HttpFetcher`].

use crate::config::FetcherConfig;
use crate::error::{ReplicatorError, Result};
use bytes::{Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, trace};

/// Result type for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Boxed future returned by [`ResourceFetcher`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = FetchResult<T>> + Send + 'a>>;

/// Simplified error for fetch operations.
#[derive(Debug, Clone)]
pub struct FetchError(pub String);

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for FetchError {}

/// What the store and catalog need from the network.
pub trait ResourceFetcher: Send + Sync + 'static {
    /// Check whether `uri` denotes image content.
    ///
    /// Returns the file extension to store it under (without the dot), or
    /// `None` when the resource is not an image.
    fn probe_image(&self, uri: &str) -> BoxFuture<'_, Option<String>>;

    /// Download the bytes behind `uri`.
    fn download(&self, uri: &str) -> BoxFuture<'_, Bytes>;
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg", "ico", "avif"];

/// Map an image `Content-Type` to a file extension.
///
/// Parameters such as `; charset=...` are ignored. Non-image types give `None`.
pub fn extension_from_content_type(content_type: &str) -> Option<String> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    let subtype = mime.strip_prefix("image/")?;
    let ext = match subtype {
        "jpeg" | "pjpeg" | "jpg" => "jpg",
        "svg+xml" => "svg",
        "x-icon" | "vnd.microsoft.icon" => "ico",
        "" => return None,
        other => other,
    };
    if ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext.to_string())
    } else {
        None
    }
}

/// Clean up an extension reported by a fetcher: strip a leading dot,
/// lowercase, and reject anything that isn't short and alphanumeric.
pub fn normalize_extension(ext: &str) -> Option<String> {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

/// Extract the file extension from a URI's path, lowercased.
///
/// Query strings and fragments are ignored. Returns `None` when the last path
/// segment has no extension or it isn't a plain alphanumeric suffix.
pub fn extension_from_uri(uri: &str) -> Option<String> {
    let url = Url::parse(uri).ok()?;
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Like [`extension_from_uri`], but only for known image extensions.
pub fn image_extension_from_uri(uri: &str) -> Option<String> {
    extension_from_uri(uri).filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// [`ResourceFetcher`] backed by `reqwest`.
///
/// Probing issues a `HEAD` and reads `Content-Type`; when the server omits it,
/// the URI's path extension decides. Bodies are read chunk by chunk and the
/// download is abandoned as soon as it passes `max_download_bytes`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_download_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout_duration())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ReplicatorError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_download_bytes: config.max_download_bytes,
        })
    }
}

impl ResourceFetcher for HttpFetcher {
    fn probe_image(&self, uri: &str) -> BoxFuture<'_, Option<String>> {
        let uri = uri.to_string();
        Box::pin(async move {
            let response = self
                .client
                .head(&uri)
                .send()
                .await
                .map_err(|e| FetchError(format!("HEAD {}: {}", uri, e)))?;

            if !response.status().is_success() {
                debug!(uri = %uri, status = %response.status(), "Probe returned non-success status");
                return Ok(None);
            }

            let ext = match response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
                Some(content_type) => extension_from_content_type(content_type),
                None => image_extension_from_uri(&uri),
            };
            trace!(uri = %uri, ext = ?ext, "Probed resource");
            Ok(ext)
        })
    }

    fn download(&self, uri: &str) -> BoxFuture<'_, Bytes> {
        let uri = uri.to_string();
        Box::pin(async move {
            let mut response = self
                .client
                .get(&uri)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| FetchError(format!("GET {}: {}", uri, e)))?;

            let mut body = LimitedBody::new(&uri, self.max_download_bytes);
            if let Some(len) = response.content_length() {
                body.check_declared(len)?;
            }

            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| FetchError(format!("reading body of {}: {}", uri, e)))?
            {
                body.push(&chunk)?;
            }
            Ok(body.finish())
        })
    }
}

/// Response body accumulator that stops as soon as the size limit is passed.
struct LimitedBody<'a> {
    uri: &'a str,
    buf: BytesMut,
    max: usize,
}

impl<'a> LimitedBody<'a> {
    fn new(uri: &'a str, max: usize) -> Self {
        Self {
            uri,
            buf: BytesMut::new(),
            max,
        }
    }

    fn too_large(&self, len: impl std::fmt::Display) -> FetchError {
        FetchError(format!("{} is {} bytes, limit is {}", self.uri, len, self.max))
    }

    /// Reject a `Content-Length` above the limit before reading anything.
    fn check_declared(&self, len: u64) -> FetchResult<()> {
        match usize::try_from(len) {
            Ok(n) if n <= self.max => Ok(()),
            _ => Err(self.too_large(len)),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> FetchResult<()> {
        let total = self.buf.len().saturating_add(chunk.len());
        if total > self.max {
            return Err(self.too_large(format!("at least {}", total)));
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
