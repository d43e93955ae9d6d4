//! Mock ResourceFetcher for testing.
//!
//! Serves canned images by URI. Unknown URIs probe as "not an image" and
//! fail to download. Tracks how many downloads ran at once so tests can
//! check the download bulkhead.

use bytes::Bytes;
use emoji_replicator::fetcher::{BoxFuture, FetchError, ResourceFetcher};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Resource {
    ext: Option<String>,
    body: Result<Bytes, String>,
}

#[derive(Default)]
pub struct MockFetcher {
    resources: Mutex<HashMap<String, Resource>>,
    probe_errors: Mutex<HashSet<String>>,
    download_delay: Mutex<Option<Duration>>,
    downloads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `uri` as an image with extension `ext`.
    pub fn with_image(self, uri: &str, ext: &str, body: &[u8]) -> Self {
        self.set(uri, Some(ext), Ok(Bytes::copy_from_slice(body)));
        self
    }

    /// Serve a non-image page at `uri`.
    pub fn with_page(self, uri: &str) -> Self {
        self.set(uri, None, Ok(Bytes::from_static(b"<html></html>")));
        self
    }

    /// `uri` probes as an image but its download fails.
    pub fn with_broken_image(self, uri: &str, ext: &str) -> Self {
        self.set(uri, Some(ext), Err("connection reset by peer".to_string()));
        self
    }

    /// Probing `uri` errors out.
    pub fn with_probe_error(self, uri: &str) -> Self {
        self.probe_errors.lock().unwrap().insert(uri.to_string());
        self
    }

    pub fn with_download_delay(self, delay: Duration) -> Self {
        *self.download_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn set(&self, uri: &str, ext: Option<&str>, body: Result<Bytes, String>) {
        self.resources.lock().unwrap().insert(
            uri.to_string(),
            Resource {
                ext: ext.map(str::to_string),
                body,
            },
        );
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_downloads(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ResourceFetcher for MockFetcher {
    fn probe_image(&self, uri: &str) -> BoxFuture<'_, Option<String>> {
        let uri = uri.to_string();
        Box::pin(async move {
            if self.probe_errors.lock().unwrap().contains(&uri) {
                return Err(FetchError(format!("HEAD {}: dns failure", uri)));
            }
            Ok(self
                .resources
                .lock()
                .unwrap()
                .get(&uri)
                .and_then(|r| r.ext.clone()))
        })
    }

    fn download(&self, uri: &str) -> BoxFuture<'_, Bytes> {
        let uri = uri.to_string();
        Box::pin(async move {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = *self.download_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let found = self.resources.lock().unwrap().get(&uri).cloned();
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match found {
                Some(resource) => resource.body.map_err(FetchError),
                None => Err(FetchError(format!("GET {}: 404 Not Found", uri))),
            }
        })
    }
}
