//! Stub fetcher shared by unit tests.

use crate::fetcher::{BoxFuture, FetchError, ResourceFetcher};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone)]
struct StubResource {
    ext: Option<String>,
    body: Result<Bytes, String>,
}

/// Serves canned probe/download answers; unknown URIs are "not an image"
/// and fail to download.
#[derive(Default)]
pub struct StubFetcher {
    resources: Mutex<HashMap<String, StubResource>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(self, uri: &str, ext: &str, body: &'static [u8]) -> Self {
        self.insert(uri, Some(ext), Ok(Bytes::from_static(body)));
        self
    }

    pub fn broken_image(self, uri: &str, ext: &str) -> Self {
        self.insert(uri, Some(ext), Err("connection reset".to_string()));
        self
    }

    pub fn insert(&self, uri: &str, ext: Option<&str>, body: Result<Bytes, String>) {
        self.resources.lock().unwrap().insert(
            uri.to_string(),
            StubResource {
                ext: ext.map(str::to_string),
                body,
            },
        );
    }

    fn lookup(&self, uri: &str) -> Option<StubResource> {
        self.resources.lock().unwrap().get(uri).cloned()
    }
}

impl ResourceFetcher for StubFetcher {
    fn probe_image(&self, uri: &str) -> BoxFuture<'_, Option<String>> {
        let found = self.lookup(uri);
        Box::pin(async move { Ok(found.and_then(|r| r.ext)) })
    }

    fn download(&self, uri: &str) -> BoxFuture<'_, Bytes> {
        let found = self.lookup(uri);
        let uri = uri.to_string();
        Box::pin(async move {
            match found {
                Some(r) => r.body.map_err(FetchError),
                None => Err(FetchError(format!("404 for {}", uri))),
            }
        })
    }
}
