// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test doubles for network and signature tool access.

use {
    crate::{
        error::{AptSourcesError, Result},
        signature::SignatureInspector,
        transport::RepositoryTransport,
    },
    async_trait::async_trait,
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    },
};

/// A request observed by [StubTransport].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Get(String),
    Head(String),
}

/// In-memory transport serving a fixed set of URLs.
///
/// URLs not registered are treated as 404s.
#[derive(Debug, Default)]
pub struct StubTransport {
    documents: HashMap<String, Vec<u8>>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Request>>,
}

impl StubTransport {
    pub fn with_document(mut self, url: impl ToString, data: impl Into<Vec<u8>>) -> Self {
        self.documents.insert(url.to_string(), data.into());
        self
    }

    /// Delay every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn get_count(&self, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| matches!(r, Request::Get(u) if u == url))
            .count()
    }

    pub fn head_urls(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::Head(u) => Some(u),
                Request::Get(_) => None,
            })
            .collect()
    }

    async fn maybe_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RepositoryTransport for StubTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.requests
            .lock()
            .unwrap()
            .push(Request::Get(url.to_string()));
        self.maybe_delay().await;

        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| AptSourcesError::HttpStatus(url.to_string(), 404))
    }

    async fn exists(&self, url: &str) -> bool {
        self.requests
            .lock()
            .unwrap()
            .push(Request::Head(url.to_string()));
        self.maybe_delay().await;

        self.documents.contains_key(url)
    }
}

/// Signature inspector returning canned output and counting invocations.
#[derive(Debug)]
pub struct StubInspector {
    output: String,
    calls: AtomicUsize,
}

impl StubInspector {
    pub fn new(output: impl ToString) -> Self {
        Self {
            output: output.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignatureInspector for StubInspector {
    async fn inspect(&self, _signature: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        Ok(self.output.clone())
    }
}
