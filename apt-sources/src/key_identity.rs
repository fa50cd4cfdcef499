// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolution and caching of repository signing key identities.

Many source entries share a repository and distribution (`deb` and `deb-src`
lines, multiple files referencing the same mirror). Resolving a key identity
costs a network fetch and a signature inspection, so results are cached per
`(url, distribution)` for the lifetime of a [KeyIdentityCache].

The cache is single-flight: concurrent lookups of the same key wait on the
first lookup's resolution instead of starting their own. If a resolution is
cancelled, the next lookup starts a new one. Completed entries are never
invalidated.
*/

use {
    crate::{
        signature::{KeyIdentity, SignatureInspector},
        transport::{distribution_file_url, RepositoryTransport},
    },
    log::{debug, info, warn},
    std::{
        collections::{BTreeMap, HashMap},
        future::Future,
        sync::{Arc, Mutex, PoisonError},
    },
    tokio::sync::OnceCell,
};

/// Cache key: repository URL without trailing slashes, and distribution.
pub type KeyIdentityCacheKey = (String, String);

/// A cached resolution. `None` means no signature was published.
pub type CachedKeyIdentity = Option<KeyIdentity>;

fn cache_key(url: &str, distribution: &str) -> KeyIdentityCacheKey {
    (
        url.trim_end_matches('/').to_string(),
        distribution.to_string(),
    )
}

/// Write-once cache of key identities.
#[derive(Debug, Default)]
pub struct KeyIdentityCache {
    cells: Mutex<HashMap<KeyIdentityCacheKey, Arc<OnceCell<CachedKeyIdentity>>>>,
}

impl KeyIdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, url: &str, distribution: &str) -> Arc<OnceCell<CachedKeyIdentity>> {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cache_key(url, distribution))
            .or_default()
            .clone()
    }

    /// Obtain the cached value or populate it by running `resolve`.
    ///
    /// At most one `resolve` future runs per key at a time.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        url: &str,
        distribution: &str,
        resolve: F,
    ) -> CachedKeyIdentity
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CachedKeyIdentity>,
    {
        self.cell(url, distribution)
            .get_or_init(resolve)
            .await
            .clone()
    }

    /// Obtain a resolved value without resolving.
    ///
    /// The outer `Option` is `None` when nothing has been resolved yet.
    pub fn get(&self, url: &str, distribution: &str) -> Option<CachedKeyIdentity> {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key(url, distribution))
            .and_then(|cell| cell.get().cloned())
    }

    /// Snapshot of all resolved entries.
    pub fn resolved(&self) -> BTreeMap<KeyIdentityCacheKey, CachedKeyIdentity> {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(key, cell)| cell.get().map(|value| (key.clone(), value.clone())))
            .collect()
    }
}

/// Resolves the key a repository distribution is signed with.
#[derive(Clone)]
pub struct KeyIdentityResolver {
    transport: Arc<dyn RepositoryTransport>,
    inspector: Arc<dyn SignatureInspector>,
    cache: Arc<KeyIdentityCache>,
}

impl KeyIdentityResolver {
    pub fn new(
        transport: Arc<dyn RepositoryTransport>,
        inspector: Arc<dyn SignatureInspector>,
        cache: Arc<KeyIdentityCache>,
    ) -> Self {
        Self {
            transport,
            inspector,
            cache,
        }
    }

    /// The cache backing this resolver.
    pub fn cache(&self) -> &Arc<KeyIdentityCache> {
        &self.cache
    }

    /// Resolve the signing key identity of a distribution.
    ///
    /// Returns `None` if `dists/<distribution>/Release.gpg` can't be fetched.
    /// If the signature can't be inspected or names no signer, the returned
    /// identity has an empty key ID. Results are cached.
    pub async fn resolve(&self, url: &str, distribution: &str) -> CachedKeyIdentity {
        self.cache
            .get_or_resolve(url, distribution, || self.resolve_uncached(url, distribution))
            .await
    }

    async fn resolve_uncached(&self, url: &str, distribution: &str) -> CachedKeyIdentity {
        let signature_url = distribution_file_url(url, distribution, "Release.gpg");
        debug!("fetching {}", signature_url);

        let signature = match self.transport.fetch(&signature_url).await {
            Ok(data) => data,
            Err(e) => {
                info!("no signature found at {}: {}", signature_url, e);
                return None;
            }
        };

        let identity = match self.inspector.inspect(&signature).await {
            Ok(output) => KeyIdentity::from_inspector_output(&output),
            Err(e) => KeyIdentity::unidentified(e),
        };

        if identity.is_identified() {
            info!(
                "{} {} is signed by key {}",
                url, distribution, identity.key_id
            );
        } else {
            warn!(
                "could not identify signer of {}: {}",
                signature_url,
                identity.raw.trim()
            );
        }

        Some(identity)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::testutil::{StubInspector, StubTransport},
        std::time::Duration,
    };

    const BANNER: &str = "gpg: Signature made Sat 20 Nov 2021 08:57:21 UTC using RSA key ID 648ACFD622F3D138\n";

    fn resolver(transport: Arc<StubTransport>, inspector: Arc<StubInspector>) -> KeyIdentityResolver {
        KeyIdentityResolver::new(transport, inspector, Arc::new(KeyIdentityCache::new()))
    }

    #[tokio::test]
    async fn resolve_is_cached() {
        let transport = Arc::new(
            StubTransport::default()
                .with_document("http://example.org/debian/dists/bullseye/Release.gpg", "sig"),
        );
        let inspector = Arc::new(StubInspector::new(BANNER));
        let resolver = resolver(transport.clone(), inspector.clone());

        let first = resolver
            .resolve("http://example.org/debian", "bullseye")
            .await
            .unwrap();
        let second = resolver
            .resolve("http://example.org/debian/", "bullseye")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.key_id, "648ACFD622F3D138");
        assert_eq!(first.key_type, "RSA");
        assert_eq!(
            transport.get_count("http://example.org/debian/dists/bullseye/Release.gpg"),
            1
        );
        assert_eq!(inspector.calls(), 1);
    }

    #[tokio::test]
    async fn missing_signature_is_cached_absent() {
        let transport = Arc::new(StubTransport::default());
        let inspector = Arc::new(StubInspector::new(BANNER));
        let resolver = resolver(transport.clone(), inspector.clone());

        assert_eq!(resolver.resolve("http://example.org/ppa", "wily").await, None);
        assert_eq!(resolver.resolve("http://example.org/ppa", "wily").await, None);

        assert_eq!(transport.requests().len(), 1);
        assert_eq!(inspector.calls(), 0);
        assert_eq!(
            resolver.cache().get("http://example.org/ppa", "wily"),
            Some(None)
        );
    }

    #[tokio::test]
    async fn unrecognized_output_keeps_raw() {
        let transport = Arc::new(
            StubTransport::default()
                .with_document("http://example.org/debian/dists/sid/Release.gpg", "sig"),
        );
        let inspector = Arc::new(StubInspector::new("gpg: something unexpected"));
        let resolver = resolver(transport, inspector);

        let identity = resolver
            .resolve("http://example.org/debian", "sid")
            .await
            .unwrap();

        assert_eq!(identity.key_id, "");
        assert_eq!(identity.raw, "gpg: something unexpected");
    }

    #[tokio::test]
    async fn concurrent_lookups_are_single_flight() {
        let transport = Arc::new(
            StubTransport::default()
                .with_document("http://example.org/debian/dists/bullseye/Release.gpg", "sig")
                .with_delay(Duration::from_millis(50)),
        );
        let inspector = Arc::new(StubInspector::new(BANNER));
        let resolver = resolver(transport.clone(), inspector.clone());

        let results = futures::future::join_all(
            (0..8).map(|_| resolver.resolve("http://example.org/debian", "bullseye")),
        )
        .await;

        assert!(results
            .iter()
            .all(|r| r.as_ref().map(|i| i.key_id.as_str()) == Some("648ACFD622F3D138")));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(inspector.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_resolution_is_retried() {
        let transport = Arc::new(
            StubTransport::default()
                .with_document("http://example.org/debian/dists/bullseye/Release.gpg", "sig")
                .with_delay(Duration::from_millis(50)),
        );
        let inspector = Arc::new(StubInspector::new(BANNER));
        let resolver = resolver(transport.clone(), inspector.clone());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(1),
            resolver.resolve("http://example.org/debian", "bullseye"),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(resolver.cache().get("http://example.org/debian", "bullseye"), None);

        assert!(resolver
            .resolve("http://example.org/debian", "bullseye")
            .await
            .is_some());
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(resolver.cache().resolved().len(), 1);
    }
}
