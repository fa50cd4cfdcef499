// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository transport.

[RepositoryTransport] abstracts the two network operations everything else is
built on: fetching a URL's content and checking whether a URL exists.
[HttpTransport] implements it with `reqwest`.

Every request is configured individually. The HTTP method and timeout belong
to the request being built, never to the shared [reqwest::Client], so
concurrent probes cannot observe each other's settings.
*/

use {
    crate::error::Result,
    async_trait::async_trait,
    std::time::Duration,
};

#[cfg(feature = "http")]
use {
    crate::error::AptSourcesError,
    log::debug,
    reqwest::{Client, StatusCode, Url},
};

/// Default bound on the duration of a single request.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Network access to repositories.
#[async_trait]
pub trait RepositoryTransport: Send + Sync {
    /// Fetch the content of a URL.
    ///
    /// Errors on transport failure or on a non-2xx final status.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Check whether a URL exists without transferring its body.
    ///
    /// Only an exact `200 OK` counts as existing. Failures of any kind
    /// resolve to `false`.
    async fn exists(&self, url: &str) -> bool;
}

/// Join a repository base URL and a relative path.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// URL of a file within a distribution directory.
///
/// e.g. `http://deb.debian.org/debian` + `bullseye` + `Release` yields
/// `http://deb.debian.org/debian/dists/bullseye/Release`.
pub fn distribution_file_url(base: &str, distribution: &str, filename: &str) -> String {
    join_url(
        base,
        &format!("dists/{}/{}", distribution.trim_matches('/'), filename),
    )
}

/// Transport for HTTP(S) hosted repositories.
#[cfg(feature = "http")]
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

#[cfg(feature = "http")]
impl HttpTransport {
    /// Construct an instance bounding requests by [DEFAULT_PROBE_TIMEOUT].
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Construct an instance with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::new_client(client, timeout))
    }

    /// Construct an instance using the given [Client].
    ///
    /// Redirect handling follows the client's policy.
    pub fn new_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl RepositoryTransport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = Url::parse(url)?;

        let res = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(AptSourcesError::HttpStatus(url.to_string(), status.as_u16()));
        }

        Ok(res.bytes().await?.to_vec())
    }

    async fn exists(&self, url: &str) -> bool {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                debug!("not probing unparseable URL {}: {}", url, e);
                return false;
            }
        };

        match self
            .client
            .head(url.clone())
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(res) => {
                debug!("HEAD {} -> {}", url, res.status());
                res.status() == StatusCode::OK
            }
            Err(e) => {
                debug!("HEAD {} failed: {}", url, e);
                false
            }
        }
    }
}
