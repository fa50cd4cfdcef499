// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Discovery of the distributions a repository publishes.

Discovery first asks the server for a listing of `<url>/dists`. That costs a
single request, but many servers deny listings. When the listing cannot be
fetched, every codename in the [CodenameTable], plus the entry's own
distribution, is probed for release metadata instead.
*/

use {
    crate::{
        codename::CodenameTable,
        listing::fetch_directory_listing,
        source_list::SourceEntry,
        transport::{distribution_file_url, join_url, RepositoryTransport},
    },
    log::{debug, info},
    serde::Serialize,
    std::fmt::{Display, Formatter},
};

/// Release metadata files whose presence indicates a published distribution.
///
/// Probed in order. Older repositories only publish `Release` and `Release.gpg`.
pub const RELEASE_METADATA_FILES: &[&str; 3] = &["InRelease", "Release", "Release.gpg"];

/// How the distributions of a repository were determined.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    /// From a `dists/` directory listing.
    Listing,
    /// By probing release metadata of candidate codenames.
    BruteForce,
    /// The listing failed and no candidate codename could be found.
    Unreachable,
}

impl Display for DiscoveryMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Listing => "listing",
            Self::BruteForce => "bruteforce",
            Self::Unreachable => "unreachable",
        })
    }
}

/// The distributions found for a repository.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DiscoveryResult {
    pub method: DiscoveryMethod,
    /// Distinct codenames, in listing order or table order.
    pub distributions: Vec<String>,
}

/// Check for published release metadata of a single distribution.
///
/// Files in [RELEASE_METADATA_FILES] are probed in order and probing stops at
/// the first one that exists.
pub async fn probe_release(
    transport: &dyn RepositoryTransport,
    url: &str,
    distribution: &str,
) -> bool {
    for filename in RELEASE_METADATA_FILES {
        if transport
            .exists(&distribution_file_url(url, distribution, filename))
            .await
        {
            return true;
        }
    }

    false
}

/// Resolves which distributions a repository publishes.
pub struct DistributionDiscovery<'a> {
    transport: &'a dyn RepositoryTransport,
    codenames: &'a CodenameTable,
}

impl<'a> DistributionDiscovery<'a> {
    pub fn new(transport: &'a dyn RepositoryTransport, codenames: &'a CodenameTable) -> Self {
        Self {
            transport,
            codenames,
        }
    }

    /// Discover the distributions available for the repository of an entry.
    ///
    /// A successful listing is authoritative, even when it is empty.
    pub async fn discover(&self, entry: &SourceEntry) -> DiscoveryResult {
        let dists_url = join_url(&entry.url, "dists");

        match fetch_directory_listing(self.transport, &dists_url).await {
            Ok(distributions) => DiscoveryResult {
                method: DiscoveryMethod::Listing,
                distributions,
            },
            Err(e) => {
                info!("listing of {} unavailable ({}); probing", dists_url, e);

                let distributions = self.brute_force(entry).await;

                DiscoveryResult {
                    method: if distributions.is_empty() {
                        DiscoveryMethod::Unreachable
                    } else {
                        DiscoveryMethod::BruteForce
                    },
                    distributions,
                }
            }
        }
    }

    /// Probe every candidate codename for release metadata.
    pub async fn brute_force(&self, entry: &SourceEntry) -> Vec<String> {
        let mut found = vec![];

        for codename in self.codenames.candidates(&entry.distribution) {
            if probe_release(self.transport, &entry.url, codename).await {
                debug!("{} publishes {}", entry.url, codename);
                found.push(codename.to_string());
            }
        }

        found
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::testutil::{Request, StubTransport},
    };

    const URL: &str = "http://example.org/ubuntu";

    fn entry(distribution: &str) -> SourceEntry {
        SourceEntry::parse_line(&format!("deb {} {} main", URL, distribution))
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn listing_is_preferred() {
        let transport = StubTransport::default().with_document(
            "http://example.org/ubuntu/dists",
            r#"<a href="lucid/">lucid/</a><a href="jaunty/">jaunty/</a>"#,
        );
        let table = CodenameTable::new(["jaunty", "lucid"]);

        let res = DistributionDiscovery::new(&transport, &table)
            .discover(&entry("jaunty"))
            .await;

        assert_eq!(res.method, DiscoveryMethod::Listing);
        assert_eq!(res.distributions, vec!["lucid", "jaunty"]);
        assert_eq!(
            transport.requests(),
            vec![Request::Get("http://example.org/ubuntu/dists".into())]
        );
    }

    #[tokio::test]
    async fn empty_listing_does_not_fall_back() {
        let transport = StubTransport::default()
            .with_document("http://example.org/ubuntu/dists", "<html></html>");
        let table = CodenameTable::new(["jaunty", "lucid"]);

        let res = DistributionDiscovery::new(&transport, &table)
            .discover(&entry("jaunty"))
            .await;

        assert_eq!(res.method, DiscoveryMethod::Listing);
        assert!(res.distributions.is_empty());
        assert!(transport.head_urls().is_empty());
    }

    #[tokio::test]
    async fn brute_force_fallback() {
        let transport = StubTransport::default()
            .with_document("http://example.org/ubuntu/dists/lucid/InRelease", "")
            .with_document("http://example.org/ubuntu/dists/lucid/Release", "")
            .with_document("http://example.org/ubuntu/dists/wily/Release.gpg", "");
        let table = CodenameTable::new(["jaunty", "lucid"]);

        let res = DistributionDiscovery::new(&transport, &table)
            .discover(&entry("wily"))
            .await;

        assert_eq!(res.method, DiscoveryMethod::BruteForce);
        assert_eq!(res.distributions, vec!["lucid", "wily"]);

        // lucid short-circuits on InRelease.
        assert_eq!(
            transport.head_urls(),
            vec![
                "http://example.org/ubuntu/dists/jaunty/InRelease",
                "http://example.org/ubuntu/dists/jaunty/Release",
                "http://example.org/ubuntu/dists/jaunty/Release.gpg",
                "http://example.org/ubuntu/dists/lucid/InRelease",
                "http://example.org/ubuntu/dists/wily/InRelease",
                "http://example.org/ubuntu/dists/wily/Release",
                "http://example.org/ubuntu/dists/wily/Release.gpg",
            ]
        );
    }

    #[tokio::test]
    async fn brute_force_stays_within_candidates() {
        let transport = StubTransport::default();
        let table = CodenameTable::new(["jaunty", "lucid"]);

        let res = DistributionDiscovery::new(&transport, &table)
            .discover(&entry("lucid"))
            .await;

        assert_eq!(res.method, DiscoveryMethod::Unreachable);
        assert!(res.distributions.is_empty());

        for url in transport.head_urls() {
            assert!(
                url.starts_with("http://example.org/ubuntu/dists/jaunty/")
                    || url.starts_with("http://example.org/ubuntu/dists/lucid/"),
                "{}",
                url
            );
        }
        assert_eq!(transport.head_urls().len(), 6);
    }
}
