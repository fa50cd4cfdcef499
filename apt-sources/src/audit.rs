// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Auditing a set of source entries.

[Auditor] checks every [SourceRecord] concurrently, up to a bound. For each
record whose distribution doesn't match the host, the repository's available
distributions are discovered and possibly newer ones are reported. Independently,
the signing key of every referenced `(url, distribution)` is resolved if a
[KeyIdentityResolver] is configured.

Results are buffered and sorted by source location, so the [AuditReport] is
stable regardless of the order in which probes complete.
*/

use {
    crate::{
        codename::{CodenameTable, Whitelist},
        discovery::{DiscoveryResult, DistributionDiscovery},
        key_identity::KeyIdentityResolver,
        reconcile::{find_better, is_mismatch},
        signature::KeyIdentity,
        source_list::{SourceEntry, SourceLocation, SourceRecord},
        transport::RepositoryTransport,
    },
    futures::StreamExt,
    log::debug,
    serde::Serialize,
    std::{collections::BTreeMap, sync::Arc},
};

#[cfg(feature = "http")]
use crate::{
    config::AuditConfig,
    error::Result,
    key_identity::KeyIdentityCache,
    signature::{GpgSignatureInspector, PgpSignatureInspector, SignatureInspector},
    transport::HttpTransport,
};

/// Progress of an audit.
#[derive(Clone, Debug)]
pub enum AuditEvent {
    /// Total number of entries that will be audited.
    EntriesToAudit(usize),

    /// An entry matched the host or was whitelisted.
    EntrySkipped(SourceLocation),

    /// An entry's audit finished.
    EntryAudited(SourceLocation),
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EntriesToAudit(count) => write!(f, "auditing {} entries", count),
            Self::EntrySkipped(location) => write!(f, "{} matches the host", location),
            Self::EntryAudited(location) => write!(f, "{} audited", location),
        }
    }
}

/// An entry referencing a distribution other than the host's.
#[derive(Clone, Debug, Serialize)]
pub struct MismatchRecord {
    pub location: SourceLocation,
    pub entry: SourceEntry,
    pub discovery: DiscoveryResult,
    /// Discovered codenames possibly newer than the entry's.
    pub possibly_better: Vec<String>,
}

/// The signing key of a repository distribution.
#[derive(Clone, Debug, Serialize)]
pub struct KeyRecord {
    pub url: String,
    pub distribution: String,
    /// `None` if no signature was published.
    pub identity: Option<KeyIdentity>,
}

/// Outcome of an audit.
#[derive(Clone, Debug, Serialize)]
pub struct AuditReport {
    pub host_codename: String,
    /// Number of entries examined.
    pub entries: usize,
    /// Mismatched entries, sorted by location.
    pub mismatches: Vec<MismatchRecord>,
    /// Key identities, sorted by URL then distribution.
    pub keys: Vec<KeyRecord>,
}

impl AuditReport {
    pub fn identities(&self) -> impl Iterator<Item = &Option<KeyIdentity>> {
        self.keys.iter().map(|k| &k.identity)
    }
}

/// Audits source records.
pub struct Auditor {
    transport: Arc<dyn RepositoryTransport>,
    key_resolver: Option<KeyIdentityResolver>,
    codenames: CodenameTable,
    whitelist: Whitelist,
    host_codename: String,
    max_parallel: usize,
}

impl Auditor {
    /// Construct an instance with default codenames and whitelist and no key resolution.
    pub fn new(transport: Arc<dyn RepositoryTransport>, host_codename: impl ToString) -> Self {
        Self {
            transport,
            key_resolver: None,
            codenames: CodenameTable::default(),
            whitelist: Whitelist::default(),
            host_codename: host_codename.to_string(),
            max_parallel: 4,
        }
    }

    /// Construct an HTTP backed instance from configuration.
    #[cfg(feature = "http")]
    pub fn from_config(config: &AuditConfig, host_codename: impl ToString) -> Result<Self> {
        let transport: Arc<dyn RepositoryTransport> =
            Arc::new(HttpTransport::with_timeout(config.probe_timeout())?);

        let key_resolver = if config.resolve_keys {
            let inspector: Arc<dyn SignatureInspector> = if config.use_gpg {
                Arc::new(GpgSignatureInspector::new(
                    &config.gpg_program,
                    &config.signature_reference_path,
                ))
            } else {
                Arc::new(PgpSignatureInspector)
            };

            Some(KeyIdentityResolver::new(
                transport.clone(),
                inspector,
                Arc::new(KeyIdentityCache::new()),
            ))
        } else {
            None
        };

        Ok(Self::new(transport, host_codename)
            .with_codenames(config.codenames.clone())
            .with_whitelist(config.whitelist.clone())
            .with_max_parallel(config.max_parallel_probes)
            .with_key_resolver(key_resolver))
    }

    #[must_use]
    pub fn with_codenames(mut self, codenames: CodenameTable) -> Self {
        self.codenames = codenames;
        self
    }

    #[must_use]
    pub fn with_whitelist(mut self, whitelist: Whitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    /// Set the maximum number of entries audited concurrently. At least 1.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    #[must_use]
    pub fn with_key_resolver(mut self, key_resolver: Option<KeyIdentityResolver>) -> Self {
        self.key_resolver = key_resolver;
        self
    }

    pub fn host_codename(&self) -> &str {
        &self.host_codename
    }

    pub fn key_resolver(&self) -> Option<&KeyIdentityResolver> {
        self.key_resolver.as_ref()
    }

    async fn discover_mismatch(&self, record: &SourceRecord) -> Option<MismatchRecord> {
        let entry = &record.entry;

        if !is_mismatch(entry, &self.host_codename, &self.whitelist) {
            return None;
        }

        debug!(
            "{}: distribution {} does not match {}",
            record.location, entry.distribution, self.host_codename
        );

        let discovery = DistributionDiscovery::new(self.transport.as_ref(), &self.codenames)
            .discover(entry)
            .await;
        let possibly_better = find_better(entry, &discovery.distributions, &self.codenames);

        Some(MismatchRecord {
            location: record.location.clone(),
            entry: entry.clone(),
            discovery,
            possibly_better,
        })
    }

    async fn resolve_key(&self, entry: &SourceEntry) -> Option<KeyRecord> {
        let resolver = self.key_resolver.as_ref()?;

        Some(KeyRecord {
            url: entry.url.clone(),
            distribution: entry.distribution.clone(),
            identity: resolver.resolve(&entry.url, &entry.distribution).await,
        })
    }

    /// Audit records.
    ///
    /// Failures of individual probes never abort the audit. They surface as
    /// unreachable discoveries or absent key identities in the report.
    pub async fn audit(
        &self,
        records: &[SourceRecord],
        progress_cb: &Option<Box<dyn Fn(AuditEvent) + Sync>>,
    ) -> AuditReport {
        if let Some(cb) = progress_cb {
            cb(AuditEvent::EntriesToAudit(records.len()));
        }

        let fs = records.iter().map(|record| async move {
            let (mismatch, key) =
                futures::join!(self.discover_mismatch(record), self.resolve_key(&record.entry));

            (&record.location, mismatch, key)
        });

        let mut buffered = futures::stream::iter(fs).buffer_unordered(self.max_parallel);

        let mut mismatches = vec![];
        let mut keys = BTreeMap::new();

        while let Some((location, mismatch, key)) = buffered.next().await {
            if let Some(cb) = progress_cb {
                cb(if mismatch.is_some() {
                    AuditEvent::EntryAudited(location.clone())
                } else {
                    AuditEvent::EntrySkipped(location.clone())
                });
            }

            mismatches.extend(mismatch);

            if let Some(key) = key {
                keys.insert((key.url.clone(), key.distribution.clone()), key);
            }
        }

        mismatches.sort_by(|a, b| a.location.cmp(&b.location));

        AuditReport {
            host_codename: self.host_codename.clone(),
            entries: records.len(),
            mismatches,
            keys: keys.into_values().collect(),
        }
    }
}
