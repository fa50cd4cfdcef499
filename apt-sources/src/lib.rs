// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Auditing of APT source entries.

Over time, `sources.list` files accumulate entries that reference distribution
releases other than the one the host runs: third party repositories that were
never updated after a release upgrade, entries pinned on purpose, or plain
mistakes. This crate finds those entries and asks each repository which
releases it actually publishes, so an operator can tell which is which. It also
identifies the key each repository signs its release metadata with and
compares it against the locally trusted keys.

# A Tour of Functionality

The [source_list] module parses one-line style sources list files into
[source_list::SourceEntry] values. [source_list::SourceLine] is the tokenized
form, making the optional `[ options ]` bracket explicit.

The [codename] module defines [codename::CodenameTable], the ordered list of
known release codenames that serves both as a search space and as a ranking,
and [codename::Whitelist], codenames never considered stale.

Network access goes through the [transport::RepositoryTransport] trait.
[transport::HttpTransport] implements it over HTTP(S). Every request carries
its own method and timeout.

[discovery::DistributionDiscovery] determines the distributions a repository
publishes. It scrapes the `dists/` directory listing (see [listing]) and falls
back to probing release metadata of every known codename.

[reconcile::find_better()] picks discovered codenames possibly newer than an
entry's distribution.

[key_identity::KeyIdentityResolver] fetches a distribution's `Release.gpg` and
identifies its signer through a [signature::SignatureInspector]. Results are
held in a [key_identity::KeyIdentityCache], which resolves each
`(url, distribution)` at most once even under concurrent lookups.
[keyring] compares identified keys against the trusted keyring and can import
missing ones.

[audit::Auditor] ties everything together, auditing entries concurrently and
producing a stable [audit::AuditReport]. [config::AuditConfig] holds its
settings and [host] detects the running distribution.

# Crate Features

The optional and enabled-by-default `http` feature enables HTTP client support.
*/

pub mod audit;
pub mod codename;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod key_identity;
pub mod keyring;
pub mod listing;
pub mod reconcile;
pub mod signature;
pub mod source_list;
#[cfg(test)]
mod testutil;
pub mod transport;
