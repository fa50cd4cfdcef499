// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Distribution codenames.

A [CodenameTable] is an ordered list of known release codenames, oldest first.
It serves two purposes: it is the search space when a repository must be
probed codename by codename, and it is the ranking axis used to decide whether
one codename is newer than another.

Codenames absent from the table have no rank. Callers treat them as possibly
newer than anything else.

A [Whitelist] holds codenames that never count as a mismatch, such as rolling
aliases like `stable` or `unstable`.
*/

use {
    serde::{Deserialize, Serialize},
    std::collections::HashSet,
};

/// Ubuntu and Debian release codenames ordered by release date.
pub const DEFAULT_CODENAMES: &[&str] = &[
    "gutsy", "hardy", "intrepid", "jaunty", "karmic", "lucid", "maverick", "squeeze", "natty",
    "oneiric", "precise", "quantal", "raring", "wheezy", "saucy", "trusty", "utopic", "vivid",
    "jessie", "wily", "xenial", "yakkety", "zesty", "stretch", "artful", "bionic", "cosmic",
    "disco", "buster", "eoan", "focal", "groovy", "hirsute", "bullseye", "impish", "jammy",
    "kinetic", "lunar", "bookworm", "mantic", "noble", "oracular", "plucky", "trixie",
    "questing",
];

/// Suite names which are aliases rather than pinned releases.
pub const DEFAULT_WHITELIST: &[&str] = &["devel", "stable", "unstable", "testing", "beta", "preview"];

/// An ordered sequence of known codenames, oldest to newest.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CodenameTable {
    codenames: Vec<String>,
}

impl Default for CodenameTable {
    fn default() -> Self {
        Self::new(DEFAULT_CODENAMES.iter().copied())
    }
}

impl From<Vec<String>> for CodenameTable {
    fn from(codenames: Vec<String>) -> Self {
        Self::new(codenames)
    }
}

impl From<CodenameTable> for Vec<String> {
    fn from(table: CodenameTable) -> Self {
        table.codenames
    }
}

impl CodenameTable {
    /// Construct an instance from codenames ordered oldest first.
    ///
    /// Repeated codenames keep their first position.
    pub fn new(codenames: impl IntoIterator<Item = impl ToString>) -> Self {
        let mut seen = HashSet::new();

        Self {
            codenames: codenames
                .into_iter()
                .map(|c| c.to_string())
                .filter(|c| seen.insert(c.clone()))
                .collect(),
        }
    }

    /// Obtain the rank of a codename. Larger is newer.
    pub fn rank(&self, codename: &str) -> Option<usize> {
        self.codenames.iter().position(|c| c == codename)
    }

    /// Whether the codename is present in the table.
    pub fn contains(&self, codename: &str) -> bool {
        self.rank(codename).is_some()
    }

    /// Iterate codenames oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.codenames.iter().map(|c| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.codenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codenames.is_empty()
    }

    /// Codenames to brute force for a repository entry.
    ///
    /// This is the table followed by `extra` if the table does not already
    /// contain it.
    pub fn candidates<'a>(&'a self, extra: &'a str) -> impl Iterator<Item = &'a str> {
        let extra = if extra.is_empty() || self.contains(extra) {
            None
        } else {
            Some(extra)
        };

        self.iter().chain(extra)
    }
}

/// Codenames exempted from mismatch detection.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Whitelist {
    codenames: HashSet<String>,
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::new(DEFAULT_WHITELIST.iter().copied())
    }
}

impl Whitelist {
    pub fn new(codenames: impl IntoIterator<Item = impl ToString>) -> Self {
        Self {
            codenames: codenames.into_iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn contains(&self, codename: &str) -> bool {
        self.codenames.contains(codename)
    }

    /// Add codenames to the whitelist.
    pub fn extend(&mut self, codenames: impl IntoIterator<Item = impl ToString>) {
        self.codenames
            .extend(codenames.into_iter().map(|c| c.to_string()));
    }
}
