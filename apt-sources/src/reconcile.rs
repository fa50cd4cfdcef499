// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Comparing an entry's distribution against what its repository offers. */

use crate::{
    codename::{CodenameTable, Whitelist},
    source_list::SourceEntry,
};

/// Whether an entry references a distribution other than the host's.
///
/// Entries whose distribution starts with the host codename (e.g. `focal-updates`
/// on `focal`) or that are whitelisted are never mismatches.
pub fn is_mismatch(entry: &SourceEntry, host_codename: &str, whitelist: &Whitelist) -> bool {
    let matches_host = !host_codename.is_empty() && entry.distribution.starts_with(host_codename);

    !matches_host && !whitelist.contains(&entry.distribution)
}

/// Find discovered codenames that are possibly newer than the entry's.
///
/// A codename qualifies if it has no rank in the table, if the entry's
/// distribution has no rank, or if it ranks strictly newer. The entry's own
/// distribution never qualifies. Order of `discovered` is preserved.
pub fn find_better(
    entry: &SourceEntry,
    discovered: &[String],
    codenames: &CodenameTable,
) -> Vec<String> {
    let current = codenames.rank(&entry.distribution);

    discovered
        .iter()
        .filter(|codename| **codename != entry.distribution)
        .filter(|codename| match (codenames.rank(codename), current) {
            (Some(rank), Some(current)) => rank > current,
            _ => true,
        })
        .cloned()
        .collect()
}
