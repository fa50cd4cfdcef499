// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Directory listing scraping.

Many repository web servers render an index page for directories. For the
`dists/` directory of a repository, the sub-directories linked from that page
are the published distributions.

This is a heuristic, not an HTML parser. `href` values of anchor tags are
collected and kept if they look like a relative link to a sub-directory:
not a query (`?C=N;O=D`), not absolute (`/`), not the parent (`../`), not a
full URL, and ending with `/`. Listings in other formats yield partial or
empty results and callers must tolerate that.
*/

use {
    crate::{error::Result, transport::RepositoryTransport},
    log::debug,
    once_cell::sync::Lazy,
    regex::Regex,
    std::collections::HashSet,
};

static ANCHOR_HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']?([^"' >]+)["']?[^>]*>"#)
        .expect("anchor regular expression should compile")
});

/// Extract sub-directory names from a directory listing page.
///
/// Names are returned in document order with duplicates removed.
pub fn parse_directory_listing(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();

    ANCHOR_HREF
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|href| {
            !href.starts_with('?')
                && !href.starts_with('/')
                && !href.contains("://")
                && *href != "../"
                && href.ends_with('/')
        })
        .map(|href| href.trim_end_matches('/').to_string())
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect()
}

/// Fetch a directory listing and extract its sub-directory names.
///
/// Any failure to fetch the page is returned as an error. A page that could
/// be fetched but contained no recognizable links yields an empty list.
pub async fn fetch_directory_listing(
    transport: &dyn RepositoryTransport,
    url: &str,
) -> Result<Vec<String>> {
    let body = transport.fetch(url).await?;
    let names = parse_directory_listing(&String::from_utf8_lossy(&body));

    debug!("listing {} yielded {} entries", url, names.len());

    Ok(names)
}
