// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! APT one-line style sources list parsing.

Lines in `sources.list` files have the form

```text
deb [ option1=value1 option2=value2 ] uri suite [component1] [component2] [...]
deb-src uri suite [component1] [component2] [...]
```

The bracketed options are optional. [SourceLine] makes that distinction
explicit: [SourceLine::Simple] has no options and [SourceLine::WithAttributes]
carries the raw bracket content. Either converts to a [SourceEntry], which
is what the rest of the crate operates on.

Only lines beginning with `deb ` or `deb-src ` are considered. Commented out
lines are ignored. This is not a validator: lines that cannot be tokenized are
reported and skipped.
*/

use {
    crate::error::{AptSourcesError, Result},
    log::warn,
    serde::Serialize,
    std::{
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
        str::FromStr,
    },
};

/// Default locations of sources list files.
pub const DEFAULT_SOURCE_PATHS: &[&str] =
    &["/etc/apt/sources.list", "/etc/apt/sources.list.d/*.list"];

/// The archive type of a source entry.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum SourceType {
    #[serde(rename = "deb")]
    Deb,
    #[serde(rename = "deb-src")]
    DebSrc,
}

impl Display for SourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Deb => "deb",
            Self::DebSrc => "deb-src",
        })
    }
}

impl FromStr for SourceType {
    type Err = AptSourcesError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deb" => Ok(Self::Deb),
            "deb-src" => Ok(Self::DebSrc),
            _ => Err(AptSourcesError::SourceLineParse(format!(
                "unknown archive type: {}",
                s
            ))),
        }
    }
}

/// A tokenized sources list line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceLine<'a> {
    /// A line without an options bracket.
    Simple {
        source_type: SourceType,
        url: &'a str,
        distribution: &'a str,
        components: Vec<&'a str>,
    },
    /// A line with an options bracket.
    WithAttributes {
        source_type: SourceType,
        /// Content between `[` and `]`, trimmed.
        attributes: &'a str,
        url: &'a str,
        distribution: &'a str,
        components: Vec<&'a str>,
    },
}

impl<'a> SourceLine<'a> {
    /// Tokenize a line.
    ///
    /// Returns `Ok(None)` if the line is not a `deb`/`deb-src` line, such as a
    /// comment or a blank line.
    pub fn parse(line: &'a str) -> Result<Option<Self>> {
        let line = match line.find('#') {
            Some(pos) => &line[0..pos],
            None => line,
        }
        .trim();

        let (source_type, rest) = match line.split_once(|c: char| c.is_ascii_whitespace()) {
            Some((t, rest)) if t == "deb" || t == "deb-src" => (SourceType::from_str(t)?, rest),
            _ => return Ok(None),
        };
        let rest = rest.trim_start();

        let (attributes, rest) = if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']').ok_or_else(|| {
                AptSourcesError::SourceLineParse(format!("unterminated options bracket: {}", line))
            })?;

            (Some(after[0..end].trim()), &after[end + 1..])
        } else {
            (None, rest)
        };

        let mut words = rest.split_ascii_whitespace();

        let url = words.next().ok_or_else(|| {
            AptSourcesError::SourceLineParse(format!("missing repository URL: {}", line))
        })?;
        let distribution = words.next().ok_or_else(|| {
            AptSourcesError::SourceLineParse(format!("missing distribution: {}", line))
        })?;
        let components = words.collect::<Vec<_>>();

        Ok(Some(match attributes {
            Some(attributes) => Self::WithAttributes {
                source_type,
                attributes,
                url,
                distribution,
                components,
            },
            None => Self::Simple {
                source_type,
                url,
                distribution,
                components,
            },
        }))
    }
}

/// A parsed repository reference.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SourceEntry {
    pub source_type: SourceType,
    /// Raw content of the options bracket, if present.
    pub attributes: Option<String>,
    /// Repository base URL. Trailing slashes are removed.
    pub url: String,
    pub distribution: String,
    pub components: Vec<String>,
}

impl<'a> From<SourceLine<'a>> for SourceEntry {
    fn from(line: SourceLine<'a>) -> Self {
        let (source_type, attributes, url, distribution, components) = match line {
            SourceLine::Simple {
                source_type,
                url,
                distribution,
                components,
            } => (source_type, None, url, distribution, components),
            SourceLine::WithAttributes {
                source_type,
                attributes,
                url,
                distribution,
                components,
            } => (
                source_type,
                Some(attributes.to_string()),
                url,
                distribution,
                components,
            ),
        };

        Self {
            source_type,
            attributes,
            url: url.trim_end_matches('/').to_string(),
            distribution: distribution.to_string(),
            components: components.into_iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl SourceEntry {
    /// Parse a single line into an entry.
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        Ok(SourceLine::parse(line)?.map(Self::from))
    }
}

impl Display for SourceEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source_type)?;
        if let Some(attributes) = &self.attributes {
            write!(f, " [{}]", attributes)?;
        }
        write!(f, " {} {}", self.url, self.distribution)?;
        for component in &self.components {
            write!(f, " {}", component)?;
        }

        Ok(())
    }
}

/// Where a [SourceEntry] was defined.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct SourceLocation {
    pub path: PathBuf,
    /// 1-based line number.
    pub line: usize,
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// A [SourceEntry] and where it came from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SourceRecord {
    pub location: SourceLocation,
    pub entry: SourceEntry,
}

/// Parse the content of a sources list file.
///
/// Lines that fail to parse are logged and skipped.
pub fn parse_sources_list(path: impl AsRef<Path>, data: &str) -> Vec<SourceRecord> {
    let path = path.as_ref();

    data.lines()
        .enumerate()
        .filter_map(|(i, line)| match SourceEntry::parse_line(line) {
            Ok(entry) => entry.map(|entry| SourceRecord {
                location: SourceLocation {
                    path: path.to_path_buf(),
                    line: i + 1,
                },
                entry,
            }),
            Err(e) => {
                warn!("{}:{}: ignoring line: {}", path.display(), i + 1, e);
                None
            }
        })
        .collect()
}

/// Read all sources list files matching glob patterns.
///
/// Files are read in pattern order and, within a pattern, in sorted path order.
pub fn read_sources_lists(
    patterns: impl IntoIterator<Item = impl AsRef<str>>,
) -> Result<Vec<SourceRecord>> {
    let mut records = vec![];

    for pattern in patterns {
        let mut paths = glob::glob(pattern.as_ref())?
            .filter_map(|p| match p {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("unable to read {}: {}", e.path().display(), e);
                    None
                }
            })
            .collect::<Vec<_>>();
        paths.sort();

        for path in paths {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| AptSourcesError::IoPath(format!("{}", path.display()), e))?;

            records.extend(parse_sources_list(&path, &data));
        }
    }

    Ok(records)
}
