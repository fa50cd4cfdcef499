// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum AptSourcesError {
    #[cfg(feature = "http")]
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("glob pattern error: {0:?}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("bad HTTP status code {1} fetching {0}")]
    HttpStatus(String, u16),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("source line parse error: {0}")]
    SourceLineParse(String),

    #[error("signature inspection failed: {0}")]
    SignatureInspection(String),

    #[error("command `{0}` failed: {1}")]
    CommandFailed(String, String),

    #[error("unable to determine the host distribution codename")]
    HostCodenameUnknown,

    #[error("{0}")]
    Other(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, AptSourcesError>;
