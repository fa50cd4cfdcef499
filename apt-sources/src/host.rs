// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Host distribution detection. */

use {
    crate::error::{AptSourcesError, Result},
    log::debug,
    std::path::Path,
};

/// Location of the os-release file.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Extract the release codename from `os-release` content.
///
/// `VERSION_CODENAME` is preferred over `UBUNTU_CODENAME`.
pub fn codename_from_os_release(data: &str) -> Option<String> {
    let value = |key: &str| {
        data.lines()
            .filter_map(|line| line.trim().split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|v| !v.is_empty())
    };

    value("VERSION_CODENAME").or_else(|| value("UBUNTU_CODENAME"))
}

/// Determine the codename of the running distribution.
///
/// Reads `os_release_path` and falls back to `lsb_release -cs`.
pub fn host_codename(os_release_path: impl AsRef<Path>) -> Result<String> {
    let path = os_release_path.as_ref();

    match std::fs::read_to_string(path) {
        Ok(data) => {
            if let Some(codename) = codename_from_os_release(&data) {
                return Ok(codename);
            }
            debug!("no codename in {}", path.display());
        }
        Err(e) => {
            debug!("unable to read {}: {}", path.display(), e);
        }
    }

    let codename = duct::cmd("lsb_release", ["-cs"])
        .stderr_null()
        .read()
        .map_err(|_| AptSourcesError::HostCodenameUnknown)?;
    let codename = codename.trim();

    if codename.is_empty() || codename == "n/a" {
        Err(AptSourcesError::HostCodenameUnknown)
    } else {
        Ok(codename.to_string())
    }
}
