// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Audit configuration.

An [AuditConfig] can be loaded from YAML. Every key is optional. e.g.

```yaml
whitelist: [stable, unstable, syncthing]
max_parallel_probes: 8
probe_timeout_seconds: 10
```
*/

use {
    crate::{
        codename::{CodenameTable, Whitelist},
        error::{AptSourcesError, Result},
        keyring::{DEFAULT_KEYSERVER, DEFAULT_LIST_COMMAND},
        source_list::DEFAULT_SOURCE_PATHS,
    },
    serde::{Deserialize, Serialize},
    std::{path::PathBuf, time::Duration},
};

/// Default number of concurrently audited entries.
///
/// The CPU count clamped to `4..=16`. Probing is network bound so this is a
/// floor rather than a measure of local capacity.
pub fn default_parallelism() -> usize {
    num_cpus::get().clamp(4, 16)
}

/// Configuration of an audit run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuditConfig {
    /// Known codenames, oldest first.
    pub codenames: CodenameTable,

    /// Codenames never reported as mismatches.
    pub whitelist: Whitelist,

    /// Glob patterns of sources list files.
    pub source_paths: Vec<String>,

    /// Maximum number of entries audited concurrently.
    pub max_parallel_probes: usize,

    /// Timeout of individual HTTP requests.
    pub probe_timeout_seconds: u64,

    /// Whether to resolve signing key identities.
    pub resolve_keys: bool,

    /// Inspect signatures with the `gpg` executable instead of in-process.
    pub use_gpg: bool,

    /// `gpg` executable to run when `use_gpg` is set.
    pub gpg_program: String,

    /// File signatures are checked against by `gpg`.
    pub signature_reference_path: PathBuf,

    /// Command listing trusted keys.
    pub keyring_list_command: Vec<String>,

    /// Keyserver missing keys are imported from.
    pub keyserver: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            codenames: CodenameTable::default(),
            whitelist: Whitelist::default(),
            source_paths: DEFAULT_SOURCE_PATHS.iter().map(|s| s.to_string()).collect(),
            max_parallel_probes: default_parallelism(),
            probe_timeout_seconds: 5,
            resolve_keys: true,
            use_gpg: false,
            gpg_program: "gpg".to_string(),
            signature_reference_path: PathBuf::from("/dev/null"),
            keyring_list_command: DEFAULT_LIST_COMMAND.iter().map(|s| s.to_string()).collect(),
            keyserver: DEFAULT_KEYSERVER.to_string(),
        }
    }
}

impl AuditConfig {
    /// Parse YAML configuration.
    pub fn from_yaml_reader(reader: impl std::io::Read) -> Result<Self> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    /// Load YAML configuration from a file.
    pub fn from_yaml_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path)
            .map_err(|e| AptSourcesError::IoPath(format!("{}", path.display()), e))?;

        Self::from_yaml_reader(f)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}
