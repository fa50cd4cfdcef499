// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Locally trusted keys.

The trusted keyring is read by running a listing command (`apt-key list` by
default) and scraping key IDs and fingerprints from its output. The classic
`pub rsa4096/<key id>` layout, bare fingerprint lines, and gpg's
`--with-colons` records are all understood.

A key ID is trusted when a listed ID or fingerprint ends with it, so short and
long IDs match full fingerprints.
*/

use {
    crate::{
        error::{AptSourcesError, Result},
        signature::KeyIdentity,
    },
    log::{info, warn},
    once_cell::sync::Lazy,
    regex::Regex,
    std::collections::BTreeSet,
};

/// Default command listing trusted keys.
pub const DEFAULT_LIST_COMMAND: &[&str] = &["apt-key", "list"];

/// Default keyserver to import keys from.
pub const DEFAULT_KEYSERVER: &str = "keyserver.ubuntu.com";

static CLASSIC_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:pub|sub)\s+\S*/([0-9A-Fa-f]{8,})")
        .expect("key regular expression should compile")
});

static COLON_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:pub|sub):[^:]*:[^:]*:[^:]*:([0-9A-Fa-f]{8,}):")
        .expect("key regular expression should compile")
});

static COLON_FINGERPRINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^fpr:(?:[^:]*:){8}([0-9A-Fa-f]{16,})")
        .expect("fingerprint regular expression should compile")
});

static FINGERPRINT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:Key fingerprint = )?((?:[0-9A-Fa-f]{4}\s*){10})$")
        .expect("fingerprint regular expression should compile")
});

fn normalize(key_id: &str) -> String {
    key_id
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Key IDs and fingerprints of locally trusted keys.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrustedKeys {
    ids: BTreeSet<String>,
}

impl TrustedKeys {
    /// Scrape keys from the output of a keyring listing command.
    pub fn parse(listing: &str) -> Self {
        let ids = [&CLASSIC_KEY, &COLON_KEY, &COLON_FINGERPRINT, &FINGERPRINT_LINE]
            .iter()
            .flat_map(|re| {
                re.captures_iter(listing)
                    .map(|caps| normalize(&caps[1]))
                    .collect::<Vec<_>>()
            })
            .collect();

        Self { ids }
    }

    /// Run a command and parse its output.
    pub fn from_command(command: &[impl AsRef<str>]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AptSourcesError::Other("empty keyring listing command".to_string()))?;

        let output = duct::cmd(
            program.as_ref(),
            args.iter().map(|a| a.as_ref()).collect::<Vec<_>>(),
        )
        .env("LC_ALL", "C")
        .stderr_null()
        .stdout_capture()
        .unchecked()
        .run()?;

        if !output.status.success() {
            return Err(AptSourcesError::CommandFailed(
                program.as_ref().to_string(),
                format!("{}", output.status),
            ));
        }

        let keys = Self::parse(&String::from_utf8_lossy(&output.stdout));
        info!("{} trusted keys found", keys.len());

        Ok(keys)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether a key ID is trusted.
    pub fn contains(&self, key_id: &str) -> bool {
        let key_id = normalize(key_id);

        !key_id.is_empty() && self.ids.iter().any(|id| id.ends_with(&key_id))
    }
}

/// Identified key IDs that are not trusted, sorted and deduplicated.
///
/// Absent identities and identities without a key ID are never reported.
pub fn missing_keys<'a>(
    identities: impl IntoIterator<Item = &'a Option<KeyIdentity>>,
    trusted: &TrustedKeys,
) -> Vec<String> {
    identities
        .into_iter()
        .flatten()
        .filter(|identity| identity.is_identified() && !trusted.contains(&identity.key_id))
        .map(|identity| identity.key_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Import a key from a keyserver into the APT keyring.
pub fn import_key(keyserver: &str, key_id: &str) -> Result<()> {
    info!("importing key {} from {}", key_id, keyserver);

    let output = duct::cmd(
        "apt-key",
        [
            "adv",
            "--batch",
            "--recv-keys",
            "--keyserver",
            keyserver,
            key_id,
        ],
    )
    .stderr_to_stdout()
    .stdout_capture()
    .unchecked()
    .run()?;

    if output.status.success() {
        Ok(())
    } else {
        let message = String::from_utf8_lossy(&output.stdout).trim().to_string();
        warn!("importing key {} failed: {}", key_id, message);

        Err(AptSourcesError::CommandFailed(
            format!("apt-key adv --recv-keys {}", key_id),
            message,
        ))
    }
}
