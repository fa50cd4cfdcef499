// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signer identity of detached release signatures.

A repository's `Release.gpg` is a detached PGP signature over its `Release`
file. We don't verify it. We only want to know which key made it, so the key
can be compared against the local keyring.

[SignatureInspector] turns raw signature bytes into a gpg style informational
banner such as

```text
gpg: Signature made Sat 20 Nov 2021 08:57:21 UTC using RSA key ID 648ACFD622F3D138
```

[GpgSignatureInspector] obtains that banner by running `gpg --verify` against
an unrelated local file, so verification fails but the banner naming the signer
is still printed. [PgpSignatureInspector] produces the same banner in-process
with the `pgp` crate. [KeyIdentity::from_inspector_output()] parses either.
*/

use {
    crate::error::{AptSourcesError, Result},
    async_trait::async_trait,
    log::warn,
    once_cell::sync::Lazy,
    pgp::{crypto::PublicKeyAlgorithm, Deserializable, StandaloneSignature},
    regex::Regex,
    serde::{Deserialize, Serialize},
    std::{ffi::OsString, fmt::Write, io::Cursor, path::PathBuf, sync::Arc, time::Duration},
};

/// Default bound on the duration of a `gpg` invocation.
pub const DEFAULT_GPG_TIMEOUT: Duration = Duration::from_secs(30);

/// Single line banner printed by gpg 1.x and emitted by [PgpSignatureInspector].
static BANNER_CLASSIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Signature made ([^\r\n]+?) using (\S+) key ID ([0-9A-Fa-f]+)")
        .expect("banner regular expression should compile")
});

/// Two line banner printed by gpg 2.1 and newer.
static BANNER_MODERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Signature made ([^\r\n]+?)\s*\r?\n(?:gpg:)?\s+using (\S+) key ([0-9A-Fa-f]+)")
        .expect("banner regular expression should compile")
});

/// Identity of the key that signed a repository's release metadata.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyIdentity {
    /// Signature creation time, as printed.
    pub signed_at: String,
    /// Public key algorithm, e.g. `RSA`.
    pub key_type: String,
    /// Hex key ID. Empty if the signer could not be determined.
    pub key_id: String,
    /// Full inspector output.
    pub raw: String,
}

impl KeyIdentity {
    /// Parse the banner from inspector output.
    ///
    /// The first signature banner wins. If no banner is found, the returned
    /// instance has an empty `key_id` and retains the output in `raw`.
    pub fn from_inspector_output(output: &str) -> Self {
        let caps = BANNER_CLASSIC
            .captures(output)
            .or_else(|| BANNER_MODERN.captures(output));

        match caps {
            Some(caps) => Self {
                signed_at: caps[1].trim().to_string(),
                key_type: caps[2].to_string(),
                key_id: caps[3].to_uppercase(),
                raw: output.to_string(),
            },
            None => Self::unidentified(output),
        }
    }

    /// An identity whose signer is unknown.
    pub fn unidentified(raw: impl ToString) -> Self {
        Self {
            raw: raw.to_string(),
            ..Default::default()
        }
    }

    /// Whether the signing key was identified.
    pub fn is_identified(&self) -> bool {
        !self.key_id.is_empty()
    }
}

/// Produces signer metadata text from a detached signature.
#[async_trait]
pub trait SignatureInspector: Send + Sync {
    async fn inspect(&self, signature: &[u8]) -> Result<String>;
}

fn algorithm_name(algorithm: PublicKeyAlgorithm) -> String {
    match algorithm {
        PublicKeyAlgorithm::RSA | PublicKeyAlgorithm::RSASign | PublicKeyAlgorithm::RSAEncrypt => {
            "RSA".to_string()
        }
        PublicKeyAlgorithm::DSA => "DSA".to_string(),
        PublicKeyAlgorithm::ECDSA => "ECDSA".to_string(),
        PublicKeyAlgorithm::EdDSA => "EDDSA".to_string(),
        other => format!("{:?}", other),
    }
}

/// Parse all signatures in ASCII armored or binary form.
fn parse_signatures(data: &[u8]) -> Result<Vec<StandaloneSignature>> {
    let armored = String::from_utf8_lossy(data)
        .trim_start()
        .starts_with("-----BEGIN PGP SIGNATURE-----");

    let signatures = if armored {
        let (signatures, _) = StandaloneSignature::from_armor_many(Cursor::new(data))?;
        signatures.collect::<pgp::errors::Result<Vec<_>>>()?
    } else {
        StandaloneSignature::from_bytes_many(Cursor::new(data))
            .collect::<pgp::errors::Result<Vec<_>>>()?
    };

    if signatures.is_empty() {
        Err(AptSourcesError::SignatureInspection(
            "no PGP signatures found".to_string(),
        ))
    } else {
        Ok(signatures)
    }
}

/// Pure Rust inspector using the `pgp` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct PgpSignatureInspector;

#[async_trait]
impl SignatureInspector for PgpSignatureInspector {
    async fn inspect(&self, signature: &[u8]) -> Result<String> {
        let mut output = String::new();

        for sig in parse_signatures(signature)? {
            let sig = sig.signature;

            let created = sig
                .created()
                .map(|t| t.format("%a %d %b %Y %H:%M:%S %Z").to_string())
                .unwrap_or_else(|| "(unknown time)".to_string());

            match sig.issuer() {
                Some(issuer) => writeln!(
                    output,
                    "gpg: Signature made {} using {} key ID {}",
                    created,
                    algorithm_name(sig.config.pub_alg),
                    hex::encode_upper(issuer.as_ref())
                ),
                None => writeln!(
                    output,
                    "gpg: Signature made {} without issuer key ID",
                    created
                ),
            }
            .map_err(|e| AptSourcesError::SignatureInspection(e.to_string()))?;
        }

        Ok(output)
    }
}

/// Inspector running the `gpg` executable.
#[derive(Clone, Debug)]
pub struct GpgSignatureInspector {
    program: String,
    reference_path: PathBuf,
    timeout: Duration,
}

impl Default for GpgSignatureInspector {
    fn default() -> Self {
        Self::new("gpg", "/dev/null")
    }
}

impl GpgSignatureInspector {
    /// Construct an instance.
    ///
    /// `reference_path` is the file the signature is checked against. Its
    /// content is irrelevant.
    pub fn new(program: impl ToString, reference_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.to_string(),
            reference_path: reference_path.into(),
            timeout: DEFAULT_GPG_TIMEOUT,
        }
    }

    /// Set the bound on how long `gpg` may run.
    ///
    /// The process is killed once it is exceeded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SignatureInspector for GpgSignatureInspector {
    async fn inspect(&self, signature: &[u8]) -> Result<String> {
        let args = vec![
            OsString::from("--batch"),
            OsString::from("--verify"),
            OsString::from("-"),
            self.reference_path.clone().into_os_string(),
        ];
        let data = signature.to_vec();

        // gpg exits non-zero because verification fails. Only its output matters.
        let handle = Arc::new(
            duct::cmd(&self.program, args)
                .env("LC_ALL", "C")
                .stdin_bytes(data)
                .stderr_to_stdout()
                .stdout_capture()
                .unchecked()
                .start()?,
        );

        let waiter = handle.clone();
        let wait = tokio::task::spawn_blocking(move || waiter.wait().map(|output| output.clone()));

        let output = match tokio::time::timeout(self.timeout, wait).await {
            Ok(joined) => joined
                .map_err(|e| AptSourcesError::SignatureInspection(format!("{:?}", e)))??,
            Err(_) => {
                if let Err(e) = handle.kill() {
                    warn!("unable to kill {}: {}", self.program, e);
                }

                return Err(AptSourcesError::SignatureInspection(format!(
                    "{} did not finish within {:?}",
                    self.program, self.timeout
                )));
            }
        };

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        chrono::SubsecRound,
        indoc::indoc,
        pgp::{
            crypto::{HashAlgorithm, SymmetricKeyAlgorithm},
            packet::{SignatureConfig, SignatureType, Subpacket},
            ser::Serialize as _,
            types::{CompressionAlgorithm, KeyTrait, KeyVersion, PublicKeyTrait, SecretKeyTrait},
            KeyType, SecretKeyParamsBuilder, SignedSecretKey,
        },
        smallvec::{smallvec, SmallVec},
        std::time::Instant,
    };

    fn signing_key() -> SignedSecretKey {
        let mut params = SecretKeyParamsBuilder::default();
        params
            .key_type(KeyType::Rsa(2048))
            .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
            .preferred_hash_algorithms(smallvec![HashAlgorithm::SHA2_256])
            .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
            .can_create_certificates(false)
            .can_sign(true)
            .primary_user_id("Archive Signer <archive@example.org>".to_string());

        params
            .build()
            .unwrap()
            .generate()
            .unwrap()
            .sign(String::new)
            .unwrap()
    }

    /// Produce a detached signature over `data` like a `Release.gpg`.
    fn detached_signature(key: &SignedSecretKey, data: &[u8]) -> StandaloneSignature {
        let config = SignatureConfig::new_v4(
            Default::default(),
            SignatureType::Binary,
            key.algorithm(),
            HashAlgorithm::SHA2_256,
            vec![
                Subpacket::IssuerFingerprint(
                    KeyVersion::V4,
                    SmallVec::from_slice(&key.fingerprint()),
                ),
                Subpacket::SignatureCreationTime(chrono::Utc::now().trunc_subsecs(0)),
            ],
            vec![Subpacket::Issuer(key.key_id())],
        );

        StandaloneSignature::new(config.sign(key, String::new, Cursor::new(data)).unwrap())
    }

    fn gpg_available() -> bool {
        duct::cmd("gpg", ["--version"])
            .stdout_null()
            .stderr_null()
            .run()
            .is_ok()
    }

    #[test]
    fn classic_banner() {
        let output = indoc! {"
            gpg: Signature made Thu Jun 10 12:00:00 2010 UTC using DSA key ID 437D05B5
            gpg: Can't check signature: public key not found
        "};

        let identity = KeyIdentity::from_inspector_output(output);
        assert_eq!(identity.signed_at, "Thu Jun 10 12:00:00 2010 UTC");
        assert_eq!(identity.key_type, "DSA");
        assert_eq!(identity.key_id, "437D05B5");
        assert_eq!(identity.raw, output);
        assert!(identity.is_identified());
    }

    #[test]
    fn modern_banner() {
        let output = indoc! {"
            gpg: Signature made Thu 23 Apr 2020 05:34:17 PM UTC
            gpg:                using RSA key 871920d1991bc93c
            gpg: Can't check signature: No public key
        "};

        let identity = KeyIdentity::from_inspector_output(output);
        assert_eq!(identity.signed_at, "Thu 23 Apr 2020 05:34:17 PM UTC");
        assert_eq!(identity.key_type, "RSA");
        assert_eq!(identity.key_id, "871920D1991BC93C");
    }

    #[test]
    fn unrecognized_output() {
        let identity = KeyIdentity::from_inspector_output("gpg: no valid OpenPGP data found.\n");

        assert!(!identity.is_identified());
        assert_eq!(identity.key_id, "");
        assert_eq!(identity.raw, "gpg: no valid OpenPGP data found.\n");
    }

    #[tokio::test]
    async fn pgp_rejects_garbage() {
        assert!(PgpSignatureInspector
            .inspect(b"this is not a signature")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn pgp_identifies_signer() -> Result<()> {
        let key = signing_key();
        let key_id = hex::encode_upper(key.key_id().as_ref());
        let signature = detached_signature(&key, b"Release content");

        let armored = signature.to_armored_bytes(None)?;
        assert!(armored.starts_with(b"-----BEGIN PGP SIGNATURE-----"));

        let mut binary = Vec::new();
        signature.to_writer(&mut binary)?;

        for data in [armored, binary] {
            let output = PgpSignatureInspector.inspect(&data).await?;
            let identity = KeyIdentity::from_inspector_output(&output);

            assert!(identity.is_identified());
            assert_eq!(identity.key_type, "RSA");
            assert_eq!(identity.key_id, key_id);
            assert_eq!(identity.raw, output);
        }

        Ok(())
    }

    #[tokio::test]
    async fn gpg_identifies_signer() -> Result<()> {
        if !gpg_available() {
            eprintln!("gpg not found; skipping");
            return Ok(());
        }

        let home = tempfile::tempdir()?;
        let key = signing_key();
        let key_id = hex::encode_upper(key.key_id().as_ref());
        let armored = detached_signature(&key, b"Release content").to_armored_bytes(None)?;

        // Keep gpg away from the invoking user's keyring.
        std::env::set_var("GNUPGHOME", home.path());

        let output = GpgSignatureInspector::default().inspect(&armored).await?;
        let identity = KeyIdentity::from_inspector_output(&output);

        assert!(identity.is_identified(), "{}", output);
        assert_eq!(identity.key_type, "RSA");
        // gpg 2.2+ prints the full fingerprint, which ends with the key ID.
        assert!(identity.key_id.ends_with(&key_id), "{}", output);

        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gpg_is_killed_after_timeout() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir()?;
        let program = temp_dir.path().join("slow-gpg");
        std::fs::write(&program, "#!/bin/sh\nexec sleep 30\n")?;
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755))?;

        let inspector = GpgSignatureInspector::new(program.display(), "/dev/null")
            .with_timeout(Duration::from_millis(200));

        let start = Instant::now();
        let res = inspector.inspect(b"signature").await;

        assert!(matches!(res, Err(AptSourcesError::SignatureInspection(_))));
        assert!(start.elapsed() < Duration::from_secs(10));

        Ok(())
    }
}
