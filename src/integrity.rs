use std::collections::HashMap;
use std::fmt;

use anyhow::{anyhow, Result};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};
use serde::Deserialize;
use sha2::Digest;

use crate::errors::CorepackError;

/// Digest algorithms accepted in integrity suffixes and SRI strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha1,
    Sha224,
    Sha256,
    Sha512,
}

impl HashAlgo {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sha1" => Some(HashAlgo::Sha1),
            "sha224" => Some(HashAlgo::Sha224),
            "sha256" => Some(HashAlgo::Sha256),
            "sha512" => Some(HashAlgo::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha224 => "sha224",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Sha512 => "sha512",
        }
    }
}

/// An expected digest over an artifact's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integrity {
    pub algo: HashAlgo,
    pub digest: Vec<u8>,
}

impl Integrity {
    /// Parses the `<algo>.<hex>` form used in version suffixes
    /// (`yarn@1.22.4+sha1.deadbeef`).
    pub fn from_suffix(raw: &str) -> Result<Self> {
        let (algo, hex_digest) = raw
            .split_once('.')
            .ok_or_else(|| CorepackError::SpecSyntax { raw: raw.to_string() })?;
        let algo = HashAlgo::parse(algo)
            .ok_or_else(|| CorepackError::SpecSyntax { raw: raw.to_string() })?;
        let digest = hex::decode(hex_digest)
            .map_err(|_| CorepackError::SpecSyntax { raw: raw.to_string() })?;
        Ok(Integrity { algo, digest })
    }

    /// Parses the `<algo>-<base64>` SRI form returned by the registry.
    pub fn from_sri(raw: &str) -> Result<Self> {
        let (algo, b64) = raw
            .split_once('-')
            .ok_or_else(|| anyhow!("malformed integrity string '{}'", raw))?;
        let algo = HashAlgo::parse(algo)
            .ok_or_else(|| anyhow!("unsupported integrity algorithm '{}'", algo))?;
        let digest = BASE64_STANDARD
            .decode(b64)
            .map_err(|e| anyhow!("malformed integrity string '{}': {}", raw, e))?;
        Ok(Integrity { algo, digest })
    }

    pub fn to_sri(&self) -> String {
        format!("{}-{}", self.algo.as_str(), BASE64_STANDARD.encode(&self.digest))
    }

    pub fn to_suffix(&self) -> String {
        format!("{}.{}", self.algo.as_str(), hex::encode(&self.digest))
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sri())
    }
}

/// Hashes a download incrementally while it streams to disk.
pub struct StreamingHasher {
    inner: HasherKind,
}

enum HasherKind {
    Sha1(sha1::Sha1),
    Sha224(sha2::Sha224),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl StreamingHasher {
    pub fn new(algo: HashAlgo) -> Self {
        let inner = match algo {
            HashAlgo::Sha1 => HasherKind::Sha1(sha1::Sha1::new()),
            HashAlgo::Sha224 => HasherKind::Sha224(sha2::Sha224::new()),
            HashAlgo::Sha256 => HasherKind::Sha256(sha2::Sha256::new()),
            HashAlgo::Sha512 => HasherKind::Sha512(sha2::Sha512::new()),
        };
        StreamingHasher { inner }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.inner {
            HasherKind::Sha1(h) => h.update(chunk),
            HasherKind::Sha224(h) => h.update(chunk),
            HasherKind::Sha256(h) => h.update(chunk),
            HasherKind::Sha512(h) => h.update(chunk),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        match self.inner {
            HasherKind::Sha1(h) => h.finalize().to_vec(),
            HasherKind::Sha224(h) => h.finalize().to_vec(),
            HasherKind::Sha256(h) => h.finalize().to_vec(),
            HasherKind::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Compares an observed digest against the expected one. The messages use
/// SRI notation on both sides so mismatches are easy to diff.
pub fn verify_digest(expected: &Integrity, actual: &[u8]) -> Result<()> {
    if expected.digest != actual {
        let got = Integrity {
            algo: expected.algo,
            digest: actual.to_vec(),
        };
        return Err(CorepackError::HashMismatch {
            expected: expected.to_sri(),
            actual: got.to_sri(),
        }
        .into());
    }
    Ok(())
}

/// A trusted registry signing key: base64 SPKI document plus the keyid the
/// registry uses to reference it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TrustedKey {
    pub keyid: String,
    pub key: String,
}

/// Key material selected by `COREPACK_INTEGRITY_KEYS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Variable unset: the compiled-in registry keys apply.
    Builtin,
    /// Empty string or `0`: signature checking is skipped entirely.
    Disabled,
    /// JSON object: these keys apply exclusively. `{}` trusts nothing and
    /// rejects every signed artifact.
    Custom(HashMap<String, Vec<TrustedKey>>),
}

/// Registry signing keys shipped with the binary, keyed by key set name.
/// Same shape as the `COREPACK_INTEGRITY_KEYS` override.
pub const BUILTIN_KEYS: &str = r#"{
  "npm": [
    {
      "keyid": "SHA256:jl3bwswu80PjjokCgh0o2w5c2U4LhQAE57gj9cz1kzA",
      "key": "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAE1Olb3zMAFFxXKHiIkQO5cJ3Yhl5i6UPp+IhuteBJbuHcA5UogKo0EWtlWwW6KSaKoTNEYL7JlCQiVnkhBktUgg=="
    },
    {
      "keyid": "SHA256:DhQ8wR5APBvFHLF/+Tc+AYvPOdTpcIDqOhxsBHRwC7U",
      "key": "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEY6Ya7W++7aUPzvMTrezH6Ycx3c+HOKYCcNGybJZSCJq/fd7Qa8uuAKtdIkUQtQiEKERhAmE5lMMJhP8OkDOa2g=="
    }
  ]
}"#;

/// A `{keyid, sig}` pair from the registry's `dist.signatures` array.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySignature {
    pub keyid: String,
    pub sig: String,
}

/// Verifies the registry's detached signatures over
/// `<package>@<version>:<integrity>`.
///
/// Artifacts without signatures pass: the check only rejects when a
/// signature exists but no trusted key can validate it. Callers bypass
/// this entirely when the project pinned its own integrity suffix.
pub fn verify_signatures(
    policy: &KeyPolicy,
    package: &str,
    version: &str,
    integrity: &str,
    signatures: &[RegistrySignature],
) -> Result<()> {
    let keys: HashMap<String, Vec<TrustedKey>> = match policy {
        KeyPolicy::Disabled => return Ok(()),
        KeyPolicy::Builtin => serde_json::from_str(BUILTIN_KEYS)?,
        KeyPolicy::Custom(keys) => keys.clone(),
    };
    if signatures.is_empty() {
        return Ok(());
    }
    let trusted: Vec<&TrustedKey> = keys.values().flatten().collect();
    let message = format!("{}@{}:{}", package, version, integrity);
    for signature in signatures {
        let Some(key) = trusted.iter().find(|k| k.keyid == signature.keyid) else {
            continue;
        };
        let point = decode_spki(&key.key)?;
        let sig = BASE64_STANDARD
            .decode(&signature.sig)
            .map_err(|_| CorepackError::SignatureMismatch)?;
        let verifier = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, &point);
        verifier
            .verify(message.as_bytes(), &sig)
            .map_err(|_| CorepackError::SignatureMismatch)?;
        return Ok(());
    }
    Err(CorepackError::NoCompatibleSignature.into())
}

// ASN.1 header of a SubjectPublicKeyInfo document for an uncompressed
// P-256 point; registry keys are published in this form.
const SPKI_P256_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

/// Extracts the raw 65-byte curve point from a base64 SPKI key document.
fn decode_spki(key: &str) -> Result<Vec<u8>> {
    let der = BASE64_STANDARD
        .decode(key)
        .map_err(|e| anyhow!("malformed public key: {}", e))?;
    if der.len() == SPKI_P256_PREFIX.len() + 65 && der[..SPKI_P256_PREFIX.len()] == SPKI_P256_PREFIX
    {
        return Ok(der[SPKI_P256_PREFIX.len()..].to_vec());
    }
    if der.len() == 65 && der[0] == 0x04 {
        return Ok(der);
    }
    Err(anyhow!("unsupported public key format"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

    fn test_keypair() -> (EcdsaKeyPair, String) {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        let mut spki = SPKI_P256_PREFIX.to_vec();
        spki.extend_from_slice(pair.public_key().as_ref());
        let key = BASE64_STANDARD.encode(&spki);
        (pair, key)
    }

    fn policy_with(keyid: &str, key: String) -> KeyPolicy {
        let mut map = HashMap::new();
        map.insert(
            "npm".to_string(),
            vec![TrustedKey {
                keyid: keyid.to_string(),
                key,
            }],
        );
        KeyPolicy::Custom(map)
    }

    #[test]
    fn suffix_round_trip() {
        let integrity = Integrity::from_suffix("sha1.deadbeef").unwrap();
        assert_eq!(integrity.algo, HashAlgo::Sha1);
        assert_eq!(integrity.to_suffix(), "sha1.deadbeef");
    }

    #[test]
    fn rejects_unknown_algorithm() {
        assert!(Integrity::from_suffix("md5.deadbeef").is_err());
        assert!(Integrity::from_sri("md5-3q2+7w==").is_err());
    }

    #[test]
    fn parses_sri_strings() {
        let sri =
            Integrity::from_sri("sha256-uqWglk0zIPvAxqkiFARTyFE+okq4/QV3A0gEqWckgJY=").unwrap();
        assert_eq!(sri.algo, HashAlgo::Sha256);
        assert_eq!(sri.digest.len(), 32);
        assert!(Integrity::from_suffix("sha512.not-hex").is_err());
    }

    #[test]
    fn digest_mismatch_is_fatal() {
        let expected = Integrity {
            algo: HashAlgo::Sha256,
            digest: vec![0u8; 32],
        };
        let err = verify_digest(&expected, &[1u8; 32]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Mismatch hashes"));
    }

    #[test]
    fn matching_digest_passes() {
        let mut hasher = StreamingHasher::new(HashAlgo::Sha256);
        hasher.update(b"hello ");
        hasher.update(b"world");
        let digest = hasher.finish();
        let expected = Integrity {
            algo: HashAlgo::Sha256,
            digest: digest.clone(),
        };
        verify_digest(&expected, &digest).unwrap();
    }

    #[test]
    fn accepts_valid_signature() {
        let (pair, key) = test_keypair();
        let rng = SystemRandom::new();
        let message = "npm@10.9.2:sha512-AAAA";
        let sig = pair.sign(&rng, message.as_bytes()).unwrap();
        let signatures = vec![RegistrySignature {
            keyid: "test-key".to_string(),
            sig: BASE64_STANDARD.encode(sig.as_ref()),
        }];
        let policy = policy_with("test-key", key);
        verify_signatures(&policy, "npm", "10.9.2", "sha512-AAAA", &signatures).unwrap();
    }

    #[test]
    fn rejects_tampered_signature() {
        let (pair, key) = test_keypair();
        let rng = SystemRandom::new();
        let sig = pair.sign(&rng, b"npm@10.9.2:sha512-AAAA").unwrap();
        let signatures = vec![RegistrySignature {
            keyid: "test-key".to_string(),
            sig: BASE64_STANDARD.encode(sig.as_ref()),
        }];
        let policy = policy_with("test-key", key);
        let err = verify_signatures(&policy, "npm", "10.9.2", "sha512-BBBB", &signatures)
            .unwrap_err();
        assert!(err.to_string().contains("Signature does not match"));
    }

    #[test]
    fn empty_key_set_rejects_signed_artifacts() {
        let policy = KeyPolicy::Custom(HashMap::new());
        let signatures = vec![RegistrySignature {
            keyid: "unknown".to_string(),
            sig: "AAAA".to_string(),
        }];
        let err = verify_signatures(&policy, "npm", "1.0.0", "sha512-AAAA", &signatures)
            .unwrap_err();
        assert!(err.to_string().contains("No compatible signature found"));
    }

    #[test]
    fn disabled_policy_skips_everything() {
        let signatures = vec![RegistrySignature {
            keyid: "unknown".to_string(),
            sig: "not even base64".to_string(),
        }];
        verify_signatures(&KeyPolicy::Disabled, "npm", "1.0.0", "x", &signatures).unwrap();
    }

    #[test]
    fn unsigned_artifacts_pass() {
        verify_signatures(&KeyPolicy::Builtin, "npm", "1.0.0", "sha512-AAAA", &[]).unwrap();
    }
}
