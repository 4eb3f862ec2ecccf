// src/hash.rs

//! Content digests and checksum verification
//!
//! Every Resource and Patch declares a digest. Fetched bytes are checked
//! against it before they are unpacked, applied or cached; a mismatch is a
//! hard stop and is never retried here.
//!
//! Supported algorithms:
//! - **SHA-256**: the default, matches upstream release checksums
//! - **XXH128**: fast non-cryptographic hash, accepted for locally produced artifacts
//!
//! Digests are written as `"<algo>:<hex>"`. A bare 64-character hex string is
//! read as SHA-256, which is how most formulas spell it.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_128;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Xxh128,
}

impl HashAlgorithm {
    /// Length of the hex encoding
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Xxh128 => 32,
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Xxh128 => "xxh128",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "xxh128" | "xxh3" => Ok(Self::Xxh128),
            other => Err(format!("unsupported algorithm '{other}' (supported: sha256, xxh128)")),
        }
    }
}

/// A declared or computed content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex
    pub value: String,
}

impl Digest {
    /// Parse `"sha256:<hex>"`, `"xxh128:<hex>"` or a bare SHA-256 hex string
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidDigest {
            digest: s.to_string(),
            reason,
        };

        let (algorithm, value) = match s.split_once(':') {
            Some((algo, hex)) => (algo.parse::<HashAlgorithm>().map_err(invalid)?, hex),
            None => (HashAlgorithm::Sha256, s),
        };

        if value.len() != algorithm.hex_len() {
            return Err(invalid(format!(
                "expected {} hex characters for {}, got {}",
                algorithm.hex_len(),
                algorithm,
                value.len()
            )));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("contains non-hex characters".to_string()));
        }

        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    /// Compute the digest of `data` with `algorithm`
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let value = match algorithm {
            HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
            HashAlgorithm::Xxh128 => format!("{:032x}", xxh3_128(data)),
        };
        Self { algorithm, value }
    }

    /// Format as `"<algo>:<hex>"`
    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm, self.value)
    }

    /// File name used for content-addressed storage
    pub fn cache_key(&self) -> String {
        format!("{}_{}", self.algorithm, self.value)
    }

    /// Check `data` against this digest
    ///
    /// `url` only feeds the error message so the caller can tell which
    /// resource or patch was rejected.
    pub fn verify(&self, url: &str, data: &[u8]) -> Result<()> {
        let actual = Self::compute(self.algorithm, data);
        if actual.value == self.value {
            Ok(())
        } else {
            Err(Error::ChecksumMismatch {
                url: url.to_string(),
                expected: self.to_prefixed_string(),
                actual: actual.to_prefixed_string(),
            })
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Compute SHA-256 of a byte slice as hex
#[inline]
pub fn sha256(data: &[u8]) -> String {
    Digest::compute(HashAlgorithm::Sha256, data).value
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(sha256(b"Hello, World!"), HELLO_SHA256);
    }

    #[test]
    fn test_xxh128_length() {
        let digest = Digest::compute(HashAlgorithm::Xxh128, b"Hello, World!");
        assert_eq!(digest.value.len(), 32);
    }

    #[test]
    fn test_parse_prefixed_and_bare() {
        let prefixed = Digest::parse(&format!("sha256:{HELLO_SHA256}")).unwrap();
        let bare = Digest::parse(HELLO_SHA256).unwrap();
        assert_eq!(prefixed, bare);

        let upper = Digest::parse(&HELLO_SHA256.to_uppercase()).unwrap();
        assert_eq!(upper.value, HELLO_SHA256);
    }

    #[test]
    fn test_parse_rejects_bad_digests() {
        assert!(matches!(
            Digest::parse("sha256:abc123"),
            Err(Error::InvalidDigest { .. })
        ));
        assert!(matches!(
            Digest::parse("md5:d41d8cd98f00b204e9800998ecf8427e"),
            Err(Error::InvalidDigest { .. })
        ));
        let non_hex = format!("gggg{}", &HELLO_SHA256[4..]);
        assert!(Digest::parse(&non_hex).is_err());
    }

    #[test]
    fn test_verify_mismatch_reports_both_digests() {
        let digest = Digest::parse(HELLO_SHA256).unwrap();
        assert!(digest.verify("https://example.com/a.tar.gz", b"Hello, World!").is_ok());

        let err = digest
            .verify("https://example.com/a.tar.gz", b"tampered")
            .unwrap_err();
        match err {
            Error::ChecksumMismatch { url, expected, actual } => {
                assert_eq!(url, "https://example.com/a.tar.gz");
                assert_eq!(expected, format!("sha256:{HELLO_SHA256}"));
                assert_eq!(actual, format!("sha256:{}", sha256(b"tampered")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cache_key() {
        let digest = Digest::parse(HELLO_SHA256).unwrap();
        assert_eq!(digest.cache_key(), format!("sha256_{HELLO_SHA256}"));
    }
}
