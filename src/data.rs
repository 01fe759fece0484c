//! Deterministic digest and encoding helpers for ledger artifacts.
//!
//! Transaction identifiers and Merkle nodes are domain-separated BLAKE2b-256
//! digests.  Digests travel as lowercase hex, key and signature bytes as
//! standard base64, mirroring the encodings used on the wire.

use blake2::digest::{consts::U32, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub(crate) type Blake2b256 = blake2::Blake2b<U32>;

/// A 32-byte BLAKE2b digest used for transaction ids and Merkle nodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SecureHash([u8; 32]);

impl SecureHash {
    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hashes `bytes` under the provided domain tag.
    pub fn digest(domain: &[u8], bytes: &[u8]) -> Self {
        let mut hasher = Blake2b256::new();
        hasher.update(domain);
        mix_u64(&mut hasher, bytes.len() as u64);
        hasher.update(bytes);
        Self::finish(hasher)
    }

    pub(crate) fn finish(hasher: Blake2b256) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    /// Lowercase hex rendering of the digest.
    pub fn to_hex(&self) -> String {
        digest_to_hex(&self.0)
    }

    /// Short prefix used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SecureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureHash({})", self.short())
    }
}

impl FromStr for SecureHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        digest_from_hex(s).map(Self)
    }
}

impl Serialize for SecureHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SecureHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

pub(crate) fn mix_u64(hasher: &mut Blake2b256, value: u64) {
    hasher.update(value.to_be_bytes());
}

/// Encodes a digest as lowercase hex.
pub fn digest_to_hex(digest: &[u8; 32]) -> String {
    hex::encode(digest)
}

/// Decodes a 64-character hex string into digest bytes.
pub fn digest_from_hex(input: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(input.trim()).map_err(|err| err.to_string())?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| format!("expected 32 digest bytes, found {}", bytes.len()))
}

/// Serde adapter storing fixed-size byte arrays as base64 strings.
pub(crate) mod base64_array {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        let bytes = BASE64.decode(text.as_bytes()).map_err(D::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| D::Error::custom(format!("expected {N} bytes, found {len}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_domain_separated() {
        let a = SecureHash::digest(b"A", b"payload");
        let b = SecureHash::digest(b"B", b"payload");
        assert_ne!(a, b);
        assert_eq!(a, SecureHash::digest(b"A", b"payload"));
    }

    #[test]
    fn hex_parse_matches_display() {
        let hash = SecureHash::digest(b"T", b"x");
        let parsed: SecureHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
        assert!("abcd".parse::<SecureHash>().is_err());
    }

    #[test]
    fn serde_uses_hex_strings() {
        let hash = SecureHash::from_bytes([7u8; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(32)));
        let back: SecureHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
