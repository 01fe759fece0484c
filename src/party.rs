//! Ledger identities: well-known parties and one-time anonymous keys.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Raw ed25519 public key as it appears in states, commands and signatures.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Wraps raw key bytes without validating the curve point.
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Decodes the key into a dalek verifying key.
    pub fn verifying_key(&self) -> Result<VerifyingKey, ed25519_dalek::SignatureError> {
        VerifyingKey::from_bytes(&self.0)
    }

    /// Verifies `signature` over `payload`; any decoding failure counts as invalid.
    pub fn verify(&self, payload: &[u8], signature: &[u8; 64]) -> bool {
        match self.verifying_key() {
            Ok(vk) => vk.verify(payload, &Signature::from_bytes(signature)).is_ok(),
            Err(_) => false,
        }
    }

    /// Base64 rendering used in configuration and envelopes.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parses a base64-encoded key.
    pub fn from_base64(input: &str) -> Result<Self, String> {
        let bytes = BASE64.decode(input.trim()).map_err(|err| err.to_string())?;
        let len = bytes.len();
        let raw: [u8; PUBLIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| format!("unexpected public key length: {len}"))?;
        Ok(Self(raw))
    }
}

impl From<&VerifyingKey> for PublicKey {
    fn from(vk: &VerifyingKey) -> Self {
        Self(vk.to_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..6]))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_base64(&text).map_err(serde::de::Error::custom)
    }
}

/// A well-known legal identity: a name bound to a long-lived key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    /// Network-unique name, used for routing and in logs.
    pub name: String,
    /// Long-lived signing key of the party.
    pub owning_key: PublicKey,
}

impl Party {
    /// Creates a party from a name and its legal key.
    pub fn new(name: impl Into<String>, owning_key: PublicKey) -> Self {
        Self {
            name: name.into(),
            owning_key,
        }
    }

    /// Drops the name, leaving only the key.
    pub fn anonymise(&self) -> AnonymousParty {
        AnonymousParty::new(self.owning_key)
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An identity known only by its key.  One-time pledger keys use this form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnonymousParty {
    /// Key standing in for the real identity.
    pub owning_key: PublicKey,
}

impl AnonymousParty {
    /// Wraps a key as an anonymous identity.
    pub fn new(owning_key: PublicKey) -> Self {
        Self { owning_key }
    }
}

impl fmt::Display for AnonymousParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anonymous({})", hex::encode(&self.owning_key.as_bytes()[..6]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyMaterial;

    #[test]
    fn public_key_serde_is_base64() {
        let key = KeyMaterial::generate().public_key();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_base64()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn rejects_short_keys() {
        assert!(PublicKey::from_base64(&BASE64.encode([1u8; 12])).is_err());
    }

    #[test]
    fn verify_checks_payload() {
        let keys = KeyMaterial::generate();
        let sig = keys.sign(b"campaign");
        assert!(keys.public_key().verify(b"campaign", &sig));
        assert!(!keys.public_key().verify(b"other", &sig));
    }
}
