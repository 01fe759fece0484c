//! Legal identity keys and where they come from.
//!
//! A party's `key` setting is either an `ed25519://<seed>` string (the secret
//! is the first half of SHA-512 over the seed), a path to a file holding the
//! 32-byte secret raw or hex-encoded, or absent for a random key.

use ed25519_dalek::{Signer, SigningKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::party::PublicKey;

const SEED_SCHEME: &str = "ed25519://";

/// Where a party's long-lived key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Derived from a seed string.
    Seed(String),
    /// Read from a key file.
    File(PathBuf),
    /// Freshly generated on every start.
    Random,
}

impl KeySource {
    /// Interprets a party's `key` setting; blank means random.
    pub fn parse(setting: Option<&str>) -> Self {
        match setting.map(str::trim).filter(|value| !value.is_empty()) {
            None => Self::Random,
            Some(value) => match value.strip_prefix(SEED_SCHEME) {
                Some(seed) => Self::Seed(seed.to_string()),
                None => Self::File(PathBuf::from(value)),
            },
        }
    }
}

/// Key loading failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("cannot read key file {path}: {reason}")]
    /// The key file could not be read.
    Io {
        /// File that failed.
        path: PathBuf,
        /// I/O error text.
        reason: String,
    },
    #[error("key file {path} does not hold a 32-byte secret ({len} bytes read)")]
    /// The file is neither a raw nor a hex-encoded secret.
    Malformed {
        /// Offending file.
        path: PathBuf,
        /// Bytes read.
        len: usize,
    },
}

/// A party's legal signing key.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// The ed25519 signing half.
    pub signing: SigningKey,
}

impl KeyMaterial {
    /// Wraps an existing signing key.
    pub fn from_signing_key(signing: SigningKey) -> Self {
        Self { signing }
    }

    /// A random key.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Obtains the key described by `source`.
    pub fn load(source: &KeySource) -> Result<Self, KeyError> {
        let secret = match source {
            KeySource::Seed(seed) => {
                let digest = Sha512::digest(seed.as_bytes());
                let mut secret = [0u8; SECRET_KEY_LENGTH];
                secret.copy_from_slice(&digest[..SECRET_KEY_LENGTH]);
                secret
            }
            KeySource::File(path) => read_secret(path)?,
            KeySource::Random => return Ok(Self::generate()),
        };
        Ok(Self::from_signing_key(SigningKey::from_bytes(&secret)))
    }

    /// Ledger-level public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.signing.verifying_key())
    }

    /// Signs `payload` with the legal key.
    pub fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.signing.sign(payload).to_bytes()
    }
}

fn read_secret(path: &Path) -> Result<[u8; SECRET_KEY_LENGTH], KeyError> {
    let contents = fs::read(path).map_err(|err| KeyError::Io {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    if let Ok(secret) = <[u8; SECRET_KEY_LENGTH]>::try_from(contents.as_slice()) {
        return Ok(secret);
    }
    let decoded = std::str::from_utf8(&contents)
        .ok()
        .and_then(|text| hex::decode(text.trim()).ok())
        .unwrap_or_default();
    <[u8; SECRET_KEY_LENGTH]>::try_from(decoded.as_slice()).map_err(|_| KeyError::Malformed {
        path: path.to_path_buf(),
        len: contents.len(),
    })
}
