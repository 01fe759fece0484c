//! One-time anonymous identities and the side-table that resolves them.
//!
//! A node issues a fresh ed25519 key per pledge and keeps its signing half.
//! The binding "this one-time key belongs to that party" is an
//! [`IdentityCertificate`] signed by the party's legal key.  Certificates are
//! handed only to the counterparties that need them; every other node
//! resolves the one-time key to `None`.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::data::base64_array;
use crate::keys::KeyMaterial;
use crate::party::{AnonymousParty, Party, PublicKey};

const CERTIFICATE_DOMAIN: &[u8] = b"CROWDFUND_IDENTITY_CERT";

/// Signed binding of a one-time key to a well-known party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCertificate {
    /// The one-time key.
    pub one_time_key: PublicKey,
    /// Real identity behind the key.
    pub party: Party,
    /// Flow context the key was issued for.
    pub context: String,
    /// Signature by `party.owning_key` over the key and context.
    #[serde(with = "base64_array")]
    pub signature: [u8; 64],
}

impl IdentityCertificate {
    fn payload(one_time_key: &PublicKey, context: &str) -> Vec<u8> {
        let mut payload = CERTIFICATE_DOMAIN.to_vec();
        payload.extend_from_slice(one_time_key.as_bytes());
        payload.extend_from_slice(context.as_bytes());
        payload
    }

    /// Checks the legal key's signature over the binding.
    pub fn verify(&self) -> Result<(), IdentityError> {
        let payload = Self::payload(&self.one_time_key, &self.context);
        if self.party.owning_key.verify(&payload, &self.signature) {
            Ok(())
        } else {
            Err(IdentityError::BadCertificate {
                key: self.one_time_key,
            })
        }
    }
}

/// Failures while registering identity mappings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity certificate for {key} has an invalid signature")]
    /// The certificate signature did not verify.
    BadCertificate {
        /// One-time key named by the certificate.
        key: PublicKey,
    },
    #[error("key {key} is already mapped to {existing}")]
    /// The key is already bound to a different party.
    Conflict {
        /// One-time key named by the certificate.
        key: PublicKey,
        /// Party the key was previously mapped to.
        existing: String,
    },
}

/// Per-node store of one-time keys and known mappings.
#[derive(Debug)]
pub struct IdentityService {
    me: Party,
    legal_key: KeyMaterial,
    one_time_keys: HashMap<PublicKey, SigningKey>,
    mappings: HashMap<PublicKey, IdentityCertificate>,
}

impl IdentityService {
    /// Creates the service for the party owning `keys`.
    pub fn new(me: Party, keys: &KeyMaterial) -> Self {
        Self {
            me,
            legal_key: keys.clone(),
            one_time_keys: HashMap::new(),
            mappings: HashMap::new(),
        }
    }

    /// The node's own well-known identity.
    pub fn me(&self) -> &Party {
        &self.me
    }

    /// Issues a never-before-used key and the certificate binding it to this node.
    pub fn fresh_key_and_cert(&mut self, context: &str) -> (AnonymousParty, IdentityCertificate) {
        let (signing, one_time_key) = loop {
            let candidate = SigningKey::generate(&mut OsRng);
            let public = PublicKey::from(&candidate.verifying_key());
            if public != self.me.owning_key && !self.one_time_keys.contains_key(&public) {
                break (candidate, public);
            }
        };
        let payload = IdentityCertificate::payload(&one_time_key, context);
        let certificate = IdentityCertificate {
            one_time_key,
            party: self.me.clone(),
            context: context.to_string(),
            signature: self.legal_key.sign(&payload),
        };
        self.one_time_keys.insert(one_time_key, signing);
        self.mappings.insert(one_time_key, certificate.clone());
        debug!(party = %self.me, key = ?one_time_key, context, "issued one-time key");
        (AnonymousParty::new(one_time_key), certificate)
    }

    /// Records a mapping received from a counterparty.
    ///
    /// Returns `true` when the mapping was new.  Re-registering an identical
    /// binding is a no-op; binding a known key to another party is refused.
    pub fn register(&mut self, certificate: IdentityCertificate) -> Result<bool, IdentityError> {
        certificate.verify()?;
        if let Some(existing) = self.mappings.get(&certificate.one_time_key) {
            if existing.party != certificate.party {
                return Err(IdentityError::Conflict {
                    key: certificate.one_time_key,
                    existing: existing.party.name.clone(),
                });
            }
            return Ok(false);
        }
        debug!(
            party = %self.me,
            key = ?certificate.one_time_key,
            owner = %certificate.party,
            "registered identity mapping"
        );
        self.mappings.insert(certificate.one_time_key, certificate);
        Ok(true)
    }

    /// Resolves a key to a well-known party, or `None` when this node was never told.
    pub fn resolve(&self, key: &PublicKey) -> Option<&Party> {
        if *key == self.me.owning_key {
            return Some(&self.me);
        }
        self.mappings.get(key).map(|certificate| &certificate.party)
    }

    /// Certificate for `key`, if known.
    pub fn certificate(&self, key: &PublicKey) -> Option<&IdentityCertificate> {
        self.mappings.get(key)
    }

    /// Signing key for a key this node owns (legal or one-time).
    pub fn signing_key(&self, key: &PublicKey) -> Option<&SigningKey> {
        if *key == self.me.owning_key {
            return Some(&self.legal_key.signing);
        }
        self.one_time_keys.get(key)
    }

    /// True when this node holds the signing half of `key`.
    pub fn owns(&self, key: &PublicKey) -> bool {
        self.signing_key(key).is_some()
    }
}
