#![cfg(feature = "net")]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::IdentityCertificate;
use crate::notary::StateConflict;
use crate::party::{Party, PublicKey};
use crate::states::{StateRef, UniqueIdentifier};
use crate::transaction::{FinalizedTransaction, SignedTransaction, TransactionSignature};

/// Schema identifier used for signed flow envelopes.
pub const SCHEMA_ENVELOPE: &str = "crowdfund.envelope.v1";
/// Current envelope schema major version.
pub const ENVELOPE_SCHEMA_VERSION: u32 = 1;

const ENVELOPE_DOMAIN: &[u8] = b"CROWDFUND_ENVELOPE";

/// Counterparty verdict on a signature request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureOutcome {
    /// The counterparty signed the transaction id.
    Signed(TransactionSignature),
    /// The counterparty refused to sign.
    Rejected {
        /// Human-readable refusal.
        reason: String,
    },
}

/// Notary verdict on a notarisation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotarisationOutcome {
    /// Inputs committed; the notary's signature over the id.
    Accepted(TransactionSignature),
    /// One or more inputs were consumed by another transaction.
    Conflict(Vec<StateConflict>),
    /// Refused for a reason other than input consumption.
    Rejected {
        /// Human-readable refusal.
        reason: String,
    },
}

/// Recipient verdict on a finalized transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalityOutcome {
    /// Verified and committed.
    Recorded,
    /// Already held; nothing changed.
    AlreadyKnown,
    /// Verification failed; nothing committed.
    Refused {
        /// Human-readable refusal.
        reason: String,
    },
}

/// A participant's answer to a campaign head request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadOutcome {
    /// Transactions from the requester's version to the current head, oldest first.
    History(Vec<FinalizedTransaction>),
    /// The participant cannot or will not supply the history.
    Unavailable {
        /// Human-readable refusal.
        reason: String,
    },
}

/// Messages exchanged between flows and their responders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowMessage {
    /// Asks a counterparty to verify and sign a proposal.
    SignatureRequest {
        /// Initiating flow identifier.
        flow_id: String,
        /// Proposal carrying the initiator's signatures.
        transaction: SignedTransaction,
        /// Identity certificates the counterparty needs to resolve one-time keys.
        identities: Vec<IdentityCertificate>,
    },
    /// Reply to [`FlowMessage::SignatureRequest`].
    SignatureResponse {
        /// Verdict.
        outcome: SignatureOutcome,
    },
    /// Asks the notary to order the transaction's inputs.
    NotarisationRequest {
        /// Transaction signed by every required signer except the notary.
        transaction: SignedTransaction,
    },
    /// Reply to [`FlowMessage::NotarisationRequest`].
    NotarisationResponse {
        /// Verdict.
        outcome: NotarisationOutcome,
    },
    /// Delivers a finalized transaction for recording.
    Finalized {
        /// The finalized transaction.
        transaction: FinalizedTransaction,
    },
    /// Reply to [`FlowMessage::Finalized`].
    FinalityAck {
        /// Verdict.
        outcome: FinalityOutcome,
    },
    /// Asks the campaign manager for the versions that superseded `since`.
    CampaignHeadRequest {
        /// Campaign linear id.
        campaign_id: UniqueIdentifier,
        /// Latest version the requester holds.
        since: StateRef,
    },
    /// Reply to [`FlowMessage::CampaignHeadRequest`].
    CampaignHeadResponse {
        /// Verdict.
        outcome: HeadOutcome,
    },
}

impl FlowMessage {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SignatureRequest { .. } => "signature_request",
            Self::SignatureResponse { .. } => "signature_response",
            Self::NotarisationRequest { .. } => "notarisation_request",
            Self::NotarisationResponse { .. } => "notarisation_response",
            Self::Finalized { .. } => "finalized",
            Self::FinalityAck { .. } => "finality_ack",
            Self::CampaignHeadRequest { .. } => "campaign_head_request",
            Self::CampaignHeadResponse { .. } => "campaign_head_response",
        }
    }
}

/// Signed envelope carried by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEnvelope {
    /// Schema identifier (`crowdfund.envelope.v1`).
    pub schema: String,
    /// Envelope schema version (major).
    #[serde(default = "default_envelope_version")]
    pub schema_version: u32,
    /// Sender party name.
    pub sender: String,
    /// Intended recipient party name.
    pub recipient: String,
    /// Base64-encoded ed25519 public key of the sender.
    pub public_key: String,
    /// Base64-encoded JSON payload representing a [`FlowMessage`].
    pub payload: String,
    /// Base64-encoded ed25519 signature over the domain-tagged envelope fields.
    pub signature: String,
}

/// Errors produced while sealing or opening envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("invalid schema: expected {expected}, found {found}")]
    /// The schema field did not match.
    InvalidSchema {
        /// Expected schema identifier.
        expected: &'static str,
        /// Encountered schema identifier.
        found: String,
    },
    #[error("unsupported envelope version {0}")]
    /// The envelope is newer than this node understands.
    UnsupportedVersion(u32),
    #[error("envelope from {claimed} does not match expected sender {expected}")]
    /// Sender name or key differs from the directory entry.
    SenderMismatch {
        /// Sender named in the envelope.
        claimed: String,
        /// Party the receiver expected.
        expected: String,
    },
    #[error("envelope addressed to {found}, not {expected}")]
    /// The envelope was addressed to somebody else.
    WrongRecipient {
        /// Receiving party.
        expected: String,
        /// Recipient named in the envelope.
        found: String,
    },
    #[error("envelope signature invalid: {0}")]
    /// The signature did not verify.
    Signature(String),
    #[error("envelope payload invalid: {0}")]
    /// The payload could not be encoded or decoded.
    Payload(String),
}

fn signing_bytes(sender: &str, recipient: &str, payload: &str) -> Vec<u8> {
    let mut bytes = ENVELOPE_DOMAIN.to_vec();
    for field in [sender, recipient, payload] {
        bytes.extend_from_slice(&(field.len() as u64).to_be_bytes());
        bytes.extend_from_slice(field.as_bytes());
    }
    bytes
}

impl MessageEnvelope {
    /// Serialises and signs `message` from `sender` to `recipient`.
    pub fn seal(
        sender: &Party,
        signing: &SigningKey,
        recipient: &str,
        message: &FlowMessage,
    ) -> Result<Self, EnvelopeError> {
        let json = serde_json::to_vec(message).map_err(|err| EnvelopeError::Payload(err.to_string()))?;
        let payload = BASE64.encode(json);
        let signature = signing.sign(&signing_bytes(&sender.name, recipient, &payload));
        Ok(Self {
            schema: SCHEMA_ENVELOPE.to_string(),
            schema_version: ENVELOPE_SCHEMA_VERSION,
            sender: sender.name.clone(),
            recipient: recipient.to_string(),
            public_key: PublicKey::from(&signing.verifying_key()).to_base64(),
            payload,
            signature: BASE64.encode(signature.to_bytes()),
        })
    }

    /// Ensures the envelope schema field matches the expected identifier.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.schema != SCHEMA_ENVELOPE {
            return Err(EnvelopeError::InvalidSchema {
                expected: SCHEMA_ENVELOPE,
                found: self.schema.clone(),
            });
        }
        if self.schema_version > ENVELOPE_SCHEMA_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(self.schema_version));
        }
        Ok(())
    }

    /// Authenticates the envelope against the directory entry for its sender
    /// and decodes the payload.
    pub fn open(&self, expected_sender: &Party, me: &str) -> Result<FlowMessage, EnvelopeError> {
        self.validate()?;
        if self.sender != expected_sender.name
            || self.public_key != expected_sender.owning_key.to_base64()
        {
            return Err(EnvelopeError::SenderMismatch {
                claimed: self.sender.clone(),
                expected: expected_sender.name.clone(),
            });
        }
        if self.recipient != me {
            return Err(EnvelopeError::WrongRecipient {
                expected: me.to_string(),
                found: self.recipient.clone(),
            });
        }
        let signature: [u8; 64] = BASE64
            .decode(self.signature.as_bytes())
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| EnvelopeError::Signature("malformed signature".into()))?;
        if !expected_sender
            .owning_key
            .verify(&signing_bytes(&self.sender, &self.recipient, &self.payload), &signature)
        {
            return Err(EnvelopeError::Signature("does not verify under the sender key".into()));
        }
        let json = BASE64
            .decode(self.payload.as_bytes())
            .map_err(|err| EnvelopeError::Payload(err.to_string()))?;
        serde_json::from_slice(&json).map_err(|err| EnvelopeError::Payload(err.to_string()))
    }
}

fn default_envelope_version() -> u32 {
    ENVELOPE_SCHEMA_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyMaterial;

    fn party(name: &str) -> (Party, KeyMaterial) {
        let keys = KeyMaterial::generate();
        (Party::new(name, keys.public_key()), keys)
    }

    fn ack() -> FlowMessage {
        FlowMessage::FinalityAck {
            outcome: FinalityOutcome::Refused {
                reason: "unknown input".into(),
            },
        }
    }

    #[test]
    fn sealed_envelope_opens_for_recipient() {
        let (alice, keys) = party("PartyA");
        let envelope = MessageEnvelope::seal(&alice, &keys.signing, "PartyB", &ack()).unwrap();
        assert_eq!(envelope.open(&alice, "PartyB").unwrap(), ack());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let (alice, keys) = party("PartyA");
        let mut envelope = MessageEnvelope::seal(&alice, &keys.signing, "PartyB", &ack()).unwrap();
        let forged = FlowMessage::FinalityAck {
            outcome: FinalityOutcome::Recorded,
        };
        envelope.payload = BASE64.encode(serde_json::to_vec(&forged).unwrap());
        assert!(matches!(
            envelope.open(&alice, "PartyB"),
            Err(EnvelopeError::Signature(_))
        ));
    }

    #[test]
    fn impersonation_and_misrouting_are_rejected() {
        let (alice, _) = party("PartyA");
        let (mallory, mallory_keys) = party("PartyA");
        let envelope = MessageEnvelope::seal(&mallory, &mallory_keys.signing, "PartyB", &ack()).unwrap();
        assert!(matches!(
            envelope.open(&alice, "PartyB"),
            Err(EnvelopeError::SenderMismatch { .. })
        ));
        assert!(matches!(
            envelope.open(&mallory, "PartyC"),
            Err(EnvelopeError::WrongRecipient { .. })
        ));
    }

    #[test]
    fn newer_schema_version_is_refused() {
        let (alice, keys) = party("PartyA");
        let mut envelope = MessageEnvelope::seal(&alice, &keys.signing, "PartyB", &ack()).unwrap();
        envelope.schema_version = ENVELOPE_SCHEMA_VERSION + 1;
        assert_eq!(
            envelope.validate(),
            Err(EnvelopeError::UnsupportedVersion(ENVELOPE_SCHEMA_VERSION + 1))
        );
    }
}
