//! Transactions: building, identifying, signing and finalizing.
//!
//! A [`WireTransaction`] is the signed-over content.  Its id is the Merkle
//! root of one sub-root per component group (inputs, outputs, commands,
//! notary, time window, salt), so every party derives the same id from the
//! same content.  [`SignedTransaction`] accumulates signatures over that id;
//! a [`FinalizedTransaction`] additionally carries the notary's signature and
//! can only be constructed once every required signature verifies.

use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::data::{base64_array, SecureHash};
use crate::merkle::merkle_root;
use crate::party::{Party, PublicKey};
use crate::states::{ContractState, StateAndRef, StateKind, StateRef};

const COMPONENT_DOMAIN: &[u8] = b"CROWDFUND_COMPONENT";
const SIGNATURE_DOMAIN: &[u8] = b"CROWDFUND_TX_SIG";

/// Intent attached to a transaction, naming which rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandData {
    /// Issue the first version of a campaign.
    StartCampaign,
    /// Consume a campaign version and re-issue it with a higher total.
    AcceptPledge,
    /// Issue a new pledge state.
    CreatePledge,
}

/// A command together with the keys that must sign for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    /// What the command asserts.
    pub data: CommandData,
    /// Keys whose signatures the command requires.
    pub signers: Vec<PublicKey>,
}

/// Validity window checked by the notary against its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive lower bound (unix ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_ms: Option<u64>,
    /// Exclusive upper bound (unix ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until_ms: Option<u64>,
}

impl TimeWindow {
    /// Valid for any instant strictly before `until_ms`.
    pub fn until(until_ms: u64) -> Self {
        Self {
            from_ms: None,
            until_ms: Some(until_ms),
        }
    }

    /// Valid in `[from_ms, until_ms)`.
    pub fn between(from_ms: u64, until_ms: u64) -> Self {
        Self {
            from_ms: Some(from_ms),
            until_ms: Some(until_ms),
        }
    }

    /// True when `now_ms` falls inside the window.
    pub fn contains(&self, now_ms: u64) -> bool {
        self.from_ms.map_or(true, |from| now_ms >= from)
            && self.until_ms.map_or(true, |until| now_ms < until)
    }
}

/// The content of a transaction, as signed by every party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransaction {
    /// States consumed by this transaction.
    pub inputs: Vec<StateRef>,
    /// States produced by this transaction, addressed by index.
    pub outputs: Vec<ContractState>,
    /// Commands and their required signers.
    pub commands: Vec<Command>,
    /// Notary that orders consumption of the inputs.
    pub notary: Party,
    /// Optional validity window enforced by the notary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    /// Random salt so that equal content never yields equal ids.
    pub privacy_salt: SecureHash,
}

impl WireTransaction {
    /// Merkle-derived transaction id.
    pub fn id(&self) -> SecureHash {
        let groups = [
            group_root(0, &self.inputs),
            group_root(1, &self.outputs),
            group_root(2, &self.commands),
            group_root(3, std::slice::from_ref(&self.notary)),
            group_root(4, self.time_window.as_slice()),
            group_root(5, std::slice::from_ref(&self.privacy_salt)),
        ];
        merkle_root(&groups)
    }

    /// Union of all command signers, excluding the notary.
    pub fn required_signers(&self) -> BTreeSet<PublicKey> {
        self.commands
            .iter()
            .flat_map(|command| command.signers.iter().copied())
            .collect()
    }

    /// Reference to output `index` of this transaction.
    pub fn out_ref(&self, index: usize) -> StateRef {
        StateRef::new(self.id(), index as u32)
    }

    /// Outputs of type `T` together with their references.
    pub fn out_refs_of_type<T: StateKind>(&self) -> Vec<StateAndRef<T>> {
        let id = self.id();
        self.outputs
            .iter()
            .enumerate()
            .filter_map(|(idx, state)| {
                T::from_state(state).map(|typed| StateAndRef {
                    state: typed.clone(),
                    reference: StateRef::new(id, idx as u32),
                })
            })
            .collect()
    }

    /// Outputs of type `T`.
    pub fn outputs_of_type<T: StateKind>(&self) -> Vec<&T> {
        self.outputs.iter().filter_map(T::from_state).collect()
    }

    /// Resolves inputs through `resolve`, producing the view contracts verify.
    pub fn to_ledger_transaction<E>(
        &self,
        mut resolve: impl FnMut(&StateRef) -> Result<ContractState, E>,
    ) -> Result<LedgerTransaction, E> {
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for reference in &self.inputs {
            inputs.push(StateAndRef {
                state: resolve(reference)?,
                reference: *reference,
            });
        }
        Ok(LedgerTransaction {
            id: self.id(),
            inputs,
            outputs: self.outputs.clone(),
            commands: self.commands.clone(),
            notary: self.notary.clone(),
            time_window: self.time_window,
        })
    }
}

fn group_root<T: Serialize>(group: u8, components: &[T]) -> SecureHash {
    let leaves: Vec<SecureHash> = components
        .iter()
        .enumerate()
        .map(|(idx, component)| {
            let mut bytes = vec![group];
            bytes.extend_from_slice(&(idx as u64).to_be_bytes());
            bytes.extend(
                serde_json::to_vec(component).expect("ledger components are JSON-serialisable"),
            );
            SecureHash::digest(COMPONENT_DOMAIN, &bytes)
        })
        .collect();
    merkle_root(&leaves)
}

/// Mutable accumulator for a proposed transaction.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    notary: Party,
    inputs: Vec<StateRef>,
    outputs: Vec<ContractState>,
    commands: Vec<Command>,
    time_window: Option<TimeWindow>,
}

impl TransactionBuilder {
    /// Starts an empty transaction for `notary`.
    pub fn new(notary: Party) -> Self {
        Self {
            notary,
            inputs: Vec::new(),
            outputs: Vec::new(),
            commands: Vec::new(),
            time_window: None,
        }
    }

    /// Consumes `input`.
    pub fn add_input_state<T>(mut self, input: &StateAndRef<T>) -> Self {
        self.inputs.push(input.reference);
        self
    }

    /// Produces `output`.
    pub fn add_output_state(mut self, output: impl Into<ContractState>) -> Self {
        self.outputs.push(output.into());
        self
    }

    /// Adds a command; signers are deduplicated and sorted.
    pub fn add_command(mut self, data: CommandData, signers: impl IntoIterator<Item = PublicKey>) -> Self {
        let signers: BTreeSet<PublicKey> = signers.into_iter().collect();
        self.commands.push(Command {
            data,
            signers: signers.into_iter().collect(),
        });
        self
    }

    /// Sets the notarisation window.
    pub fn set_time_window(mut self, window: TimeWindow) -> Self {
        self.time_window = Some(window);
        self
    }

    /// Freezes the content with a fresh privacy salt.
    pub fn to_wire_transaction(self) -> WireTransaction {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        WireTransaction {
            inputs: self.inputs,
            outputs: self.outputs,
            commands: self.commands,
            notary: self.notary,
            time_window: self.time_window,
            privacy_salt: SecureHash::from_bytes(salt),
        }
    }
}

/// A transaction with its inputs resolved, as seen by contract rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    /// Transaction id.
    pub id: SecureHash,
    /// Resolved inputs.
    pub inputs: Vec<StateAndRef>,
    /// Outputs.
    pub outputs: Vec<ContractState>,
    /// Commands.
    pub commands: Vec<Command>,
    /// Notary.
    pub notary: Party,
    /// Time window, if any.
    pub time_window: Option<TimeWindow>,
}

impl LedgerTransaction {
    /// Inputs of type `T`.
    pub fn inputs_of_type<T: StateKind>(&self) -> Vec<&T> {
        self.inputs
            .iter()
            .filter_map(|input| T::from_state(&input.state))
            .collect()
    }

    /// Outputs of type `T`.
    pub fn outputs_of_type<T: StateKind>(&self) -> Vec<&T> {
        self.outputs.iter().filter_map(T::from_state).collect()
    }

    /// First command carrying `data`.
    pub fn command(&self, data: CommandData) -> Option<&Command> {
        self.commands.iter().find(|command| command.data == data)
    }
}

/// One party's signature over a transaction id.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    /// Signing key.
    pub by: PublicKey,
    /// Raw ed25519 signature.
    #[serde(with = "base64_array")]
    pub bytes: [u8; 64],
}

impl fmt::Debug for TransactionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionSignature(by={:?})", self.by)
    }
}

fn signature_payload(id: &SecureHash) -> Vec<u8> {
    let mut payload = SIGNATURE_DOMAIN.to_vec();
    payload.extend_from_slice(id.as_bytes());
    payload
}

impl TransactionSignature {
    /// Signs `id` with `key`.
    pub fn sign(key: &SigningKey, id: &SecureHash) -> Self {
        Self {
            by: PublicKey::from(&key.verifying_key()),
            bytes: key.sign(&signature_payload(id)).to_bytes(),
        }
    }

    /// Checks the signature against `id`.
    pub fn verify(&self, id: &SecureHash) -> Result<(), SignatureError> {
        if self.by.verify(&signature_payload(id), &self.bytes) {
            Ok(())
        } else {
            Err(SignatureError::Invalid { by: self.by })
        }
    }
}

/// Signature problems found while checking a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("invalid signature by {by}")]
    /// A signature did not verify against the transaction id.
    Invalid {
        /// Key the signature claimed.
        by: PublicKey,
    },
    #[error("missing signatures from {} key(s)", keys.len())]
    /// Required signers have not signed yet.
    Missing {
        /// Keys still owing a signature.
        keys: Vec<PublicKey>,
    },
    #[error("signature by {by} is not required by the transaction")]
    /// A signature came from a key that is neither a signer nor the notary.
    Unexpected {
        /// Key that produced the unexpected signature.
        by: PublicKey,
    },
}

/// A transaction plus the signatures collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Signed-over content.
    pub tx: WireTransaction,
    /// Signatures over `tx.id()`.
    pub sigs: Vec<TransactionSignature>,
}

impl SignedTransaction {
    /// Wraps an unsigned transaction.
    pub fn new(tx: WireTransaction) -> Self {
        Self {
            tx,
            sigs: Vec::new(),
        }
    }

    /// Transaction id.
    pub fn id(&self) -> SecureHash {
        self.tx.id()
    }

    /// Adds a signature made with `key`.
    pub fn sign_with(self, key: &SigningKey) -> Self {
        let sig = TransactionSignature::sign(key, &self.id());
        self.with_signature(sig)
    }

    /// Adds `sig`, replacing any earlier signature by the same key.
    pub fn with_signature(mut self, sig: TransactionSignature) -> Self {
        self.sigs.retain(|existing| existing.by != sig.by);
        self.sigs.push(sig);
        self
    }

    /// Every key that must sign before finality: command signers plus the notary.
    pub fn all_required_keys(&self) -> BTreeSet<PublicKey> {
        let mut keys = self.tx.required_signers();
        keys.insert(self.tx.notary.owning_key);
        keys
    }

    /// Required keys with no signature yet.
    pub fn missing_signers(&self) -> BTreeSet<PublicKey> {
        let signed: BTreeSet<PublicKey> = self.sigs.iter().map(|sig| sig.by).collect();
        self.all_required_keys()
            .difference(&signed)
            .copied()
            .collect()
    }

    /// Checks every present signature and that only `allowed_missing` keys are unsigned.
    pub fn verify_signatures_except(
        &self,
        allowed_missing: &[PublicKey],
    ) -> Result<(), SignatureError> {
        let id = self.id();
        let required = self.all_required_keys();
        for sig in &self.sigs {
            if !required.contains(&sig.by) {
                return Err(SignatureError::Unexpected { by: sig.by });
            }
            sig.verify(&id)?;
        }
        let missing: Vec<PublicKey> = self
            .missing_signers()
            .into_iter()
            .filter(|key| !allowed_missing.contains(key))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SignatureError::Missing { keys: missing })
        }
    }

    /// Checks that every required signature, notary included, is present and valid.
    pub fn verify_required_signatures(&self) -> Result<(), SignatureError> {
        self.verify_signatures_except(&[])
    }
}

/// A transaction signed by all required parties and accepted by the notary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SignedTransaction", into = "SignedTransaction")]
pub struct FinalizedTransaction(SignedTransaction);

impl FinalizedTransaction {
    /// Accepts `stx` only if every required signature verifies.
    pub fn from_signed(stx: SignedTransaction) -> Result<Self, SignatureError> {
        stx.verify_required_signatures()?;
        Ok(Self(stx))
    }

    /// Transaction id.
    pub fn id(&self) -> SecureHash {
        self.0.id()
    }

    /// Transaction content.
    pub fn tx(&self) -> &WireTransaction {
        &self.0.tx
    }

    /// The underlying signed transaction.
    pub fn signed(&self) -> &SignedTransaction {
        &self.0
    }

    /// The notary's acceptance signature.
    pub fn notary_signature(&self) -> Option<&TransactionSignature> {
        let notary = self.0.tx.notary.owning_key;
        self.0.sigs.iter().find(|sig| sig.by == notary)
    }
}

impl TryFrom<SignedTransaction> for FinalizedTransaction {
    type Error = SignatureError;

    fn try_from(stx: SignedTransaction) -> Result<Self, Self::Error> {
        Self::from_signed(stx)
    }
}

impl From<FinalizedTransaction> for SignedTransaction {
    fn from(ftx: FinalizedTransaction) -> Self {
        ftx.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::keys::KeyMaterial;
    use crate::states::Campaign;

    struct Fixture {
        manager: KeyMaterial,
        notary: KeyMaterial,
        campaign: Campaign,
    }

    fn fixture() -> Fixture {
        let manager = KeyMaterial::generate();
        let notary = KeyMaterial::generate();
        let campaign = Campaign::new(
            "Roger's Campaign",
            Amount::pounds(1000),
            Party::new("PartyA", manager.public_key()),
            1_000,
        );
        Fixture {
            manager,
            notary,
            campaign,
        }
    }

    fn issuance(f: &Fixture) -> WireTransaction {
        TransactionBuilder::new(Party::new("Notary", f.notary.public_key()))
            .add_output_state(f.campaign.clone())
            .add_command(CommandData::StartCampaign, [f.manager.public_key()])
            .set_time_window(TimeWindow::until(f.campaign.deadline_ms))
            .to_wire_transaction()
    }

    #[test]
    fn id_is_stable_and_content_sensitive() {
        let f = fixture();
        let tx = issuance(&f);
        assert_eq!(tx.id(), tx.clone().id());
        let mut altered = tx.clone();
        altered.time_window = Some(TimeWindow::until(2_000));
        assert_ne!(altered.id(), tx.id());
        // Fresh salt gives a fresh id even for identical content.
        assert_ne!(issuance(&f).id(), tx.id());
    }

    #[test]
    fn out_refs_index_outputs() {
        let f = fixture();
        let tx = issuance(&f);
        let refs = tx.out_refs_of_type::<Campaign>();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].reference, tx.out_ref(0));
        assert_eq!(refs[0].state, f.campaign);
    }

    #[test]
    fn finality_requires_notary_signature() {
        let f = fixture();
        let stx = SignedTransaction::new(issuance(&f)).sign_with(&f.manager.signing);
        assert!(stx
            .verify_signatures_except(&[f.notary.public_key()])
            .is_ok());
        let err = FinalizedTransaction::from_signed(stx.clone()).unwrap_err();
        assert_eq!(
            err,
            SignatureError::Missing {
                keys: vec![f.notary.public_key()]
            }
        );
        let notarised = stx.sign_with(&f.notary.signing);
        let ftx = FinalizedTransaction::from_signed(notarised).unwrap();
        assert!(ftx.notary_signature().is_some());
    }

    #[test]
    fn rejects_forged_and_unexpected_signatures() {
        let f = fixture();
        let stx = SignedTransaction::new(issuance(&f));
        let stranger = KeyMaterial::generate();
        let with_stranger = stx.clone().sign_with(&stranger.signing);
        assert!(matches!(
            with_stranger.verify_signatures_except(&[]),
            Err(SignatureError::Unexpected { .. })
        ));
        let mut forged = TransactionSignature::sign(&f.manager.signing, &SecureHash::default());
        forged.by = f.manager.public_key();
        let forged_tx = stx.with_signature(forged);
        assert!(matches!(
            forged_tx.verify_signatures_except(&[f.notary.public_key()]),
            Err(SignatureError::Invalid { .. })
        ));
    }

    #[test]
    fn finalized_deserialisation_revalidates() {
        let f = fixture();
        let stx = SignedTransaction::new(issuance(&f)).sign_with(&f.manager.signing);
        let json = serde_json::to_string(&stx).unwrap();
        assert!(serde_json::from_str::<FinalizedTransaction>(&json).is_err());
        let ftx = FinalizedTransaction::from_signed(stx.sign_with(&f.notary.signing)).unwrap();
        let json = serde_json::to_string(&ftx).unwrap();
        let back: FinalizedTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ftx);
    }

    #[test]
    fn time_window_bounds() {
        let window = TimeWindow::between(10, 20);
        assert!(!window.contains(9));
        assert!(window.contains(10));
        assert!(!window.contains(20));
        assert!(TimeWindow::until(5).contains(0));
    }
}
