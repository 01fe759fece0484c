//! Ledger states: campaigns, pledges and the references that address them.
//!
//! States are immutable.  A campaign "changes" by being consumed as an input
//! and re-issued as an output under the same [`UniqueIdentifier`]; the
//! [`StateRef`] (transaction id plus output index) names one exact version.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::amount::Amount;
use crate::data::SecureHash;
use crate::party::{AnonymousParty, Party, PublicKey};

/// Stable logical identifier shared by every version of a linear state.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueIdentifier {
    /// Optional caller-supplied label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Random 128-bit identifier, hex encoded.
    pub id: String,
}

impl UniqueIdentifier {
    /// Draws a fresh random identifier.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            external_id: None,
            id: hex::encode(bytes),
        }
    }

    /// Draws a fresh identifier carrying an external label.
    pub fn with_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Self::random()
        }
    }
}

impl fmt::Display for UniqueIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.external_id {
            Some(label) => write!(f, "{label}_{}", self.id),
            None => f.write_str(&self.id),
        }
    }
}

impl fmt::Debug for UniqueIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueIdentifier({self})")
    }
}

impl FromStr for UniqueIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (external_id, id) = match s.rsplit_once('_') {
            Some((label, id)) => (Some(label.to_string()), id),
            None => (None, s),
        };
        if id.len() != 32 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid unique identifier: {s}"));
        }
        Ok(Self {
            external_id,
            id: id.to_ascii_lowercase(),
        })
    }
}

/// Pointer to one output of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    /// Id of the transaction that produced the state.
    pub txhash: SecureHash,
    /// Output index within that transaction.
    pub index: u32,
}

impl StateRef {
    /// Creates a reference to output `index` of `txhash`.
    pub fn new(txhash: SecureHash, index: u32) -> Self {
        Self { txhash, index }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.txhash, self.index)
    }
}

/// A funding goal managed by a single party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Campaign {
    /// Logical id, unchanged across versions.
    pub linear_id: UniqueIdentifier,
    /// Human-readable campaign name.
    pub name: String,
    /// Funding target.
    pub target: Amount,
    /// Party that manages the campaign and countersigns every pledge.
    pub manager: Party,
    /// Unix timestamp (ms) after which no pledge may be accepted.
    pub deadline_ms: u64,
    /// Running total of accepted pledges.
    pub raised_so_far: Amount,
}

impl Campaign {
    /// A new campaign with nothing raised yet.
    pub fn new(name: impl Into<String>, target: Amount, manager: Party, deadline_ms: u64) -> Self {
        let raised_so_far = Amount::zero(target.currency.clone());
        Self {
            linear_id: UniqueIdentifier::random(),
            name: name.into(),
            target,
            manager,
            deadline_ms,
            raised_so_far,
        }
    }

    /// Keys that must learn about every version of this campaign.
    pub fn participants(&self) -> Vec<PublicKey> {
        vec![self.manager.owning_key]
    }
}

/// An immutable record of an amount pledged to a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pledge {
    /// Unique id of the pledge.
    pub linear_id: UniqueIdentifier,
    /// Logical id of the campaign pledged to.
    pub campaign_reference: UniqueIdentifier,
    /// One-time key standing in for the pledger.
    pub pledger: AnonymousParty,
    /// Pledged amount.
    pub amount: Amount,
}

impl Pledge {
    /// A new pledge with a fresh id.
    pub fn new(campaign_reference: UniqueIdentifier, pledger: AnonymousParty, amount: Amount) -> Self {
        Self {
            linear_id: UniqueIdentifier::random(),
            campaign_reference,
            pledger,
            amount,
        }
    }

    /// Keys that must learn about this pledge.
    pub fn participants(&self, manager: &Party) -> Vec<PublicKey> {
        vec![self.pledger.owning_key, manager.owning_key]
    }
}

/// Any state the crowdfunding ledger understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContractState {
    /// A campaign version.
    Campaign(Campaign),
    /// A pledge.
    Pledge(Pledge),
}

impl ContractState {
    /// Logical id of the wrapped state.
    pub fn linear_id(&self) -> &UniqueIdentifier {
        match self {
            Self::Campaign(campaign) => &campaign.linear_id,
            Self::Pledge(pledge) => &pledge.linear_id,
        }
    }

    /// Short type label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Campaign(_) => "campaign",
            Self::Pledge(_) => "pledge",
        }
    }
}

/// Typed access to a variant of [`ContractState`].
pub trait StateKind: Sized + Clone {
    /// Borrows the variant if `state` holds one.
    fn from_state(state: &ContractState) -> Option<&Self>;
}

impl StateKind for Campaign {
    fn from_state(state: &ContractState) -> Option<&Self> {
        match state {
            ContractState::Campaign(campaign) => Some(campaign),
            _ => None,
        }
    }
}

impl StateKind for Pledge {
    fn from_state(state: &ContractState) -> Option<&Self> {
        match state {
            ContractState::Pledge(pledge) => Some(pledge),
            _ => None,
        }
    }
}

impl From<Campaign> for ContractState {
    fn from(campaign: Campaign) -> Self {
        Self::Campaign(campaign)
    }
}

impl From<Pledge> for ContractState {
    fn from(pledge: Pledge) -> Self {
        Self::Pledge(pledge)
    }
}

/// A state together with the reference it was produced at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAndRef<T = ContractState> {
    /// The state data.
    pub state: T,
    /// Where the state was produced.
    pub reference: StateRef,
}

impl StateAndRef<ContractState> {
    /// Narrows to a typed state, if the variant matches.
    pub fn downcast<T: StateKind>(&self) -> Option<StateAndRef<T>> {
        T::from_state(&self.state).map(|state| StateAndRef {
            state: state.clone(),
            reference: self.reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyMaterial;

    fn manager() -> Party {
        Party::new("PartyA", KeyMaterial::generate().public_key())
    }

    #[test]
    fn unique_identifier_roundtrips_through_display() {
        let plain = UniqueIdentifier::random();
        assert_eq!(plain.to_string().parse::<UniqueIdentifier>().unwrap(), plain);
        let labelled = UniqueIdentifier::with_external_id("rogers_campaign");
        assert_eq!(labelled.to_string().parse::<UniqueIdentifier>().unwrap(), labelled);
        assert!("not-an-id".parse::<UniqueIdentifier>().is_err());
    }

    #[test]
    fn new_campaign_starts_at_zero() {
        let campaign = Campaign::new("Roger's Campaign", Amount::pounds(1000), manager(), 10);
        assert_eq!(campaign.raised_so_far, Amount::zero("GBP"));
        assert_eq!(campaign.participants(), vec![campaign.manager.owning_key]);
    }

    #[test]
    fn contract_state_is_tagged() {
        let campaign = Campaign::new("Tagged", Amount::pounds(5), manager(), 10);
        let json = serde_json::to_value(ContractState::from(campaign.clone())).unwrap();
        assert_eq!(json["type"], "campaign");
        let back: ContractState = serde_json::from_value(json).unwrap();
        assert_eq!(Campaign::from_state(&back), Some(&campaign));
        assert!(Pledge::from_state(&back).is_none());
    }
}
