//! Multi-party flows: campaign start, pledging, and the responders that
//! answer them.
//!
//! Each flow runs as a tokio task on its initiating [`Node`](crate::net::Node)
//! and talks to counterparties only through signed envelopes.

#![cfg(feature = "net")]

/// Campaign issuance.
pub mod campaign;
/// Concurrent all-or-nothing signature collection.
pub mod collect;
/// Notarisation and per-recipient distribution.
pub mod finality;
/// The pledge state machine.
pub mod pledge;
/// Counterparty handlers for incoming flow messages.
pub mod responders;

use thiserror::Error;

use crate::amount::AmountError;
use crate::contract::RuleViolation;
use crate::identity::IdentityError;
use crate::net::schema::EnvelopeError;
use crate::net::transport::TransportError;
use crate::notary::StateConflict;
use crate::states::{Campaign, StateAndRef, StateRef, UniqueIdentifier};
use crate::store::StoreError;
use crate::transaction::{FinalizedTransaction, SignatureError};

pub use campaign::start_campaign;
pub use collect::{collect_signatures, CounterpartySession};
pub use finality::{distribute, notarise, DeliveryStatus, DistributionReport, RecipientOutcome};
pub use pledge::{PledgeFlow, PledgeHandle, PledgeReceipt, PledgeStage};

/// Why a flow did not produce a finalized transaction.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("campaign {0} is unknown or has no current version on this node")]
    /// The campaign has no current version in the local store.
    StaleOrUnknownCampaign(UniqueIdentifier),
    #[error("{party} rejected the proposal: {reason}")]
    /// A counterparty refused to sign.
    CounterpartyRejected {
        /// Refusing party.
        party: String,
        /// Their stated reason.
        reason: String,
    },
    #[error("{} input(s) already consumed by another transaction", conflicts.len())]
    /// The notary saw the inputs consumed by a competing transaction.
    InputAlreadyConsumed {
        /// Contested inputs and their consumers.
        conflicts: Vec<StateConflict>,
        /// Campaign head after the conflict, once the versions missed have
        /// been fetched from the manager; `None` when no newer version could
        /// be obtained.
        current: Option<StateAndRef<Campaign>>,
    },
    #[error("unknown state reference {0}")]
    /// A reference could not be resolved from the local store.
    UnknownReference(StateRef),
    #[error(transparent)]
    /// Any other store failure.
    Store(StoreError),
    #[error(transparent)]
    /// The local verifier rejected the transaction.
    ContractViolation(#[from] RuleViolation),
    #[error(transparent)]
    /// An identity certificate was invalid or conflicting.
    Identity(#[from] IdentityError),
    #[error(transparent)]
    /// A signature was missing or invalid.
    Signature(#[from] SignatureError),
    #[error("notary refused: {0}")]
    /// The notary refused for a reason other than input consumption.
    Notary(String),
    #[error(transparent)]
    /// Routing failed.
    Transport(#[from] TransportError),
    #[error(transparent)]
    /// A message could not be sealed or authenticated.
    Envelope(#[from] EnvelopeError),
    #[error("{party} replied with an unexpected {reply} message")]
    /// A counterparty answered with the wrong message kind.
    UnexpectedReply {
        /// Replying party.
        party: String,
        /// Kind of message received.
        reply: &'static str,
    },
    #[error("transaction {} is final but participant {party} did not record it: {reason}", transaction.id().short())]
    /// A transaction participant did not record the finalized transaction.
    ///
    /// The notary has already consumed the inputs and the sender has
    /// recorded the outputs, so the transaction travels with the error.
    DistributionFailed {
        /// Participant that failed to record.
        party: String,
        /// Refusal or transport failure.
        reason: String,
        /// The finalized transaction.
        transaction: Box<FinalizedTransaction>,
    },
    #[error(transparent)]
    /// Amount arithmetic failed.
    Amount(#[from] AmountError),
    #[error("flow task ended abnormally: {0}")]
    /// The flow task panicked or was cancelled.
    Aborted(String),
}

impl FlowError {
    /// The finalized transaction, when the ledger advanced despite the error.
    pub fn finalized(&self) -> Option<&FinalizedTransaction> {
        match self {
            Self::DistributionFailed { transaction, .. } => Some(&**transaction),
            _ => None,
        }
    }
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownReference(reference) => Self::UnknownReference(reference),
            other => Self::Store(other),
        }
    }
}
