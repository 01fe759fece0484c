//! Per-node record store.
//!
//! Every node keeps only the finalized transactions it was sent.  A
//! [`StateRef`] introduced by a transaction the node never received is
//! unknown here and stays unknown; resolution fails closed with
//! [`StoreError::UnknownReference`].

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::data::SecureHash;
use crate::states::{Campaign, ContractState, Pledge, StateAndRef, StateKind, StateRef, UniqueIdentifier};
use crate::transaction::FinalizedTransaction;

/// Errors raised by the record store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown state reference {0}")]
    /// The reference was introduced by a transaction this node never received.
    UnknownReference(StateRef),
    #[error("state {reference} is a {found}, not a {expected}")]
    /// The reference resolved to a different state type than requested.
    WrongType {
        /// Reference that was resolved.
        reference: StateRef,
        /// Requested type.
        expected: &'static str,
        /// Actual state type.
        found: &'static str,
    },
    #[error("store corrupted: {0}")]
    /// Internal indexes disagree; never produced for missing data.
    Corrupted(String),
}

/// Result of committing a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The transaction was new and its outputs are now resolvable.
    Recorded,
    /// The transaction was already known; nothing changed.
    AlreadyKnown,
}

/// Local copy of every finalized transaction a node has received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStore {
    transactions: HashMap<SecureHash, FinalizedTransaction>,
    states: HashMap<StateRef, ContractState>,
    consumed: HashSet<StateRef>,
    heads: HashMap<UniqueIdentifier, StateRef>,
}

impl LedgerStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `ftx`.  Committing a known transaction is a no-op.
    ///
    /// The caller is expected to have verified the transaction; the store
    /// only maintains indexes.
    pub fn commit(&mut self, ftx: &FinalizedTransaction) -> CommitOutcome {
        let id = ftx.id();
        if self.transactions.contains_key(&id) {
            return CommitOutcome::AlreadyKnown;
        }
        for input in &ftx.tx().inputs {
            self.consumed.insert(*input);
            if let Some(state) = self.states.get(input) {
                let linear_id = state.linear_id();
                if self.heads.get(linear_id) == Some(input) {
                    self.heads.remove(linear_id);
                }
            }
        }
        for (idx, output) in ftx.tx().outputs.iter().enumerate() {
            let reference = StateRef::new(id, idx as u32);
            if !self.consumed.contains(&reference) {
                self.heads.insert(output.linear_id().clone(), reference);
            }
            self.states.insert(reference, output.clone());
        }
        self.transactions.insert(id, ftx.clone());
        debug!(tx = %id.short(), outputs = ftx.tx().outputs.len(), "committed transaction");
        CommitOutcome::Recorded
    }

    /// Resolves a reference to the state it names.
    pub fn resolve(&self, reference: &StateRef) -> Result<&ContractState, StoreError> {
        self.states
            .get(reference)
            .ok_or(StoreError::UnknownReference(*reference))
    }

    /// Resolves a reference and narrows it to `T`.
    pub fn resolve_as<T: StateKind>(&self, reference: &StateRef) -> Result<StateAndRef<T>, StoreError> {
        let state = self.resolve(reference)?;
        T::from_state(state)
            .map(|typed| StateAndRef {
                state: typed.clone(),
                reference: *reference,
            })
            .ok_or_else(|| StoreError::WrongType {
                reference: *reference,
                expected: std::any::type_name::<T>(),
                found: state.kind(),
            })
    }

    /// Current (unconsumed) version of the linear state `linear_id`.
    pub fn current<T: StateKind>(&self, linear_id: &UniqueIdentifier) -> Result<Option<StateAndRef<T>>, StoreError> {
        let Some(reference) = self.heads.get(linear_id) else {
            return Ok(None);
        };
        let state = self.states.get(reference).ok_or_else(|| {
            StoreError::Corrupted(format!("head {reference} of {linear_id} has no state"))
        })?;
        Ok(T::from_state(state).map(|typed| StateAndRef {
            state: typed.clone(),
            reference: *reference,
        }))
    }

    /// Current version of a campaign.
    pub fn current_campaign(&self, linear_id: &UniqueIdentifier) -> Result<Option<StateAndRef<Campaign>>, StoreError> {
        self.current(linear_id)
    }

    /// Every pledge recorded here against `campaign`.
    pub fn pledges_for(&self, campaign: &UniqueIdentifier) -> Vec<StateAndRef<Pledge>> {
        let mut pledges: Vec<StateAndRef<Pledge>> = self
            .states
            .iter()
            .filter_map(|(reference, state)| match state {
                ContractState::Pledge(pledge) if &pledge.campaign_reference == campaign => {
                    Some(StateAndRef {
                        state: pledge.clone(),
                        reference: *reference,
                    })
                }
                _ => None,
            })
            .collect();
        pledges.sort_by(|a, b| a.reference.cmp(&b.reference));
        pledges
    }

    /// Transactions that carried `linear_id` from `since` to the head held
    /// here, oldest first.
    ///
    /// Empty when `since` is the head itself; `None` when `since` is not an
    /// ancestor of the head or part of the chain is missing locally.
    pub fn history_since(&self, linear_id: &UniqueIdentifier, since: &StateRef) -> Option<Vec<FinalizedTransaction>> {
        let mut cursor = *self.heads.get(linear_id)?;
        let mut chain = Vec::new();
        while cursor != *since {
            let ftx = self.transactions.get(&cursor.txhash)?;
            cursor = *ftx.tx().inputs.iter().find(|input| {
                self.states
                    .get(input)
                    .is_some_and(|state| state.linear_id() == linear_id)
            })?;
            chain.push(ftx.clone());
        }
        chain.reverse();
        Some(chain)
    }

    /// True when `reference` has been consumed by a transaction recorded here.
    pub fn is_consumed(&self, reference: &StateRef) -> bool {
        self.consumed.contains(reference)
    }

    /// A recorded transaction by id.
    pub fn transaction(&self, id: &SecureHash) -> Option<&FinalizedTransaction> {
        self.transactions.get(id)
    }

    /// Number of recorded transactions.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::keys::KeyMaterial;
    use crate::party::Party;
    use crate::transaction::{CommandData, SignedTransaction, TimeWindow, TransactionBuilder};
    use proptest::prelude::*;

    struct Keys {
        manager: KeyMaterial,
        notary: KeyMaterial,
    }

    impl Keys {
        fn new() -> Self {
            Self {
                manager: KeyMaterial::generate(),
                notary: KeyMaterial::generate(),
            }
        }

        fn manager(&self) -> Party {
            Party::new("PartyA", self.manager.public_key())
        }

        fn notary(&self) -> Party {
            Party::new("Notary", self.notary.public_key())
        }

        fn finalize(&self, builder: TransactionBuilder, extra: &[&KeyMaterial]) -> FinalizedTransaction {
            let mut stx = SignedTransaction::new(builder.to_wire_transaction())
                .sign_with(&self.manager.signing);
            for key in extra {
                stx = stx.sign_with(&key.signing);
            }
            FinalizedTransaction::from_signed(stx.sign_with(&self.notary.signing)).unwrap()
        }
    }

    fn start(keys: &Keys, target: u64) -> (FinalizedTransaction, Campaign) {
        let campaign = Campaign::new("Roger's Campaign", Amount::pounds(target), keys.manager(), 9_000);
        let ftx = keys.finalize(
            TransactionBuilder::new(keys.notary())
                .add_output_state(campaign.clone())
                .add_command(CommandData::StartCampaign, [keys.manager.public_key()])
                .set_time_window(TimeWindow::until(campaign.deadline_ms)),
            &[],
        );
        (ftx, campaign)
    }

    fn pledge(keys: &Keys, current: &StateAndRef<Campaign>, amount: u64) -> FinalizedTransaction {
        let pledger = KeyMaterial::generate();
        let amount = Amount::pounds(amount);
        let mut next = current.state.clone();
        next.raised_so_far = next.raised_so_far.checked_add(&amount).unwrap();
        let pledge = Pledge::new(
            current.state.linear_id.clone(),
            crate::party::AnonymousParty::new(pledger.public_key()),
            amount,
        );
        let signers = [keys.manager.public_key(), pledger.public_key()];
        keys.finalize(
            TransactionBuilder::new(keys.notary())
                .add_input_state(current)
                .add_output_state(next)
                .add_output_state(pledge)
                .add_command(CommandData::AcceptPledge, signers)
                .add_command(CommandData::CreatePledge, signers)
                .set_time_window(TimeWindow::until(current.state.deadline_ms)),
            &[&pledger],
        )
    }

    #[test]
    fn unknown_reference_fails_closed() {
        let keys = Keys::new();
        let (ftx, _) = start(&keys, 1000);
        let store = LedgerStore::new();
        assert_eq!(
            store.resolve(&ftx.tx().out_ref(0)),
            Err(StoreError::UnknownReference(ftx.tx().out_ref(0)))
        );
    }

    #[test]
    fn heads_follow_consumption() {
        let keys = Keys::new();
        let (issue, campaign) = start(&keys, 1000);
        let mut store = LedgerStore::new();
        assert_eq!(store.commit(&issue), CommitOutcome::Recorded);
        let v1 = store.current_campaign(&campaign.linear_id).unwrap().unwrap();
        let accept = pledge(&keys, &v1, 100);
        store.commit(&accept);
        let v2 = store.current_campaign(&campaign.linear_id).unwrap().unwrap();
        assert_eq!(v2.reference, accept.tx().out_ref(0));
        assert_eq!(v2.state.raised_so_far, Amount::pounds(100));
        assert!(store.is_consumed(&v1.reference));
        // Consumed versions remain resolvable history.
        assert!(store.resolve(&v1.reference).is_ok());
        assert_eq!(store.pledges_for(&campaign.linear_id).len(), 1);
    }

    #[test]
    fn missing_predecessor_does_not_leak_into_resolution() {
        let keys = Keys::new();
        let (issue, campaign) = start(&keys, 1000);
        let mut full = LedgerStore::new();
        full.commit(&issue);
        let v1 = full.current_campaign(&campaign.linear_id).unwrap().unwrap();
        let hidden = pledge(&keys, &v1, 100);
        full.commit(&hidden);
        let v2 = full.current_campaign(&campaign.linear_id).unwrap().unwrap();
        let visible = pledge(&keys, &v2, 50);

        let mut partial = LedgerStore::new();
        partial.commit(&issue);
        partial.commit(&visible);
        for idx in 0..2 {
            assert!(matches!(
                partial.resolve(&hidden.tx().out_ref(idx)),
                Err(StoreError::UnknownReference(_))
            ));
        }
    }

    #[test]
    fn history_runs_from_a_consumed_version_to_the_head() {
        let keys = Keys::new();
        let (issue, campaign) = start(&keys, 1000);
        let mut store = LedgerStore::new();
        store.commit(&issue);
        let v1 = store.current_campaign(&campaign.linear_id).unwrap().unwrap();
        let first = pledge(&keys, &v1, 100);
        store.commit(&first);
        let v2 = store.current_campaign(&campaign.linear_id).unwrap().unwrap();
        let second = pledge(&keys, &v2, 50);
        store.commit(&second);
        let v3 = store.current_campaign(&campaign.linear_id).unwrap().unwrap();

        assert_eq!(
            store.history_since(&campaign.linear_id, &v1.reference),
            Some(vec![first.clone(), second.clone()])
        );
        assert_eq!(store.history_since(&campaign.linear_id, &v2.reference), Some(vec![second]));
        assert_eq!(store.history_since(&campaign.linear_id, &v3.reference), Some(Vec::new()));
        // A pledge output is not a campaign version.
        assert_eq!(store.history_since(&campaign.linear_id, &first.tx().out_ref(1)), None);
    }

    #[test]
    fn history_needs_every_link() {
        let keys = Keys::new();
        let (issue, campaign) = start(&keys, 1000);
        let mut full = LedgerStore::new();
        full.commit(&issue);
        let v1 = full.current_campaign(&campaign.linear_id).unwrap().unwrap();
        let hidden = pledge(&keys, &v1, 100);
        full.commit(&hidden);
        let v2 = full.current_campaign(&campaign.linear_id).unwrap().unwrap();
        let visible = pledge(&keys, &v2, 50);

        let mut partial = LedgerStore::new();
        partial.commit(&issue);
        partial.commit(&visible);
        assert_eq!(partial.history_since(&campaign.linear_id, &v1.reference), None);
    }

    #[test]
    fn wrong_type_is_distinct_from_unknown() {
        let keys = Keys::new();
        let (issue, _) = start(&keys, 10);
        let mut store = LedgerStore::new();
        store.commit(&issue);
        assert!(matches!(
            store.resolve_as::<Pledge>(&issue.tx().out_ref(0)),
            Err(StoreError::WrongType { .. })
        ));
    }

    proptest! {
        #[test]
        fn commit_is_idempotent(target in 1u64..10_000, amounts in proptest::collection::vec(1u64..500, 0..4)) {
            let keys = Keys::new();
            let (issue, campaign) = start(&keys, target);
            let mut store = LedgerStore::new();
            store.commit(&issue);
            let mut history = vec![issue];
            for amount in amounts {
                let current = store.current_campaign(&campaign.linear_id).unwrap().unwrap();
                let next = pledge(&keys, &current, amount);
                store.commit(&next);
                history.push(next);
            }
            let snapshot = store.clone();
            for ftx in &history {
                prop_assert_eq!(store.commit(ftx), CommitOutcome::AlreadyKnown);
            }
            prop_assert_eq!(&store, &snapshot);
        }
    }
}
