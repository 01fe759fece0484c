#![cfg(feature = "net")]

use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::contract::ContractVerifier;
use crate::data::SecureHash;
use crate::flows::{self, responders, FlowError, PledgeFlow, PledgeHandle};
use crate::identity::IdentityService;
use crate::keys::KeyMaterial;
use crate::net::schema::{FlowMessage, MessageEnvelope};
use crate::net::transport::{Delivery, Network, TransportError};
use crate::party::{AnonymousParty, Party};
use crate::states::{Campaign, ContractState, Pledge, StateAndRef, StateKind, StateRef, UniqueIdentifier};
use crate::store::{CommitOutcome, LedgerStore, StoreError};
use crate::transaction::{FinalizedTransaction, LedgerTransaction, WireTransaction};

#[derive(Debug)]
struct NodeInner {
    party: Party,
    keys: KeyMaterial,
    notary: Party,
    distribution_list: Vec<String>,
    store: RwLock<LedgerStore>,
    identity: RwLock<IdentityService>,
    verifier: Arc<dyn ContractVerifier>,
    network: Network,
    commits: watch::Sender<u64>,
}

/// A ledger participant: its store, identities, verifier and mailbox.
///
/// Cloning is cheap; every clone drives the same node.
#[derive(Debug, Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Attaches a node named `name` to `network` and starts its dispatcher.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn spawn(
        name: &str,
        keys: KeyMaterial,
        notary: Party,
        distribution_list: Vec<String>,
        network: Network,
        verifier: Arc<dyn ContractVerifier>,
    ) -> Result<Self, TransportError> {
        let party = Party::new(name, keys.public_key());
        let inbox = network.attach(party.clone()).await?;
        let identity = IdentityService::new(party.clone(), &keys);
        let node = Self {
            inner: Arc::new(NodeInner {
                party,
                keys,
                notary,
                distribution_list,
                store: RwLock::new(LedgerStore::new()),
                identity: RwLock::new(identity),
                verifier,
                network,
                commits: watch::Sender::new(0),
            }),
        };
        tokio::spawn(node.clone().dispatch(inbox));
        info!(
            party = %node.party(),
            verifier = node.inner.verifier.name(),
            observers = node.inner.distribution_list.len(),
            "node started"
        );
        Ok(node)
    }

    /// The node's well-known identity.
    pub fn party(&self) -> &Party {
        &self.inner.party
    }

    /// Notary every transaction built here names.
    pub fn notary(&self) -> &Party {
        &self.inner.notary
    }

    /// Observers receiving broadcast transactions, by name.
    pub fn distribution_list(&self) -> &[String] {
        &self.inner.distribution_list
    }

    /// The network this node is attached to.
    pub fn network(&self) -> &Network {
        &self.inner.network
    }

    /// Directory entries for the distribution list; unknown names are skipped.
    pub(crate) async fn observers(&self) -> Vec<Party> {
        let mut observers = Vec::new();
        for name in &self.inner.distribution_list {
            match self.inner.network.party(name).await {
                Some(party) => observers.push(party),
                None => warn!(party = %self.party(), observer = %name, "observer not in network directory"),
            }
        }
        observers
    }

    pub(crate) fn keys(&self) -> &KeyMaterial {
        &self.inner.keys
    }

    pub(crate) fn verifier(&self) -> &dyn ContractVerifier {
        self.inner.verifier.as_ref()
    }

    pub(crate) fn identity(&self) -> &RwLock<IdentityService> {
        &self.inner.identity
    }

    pub(crate) fn store(&self) -> &RwLock<LedgerStore> {
        &self.inner.store
    }

    /// Ticks once per newly recorded transaction.
    pub(crate) fn commits(&self) -> watch::Receiver<u64> {
        self.inner.commits.subscribe()
    }

    /// Pledges `amount` to `campaign_id` and waits for the result.
    ///
    /// With `broadcast` the finalized transaction also goes to every party on
    /// this node's distribution list; otherwise only the manager receives it.
    pub async fn make_pledge(
        &self,
        amount: Amount,
        campaign_id: &UniqueIdentifier,
        broadcast: bool,
    ) -> Result<FinalizedTransaction, FlowError> {
        self.start_pledge(amount, campaign_id.clone(), broadcast)
            .outcome()
            .await
            .map(|receipt| receipt.transaction)
    }

    /// Spawns a pledge flow and returns a handle exposing its progress.
    pub fn start_pledge(&self, amount: Amount, campaign_id: UniqueIdentifier, broadcast: bool) -> PledgeHandle {
        PledgeFlow::new(self.clone(), amount, campaign_id, broadcast).spawn()
    }

    /// Issues a new campaign managed by this node and distributes it to the
    /// distribution list.
    pub async fn start_campaign(
        &self,
        name: &str,
        target: Amount,
        deadline_ms: u64,
    ) -> Result<FinalizedTransaction, FlowError> {
        flows::start_campaign(self, name, target, deadline_ms).await
    }

    /// Resolves `reference` from the local store.
    pub async fn load_state(&self, reference: &StateRef) -> Result<ContractState, StoreError> {
        self.inner.store.read().await.resolve(reference).cloned()
    }

    /// Resolves `reference` and narrows it to `T`.
    pub async fn load_state_as<T: StateKind>(&self, reference: &StateRef) -> Result<StateAndRef<T>, StoreError> {
        self.inner.store.read().await.resolve_as(reference)
    }

    /// Real identity behind a one-time key, when this node was told it.
    pub async fn well_known_party_from_anonymous(&self, anonymous: &AnonymousParty) -> Option<Party> {
        self.inner
            .identity
            .read()
            .await
            .resolve(&anonymous.owning_key)
            .cloned()
    }

    /// Current version of a campaign as this node knows it.
    pub async fn current_campaign(
        &self,
        linear_id: &UniqueIdentifier,
    ) -> Result<Option<StateAndRef<Campaign>>, StoreError> {
        self.inner.store.read().await.current_campaign(linear_id)
    }

    /// Pledges recorded here against `campaign`.
    pub async fn pledges_for(&self, campaign: &UniqueIdentifier) -> Vec<StateAndRef<Pledge>> {
        self.inner.store.read().await.pledges_for(campaign)
    }

    /// A recorded transaction by id.
    pub async fn transaction(&self, id: &SecureHash) -> Option<FinalizedTransaction> {
        self.inner.store.read().await.transaction(id).cloned()
    }

    /// Number of transactions recorded here.
    pub async fn transaction_count(&self) -> usize {
        self.inner.store.read().await.transaction_count()
    }

    /// Resolves `wtx` against the local store and runs the verifier.
    pub(crate) async fn verify_locally(&self, wtx: &WireTransaction) -> Result<LedgerTransaction, FlowError> {
        let ltx = {
            let store = self.inner.store.read().await;
            wtx.to_ledger_transaction(|reference| store.resolve(reference).cloned())?
        };
        self.inner.verifier.verify(&ltx)?;
        Ok(ltx)
    }

    /// Re-verifies a finalized transaction and commits it.
    ///
    /// Inputs must resolve locally; a transaction whose history this node
    /// never received is refused.
    pub(crate) async fn verify_and_record(&self, ftx: &FinalizedTransaction) -> Result<CommitOutcome, FlowError> {
        if ftx.tx().notary != self.inner.notary {
            return Err(FlowError::Notary(format!(
                "transaction names untrusted notary {}",
                ftx.tx().notary
            )));
        }
        ftx.signed().verify_required_signatures()?;
        let mut store = self.inner.store.write().await;
        if store.transaction(&ftx.id()).is_some() {
            return Ok(CommitOutcome::AlreadyKnown);
        }
        let ltx = ftx
            .tx()
            .to_ledger_transaction(|reference| store.resolve(reference).cloned())?;
        self.inner.verifier.verify(&ltx)?;
        let outcome = store.commit(ftx);
        if outcome == CommitOutcome::Recorded {
            self.inner.commits.send_modify(|count| *count += 1);
        }
        Ok(outcome)
    }

    /// Sends `message` to `to` and authenticates the reply.
    pub(crate) async fn request(&self, to: &Party, message: &FlowMessage) -> Result<FlowMessage, FlowError> {
        let envelope = self.seal(&to.name, message)?;
        let reply = self.inner.network.request(&to.name, envelope).await?;
        Ok(reply.open(to, &self.inner.party.name)?)
    }

    fn seal(&self, to: &str, message: &FlowMessage) -> Result<MessageEnvelope, FlowError> {
        Ok(MessageEnvelope::seal(
            &self.inner.party,
            &self.inner.keys.signing,
            to,
            message,
        )?)
    }

    async fn dispatch(self, mut inbox: mpsc::Receiver<Delivery>) {
        while let Some(delivery) = inbox.recv().await {
            let node = self.clone();
            tokio::spawn(async move { node.respond(delivery).await });
        }
        debug!(party = %self.party(), "mailbox closed");
    }

    async fn respond(&self, delivery: Delivery) {
        let Delivery { envelope, reply } = delivery;
        let Some(sender) = self.inner.network.party(&envelope.sender).await else {
            warn!(party = %self.party(), sender = %envelope.sender, "dropping envelope from unknown sender");
            return;
        };
        let message = match envelope.open(&sender, &self.inner.party.name) {
            Ok(message) => message,
            Err(err) => {
                warn!(party = %self.party(), sender = %sender, %err, "dropping unauthenticated envelope");
                return;
            }
        };
        let response = match message {
            FlowMessage::SignatureRequest {
                flow_id,
                transaction,
                identities,
            } => FlowMessage::SignatureResponse {
                outcome: responders::sign_proposal(self, &sender, &flow_id, transaction, identities).await,
            },
            FlowMessage::Finalized { transaction } => FlowMessage::FinalityAck {
                outcome: responders::receive_finalized(self, &sender, &transaction).await,
            },
            FlowMessage::CampaignHeadRequest { campaign_id, since } => FlowMessage::CampaignHeadResponse {
                outcome: responders::serve_campaign_head(self, &sender, &campaign_id, &since).await,
            },
            other => {
                warn!(party = %self.party(), sender = %sender, kind = other.kind(), "no responder for message");
                return;
            }
        };
        match self.seal(&sender.name, &response) {
            Ok(envelope) => {
                if reply.send(envelope).is_err() {
                    debug!(party = %self.party(), sender = %sender, "requester went away before the reply");
                }
            }
            Err(err) => warn!(party = %self.party(), %err, "failed to seal reply"),
        }
    }
}
