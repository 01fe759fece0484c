#![cfg(feature = "net")]

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::keys::KeyMaterial;
use crate::net::schema::{FlowMessage, MessageEnvelope, NotarisationOutcome};
use crate::net::transport::{Delivery, Network, TransportError};
use crate::notary::{OrderingOracle, UniquenessProvider};
use crate::party::Party;
use crate::transaction::{SignedTransaction, TransactionSignature};

/// Milliseconds since the unix epoch by the local clock.
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
struct NotaryInner<O> {
    party: Party,
    keys: KeyMaterial,
    oracle: Mutex<O>,
    network: Network,
}

/// Network-facing notary: checks signatures and time windows, orders inputs
/// through an [`OrderingOracle`] and signs acceptances.
#[derive(Debug)]
pub struct NotaryNode<O = UniquenessProvider> {
    inner: Arc<NotaryInner<O>>,
}

impl<O> Clone for NotaryNode<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl NotaryNode<UniquenessProvider> {
    /// Starts a notary backed by an in-memory [`UniquenessProvider`].
    pub async fn spawn(name: &str, keys: KeyMaterial, network: Network) -> Result<Self, TransportError> {
        Self::spawn_with_oracle(name, keys, network, UniquenessProvider::new()).await
    }
}

impl<O: OrderingOracle + 'static> NotaryNode<O> {
    /// Starts a notary backed by `oracle`.
    pub async fn spawn_with_oracle(
        name: &str,
        keys: KeyMaterial,
        network: Network,
        oracle: O,
    ) -> Result<Self, TransportError> {
        let party = Party::new(name, keys.public_key());
        let inbox = network.attach(party.clone()).await?;
        let notary = Self {
            inner: Arc::new(NotaryInner {
                party,
                keys,
                oracle: Mutex::new(oracle),
                network,
            }),
        };
        tokio::spawn(notary.clone().serve(inbox));
        info!(notary = %notary.party(), "notary started");
        Ok(notary)
    }

    /// The notary's well-known identity.
    pub fn party(&self) -> &Party {
        &self.inner.party
    }

    async fn serve(self, mut inbox: mpsc::Receiver<Delivery>) {
        while let Some(delivery) = inbox.recv().await {
            let notary = self.clone();
            tokio::spawn(async move { notary.respond(delivery).await });
        }
    }

    async fn respond(&self, delivery: Delivery) {
        let Delivery { envelope, reply } = delivery;
        let Some(sender) = self.inner.network.party(&envelope.sender).await else {
            warn!(sender = %envelope.sender, "notary dropping envelope from unknown sender");
            return;
        };
        let transaction = match envelope.open(&sender, &self.inner.party.name) {
            Ok(FlowMessage::NotarisationRequest { transaction }) => transaction,
            Ok(other) => {
                warn!(sender = %sender, kind = other.kind(), "notary ignoring message");
                return;
            }
            Err(err) => {
                warn!(sender = %sender, %err, "notary dropping unauthenticated envelope");
                return;
            }
        };
        let response = FlowMessage::NotarisationResponse {
            outcome: self.notarise(&sender, &transaction).await,
        };
        match MessageEnvelope::seal(&self.inner.party, &self.inner.keys.signing, &sender.name, &response) {
            Ok(sealed) => {
                if reply.send(sealed).is_err() {
                    debug!(sender = %sender, "requester went away before the notary replied");
                }
            }
            Err(err) => warn!(%err, "notary failed to seal reply"),
        }
    }

    /// Decides on a notarisation request.
    pub async fn notarise(&self, requester: &Party, stx: &SignedTransaction) -> NotarisationOutcome {
        let id = stx.id();
        let me = &self.inner.party;
        if stx.tx.notary != *me {
            return NotarisationOutcome::Rejected {
                reason: format!("transaction names notary {}", stx.tx.notary),
            };
        }
        if let Err(err) = stx.verify_signatures_except(&[me.owning_key]) {
            warn!(tx = %id.short(), requester = %requester, %err, "notarisation refused");
            return NotarisationOutcome::Rejected {
                reason: err.to_string(),
            };
        }
        let now = unix_time_ms();
        if let Some(window) = stx.tx.time_window {
            if !window.contains(now) {
                warn!(tx = %id.short(), requester = %requester, now, "outside time window");
                return NotarisationOutcome::Rejected {
                    reason: format!("time window does not contain notary time {now}"),
                };
            }
        }
        let ordered = self.inner.oracle.lock().await.order(&id, &stx.tx.inputs);
        match ordered {
            Ok(()) => {
                info!(tx = %id.short(), requester = %requester, inputs = stx.tx.inputs.len(), "notarised");
                NotarisationOutcome::Accepted(TransactionSignature::sign(&self.inner.keys.signing, &id))
            }
            Err(conflict) => {
                warn!(tx = %id.short(), requester = %requester, %conflict, "double spend refused");
                NotarisationOutcome::Conflict(conflict.conflicts)
            }
        }
    }
}
