#![cfg(feature = "net")]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::trace;

use crate::net::schema::MessageEnvelope;
use crate::party::{Party, PublicKey};

/// Bound on queued deliveries per mailbox.
pub const MAILBOX_CAPACITY: usize = 64;

/// An envelope waiting in a mailbox, with the channel for its reply.
#[derive(Debug)]
pub struct Delivery {
    /// The signed request.
    pub envelope: MessageEnvelope,
    /// Where the responder sends its signed reply.
    pub reply: oneshot::Sender<MessageEnvelope>,
}

/// Routing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("unknown party {0}")]
    /// No mailbox is registered under the name.
    UnknownParty(String),
    #[error("party {0} is already attached")]
    /// A second node tried to register an existing name.
    DuplicateParty(String),
    #[error("mailbox of {0} is closed")]
    /// The recipient's dispatcher has stopped.
    Disconnected(String),
    #[error("{0} dropped the request without replying")]
    /// The responder gave up without an answer.
    NoReply(String),
}

#[derive(Debug, Default)]
struct Directory {
    parties: BTreeMap<String, Party>,
    mailboxes: HashMap<String, mpsc::Sender<Delivery>>,
}

/// In-process point-to-point network with a shared party directory.
#[derive(Debug, Clone, Default)]
pub struct Network {
    directory: Arc<RwLock<Directory>>,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `party` and returns its mailbox.
    pub async fn attach(&self, party: Party) -> Result<mpsc::Receiver<Delivery>, TransportError> {
        let mut directory = self.directory.write().await;
        if directory.parties.contains_key(&party.name) {
            return Err(TransportError::DuplicateParty(party.name));
        }
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        directory.mailboxes.insert(party.name.clone(), tx);
        directory.parties.insert(party.name.clone(), party);
        Ok(rx)
    }

    /// Directory entry for `name`.
    pub async fn party(&self, name: &str) -> Option<Party> {
        self.directory.read().await.parties.get(name).cloned()
    }

    /// Directory entry owning the legal key `key`.
    pub async fn party_for_key(&self, key: &PublicKey) -> Option<Party> {
        self.directory
            .read()
            .await
            .parties
            .values()
            .find(|party| party.owning_key == *key)
            .cloned()
    }

    /// Every registered party, sorted by name.
    pub async fn parties(&self) -> Vec<Party> {
        self.directory.read().await.parties.values().cloned().collect()
    }

    /// Delivers `envelope` to `to` and waits for the reply.
    pub async fn request(&self, to: &str, envelope: MessageEnvelope) -> Result<MessageEnvelope, TransportError> {
        let mailbox = self
            .directory
            .read()
            .await
            .mailboxes
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::UnknownParty(to.to_string()))?;
        let (reply, response) = oneshot::channel();
        trace!(from = %envelope.sender, to, "routing envelope");
        mailbox
            .send(Delivery { envelope, reply })
            .await
            .map_err(|_| TransportError::Disconnected(to.to_string()))?;
        response
            .await
            .map_err(|_| TransportError::NoReply(to.to_string()))
    }
}
