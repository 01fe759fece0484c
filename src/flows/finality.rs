use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::flows::FlowError;
use crate::net::schema::{FinalityOutcome, FlowMessage, NotarisationOutcome};
use crate::net::Node;
use crate::party::Party;
use crate::transaction::{FinalizedTransaction, SignatureError, SignedTransaction};

/// Submits `stx` to the node's notary and attaches its signature.
///
/// A conflict is reported as [`FlowError::InputAlreadyConsumed`] with no
/// current head; callers that know which linear state was contested fill it in.
pub async fn notarise(node: &Node, stx: SignedTransaction) -> Result<FinalizedTransaction, FlowError> {
    let notary = node.notary().clone();
    let request = FlowMessage::NotarisationRequest {
        transaction: stx.clone(),
    };
    match node.request(&notary, &request).await? {
        FlowMessage::NotarisationResponse {
            outcome: NotarisationOutcome::Accepted(sig),
        } => {
            if sig.by != notary.owning_key {
                return Err(SignatureError::Unexpected { by: sig.by }.into());
            }
            sig.verify(&stx.id())?;
            Ok(FinalizedTransaction::from_signed(stx.with_signature(sig))?)
        }
        FlowMessage::NotarisationResponse {
            outcome: NotarisationOutcome::Conflict(conflicts),
        } => Err(FlowError::InputAlreadyConsumed {
            conflicts,
            current: None,
        }),
        FlowMessage::NotarisationResponse {
            outcome: NotarisationOutcome::Rejected { reason },
        } => Err(FlowError::Notary(reason)),
        other => Err(FlowError::UnexpectedReply {
            party: notary.name,
            reply: other.kind(),
        }),
    }
}

/// What happened at one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Verified and committed.
    Recorded,
    /// The recipient already held the transaction.
    AlreadyKnown,
    /// The recipient refused or could not be reached.
    Refused(String),
}

/// One recipient's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientOutcome {
    /// Recipient name.
    pub party: String,
    /// Whether the recipient is a transaction participant.
    pub participant: bool,
    /// Delivery result.
    pub status: DeliveryStatus,
}

/// Per-recipient results of a distribution round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    /// One entry per distinct recipient, participants first.
    pub outcomes: Vec<RecipientOutcome>,
}

impl DistributionReport {
    /// Names of recipients that now hold the transaction.
    pub fn holders(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| !matches!(outcome.status, DeliveryStatus::Refused(_)))
            .map(|outcome| outcome.party.as_str())
            .collect()
    }

    /// Recipients that refused, with their reasons.
    pub fn refused(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match &outcome.status {
                DeliveryStatus::Refused(reason) => Some((outcome.party.as_str(), reason.as_str())),
                _ => None,
            })
            .collect()
    }
}

async fn deliver(node: &Node, ftx: &FinalizedTransaction, recipient: &Party) -> DeliveryStatus {
    let message = FlowMessage::Finalized {
        transaction: ftx.clone(),
    };
    match node.request(recipient, &message).await {
        Ok(FlowMessage::FinalityAck {
            outcome: FinalityOutcome::Recorded,
        }) => DeliveryStatus::Recorded,
        Ok(FlowMessage::FinalityAck {
            outcome: FinalityOutcome::AlreadyKnown,
        }) => DeliveryStatus::AlreadyKnown,
        Ok(FlowMessage::FinalityAck {
            outcome: FinalityOutcome::Refused { reason },
        }) => DeliveryStatus::Refused(reason),
        Ok(other) => DeliveryStatus::Refused(format!("unexpected {} reply", other.kind())),
        Err(err) => DeliveryStatus::Refused(err.to_string()),
    }
}

/// Sends the full finalized transaction to each recipient and waits for
/// every acknowledgement.
///
/// Recipients are deduplicated by name and never include the sending node.
/// A participant that does not record the transaction fails the call; an
/// observer refusal is only logged and reported.
pub async fn distribute(
    node: &Node,
    ftx: &FinalizedTransaction,
    participants: &[Party],
    observers: &[Party],
) -> Result<DistributionReport, FlowError> {
    let mut seen = HashSet::from([node.party().name.clone()]);
    let recipients: Vec<(&Party, bool)> = participants
        .iter()
        .map(|party| (party, true))
        .chain(observers.iter().map(|party| (party, false)))
        .filter(|(party, _)| seen.insert(party.name.clone()))
        .collect();
    let statuses = join_all(
        recipients
            .iter()
            .map(|(recipient, _)| deliver(node, ftx, recipient)),
    )
    .await;

    let mut report = DistributionReport::default();
    for ((recipient, participant), status) in recipients.into_iter().zip(statuses) {
        match &status {
            DeliveryStatus::Refused(reason) if participant => {
                return Err(FlowError::DistributionFailed {
                    party: recipient.name.clone(),
                    reason: reason.clone(),
                    transaction: Box::new(ftx.clone()),
                });
            }
            DeliveryStatus::Refused(reason) => {
                warn!(tx = %ftx.id().short(), observer = %recipient, reason = %reason, "observer refused transaction");
            }
            _ => debug!(tx = %ftx.id().short(), recipient = %recipient, ?status, "delivered"),
        }
        report.outcomes.push(RecipientOutcome {
            party: recipient.name.clone(),
            participant,
            status,
        });
    }
    info!(
        tx = %ftx.id().short(),
        recipients = report.outcomes.len(),
        refused = report.refused().len(),
        "distribution complete"
    );
    Ok(report)
}
