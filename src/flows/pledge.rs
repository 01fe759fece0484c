//! The pledge state machine.
//!
//! ```text
//! Initiated -> Anonymized -> Built -> Signing -> Finalizing -> Distributing -> Complete
//!      \___________\____________\________\___________\______________\______> Aborted
//! ```
//!
//! Everything up to `Built` is local.  From `Signing` on, any failure aborts
//! the flow without recording anything locally; the pledger records the
//! transaction only after the notary has signed it.
//!
//! A pledge that loses the notarisation race is not retried.  Before
//! reporting the conflict the flow fetches the versions it missed from the
//! campaign manager, so the caller can pledge again against the new head.

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::amount::Amount;
use crate::flows::collect::{collect_signatures, CounterpartySession};
use crate::flows::finality::{distribute, notarise, DistributionReport};
use crate::flows::FlowError;
use crate::net::schema::{FlowMessage, HeadOutcome};
use crate::net::Node;
use crate::party::Party;
use crate::states::{Pledge, StateRef, UniqueIdentifier};
use crate::transaction::{CommandData, FinalizedTransaction, SignedTransaction, TimeWindow, TransactionBuilder};

/// Observable position of a pledge flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PledgeStage {
    /// Flow created, nothing done yet.
    Initiated,
    /// One-time pledger key issued.
    Anonymized,
    /// Transaction built, verified and signed by the pledger.
    Built,
    /// Waiting for the manager's signature.
    Signing,
    /// Waiting for the notary.
    Finalizing,
    /// Sending the finalized transaction to recipients.
    Distributing,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Aborted,
}

impl PledgeStage {
    /// True for `Complete` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

impl fmt::Display for PledgeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a completed pledge.
#[derive(Debug, Clone)]
pub struct PledgeReceipt {
    /// The finalized pledge transaction.
    pub transaction: FinalizedTransaction,
    /// Where it was delivered.
    pub distribution: DistributionReport,
}

/// A running pledge flow.
#[derive(Debug)]
pub struct PledgeHandle {
    progress: watch::Receiver<PledgeStage>,
    task: JoinHandle<Result<PledgeReceipt, FlowError>>,
}

impl PledgeHandle {
    /// Receiver that observes every stage change.
    pub fn progress(&self) -> watch::Receiver<PledgeStage> {
        self.progress.clone()
    }

    /// Latest stage reached.
    pub fn stage(&self) -> PledgeStage {
        *self.progress.borrow()
    }

    /// Waits for the flow to finish.
    pub async fn outcome(self) -> Result<PledgeReceipt, FlowError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(FlowError::Aborted(err.to_string())),
        }
    }
}

/// Pledger-side orchestration of one pledge.
#[derive(Debug)]
pub struct PledgeFlow {
    node: Node,
    amount: Amount,
    campaign_id: UniqueIdentifier,
    broadcast: bool,
    flow_id: String,
    progress: watch::Sender<PledgeStage>,
}

impl PledgeFlow {
    /// Prepares a flow on `node`; nothing happens until it runs.
    pub fn new(node: Node, amount: Amount, campaign_id: UniqueIdentifier, broadcast: bool) -> Self {
        let (progress, _) = watch::channel(PledgeStage::Initiated);
        Self {
            node,
            amount,
            campaign_id,
            broadcast,
            flow_id: UniqueIdentifier::random().id,
            progress,
        }
    }

    /// Runs the flow as its own task.
    pub fn spawn(self) -> PledgeHandle {
        let progress = self.progress.subscribe();
        let task = tokio::spawn(self.run());
        PledgeHandle { progress, task }
    }

    fn advance(&self, stage: PledgeStage) {
        info!(flow = %self.flow_id, party = %self.node.party(), %stage, "pledge flow");
        self.progress.send_replace(stage);
    }

    /// Drives the flow to `Complete` or `Aborted`.
    pub async fn run(self) -> Result<PledgeReceipt, FlowError> {
        match self.execute().await {
            Ok(receipt) => {
                self.advance(PledgeStage::Complete);
                Ok(receipt)
            }
            Err(err) => {
                warn!(flow = %self.flow_id, party = %self.node.party(), %err, "pledge flow aborted");
                self.progress.send_replace(PledgeStage::Aborted);
                Err(err)
            }
        }
    }

    async fn execute(&self) -> Result<PledgeReceipt, FlowError> {
        let node = &self.node;

        let (pledger, certificate) = node.identity().write().await.fresh_key_and_cert(&self.flow_id);
        self.advance(PledgeStage::Anonymized);

        let current = node
            .current_campaign(&self.campaign_id)
            .await?
            .ok_or_else(|| FlowError::StaleOrUnknownCampaign(self.campaign_id.clone()))?;
        let manager = current.state.manager.clone();
        let mut next = current.state.clone();
        next.raised_so_far = next.raised_so_far.checked_add(&self.amount)?;
        let pledge = Pledge::new(self.campaign_id.clone(), pledger, self.amount.clone());
        let signers = [manager.owning_key, pledger.owning_key];
        let wtx = TransactionBuilder::new(node.notary().clone())
            .add_input_state(&current)
            .add_output_state(next)
            .add_output_state(pledge)
            .add_command(CommandData::AcceptPledge, signers)
            .add_command(CommandData::CreatePledge, signers)
            .set_time_window(TimeWindow::until(current.state.deadline_ms))
            .to_wire_transaction();
        node.verify_locally(&wtx).await?;
        let stx = {
            let identity = node.identity().read().await;
            let mut stx = SignedTransaction::new(wtx);
            for key in [pledger.owning_key, manager.owning_key] {
                if let Some(signing) = identity.signing_key(&key) {
                    stx = stx.sign_with(signing);
                }
            }
            stx
        };
        self.advance(PledgeStage::Built);

        self.advance(PledgeStage::Signing);
        let sessions: Vec<CounterpartySession> = if manager == *node.party() {
            Vec::new()
        } else {
            vec![CounterpartySession::legal(manager.clone(), vec![certificate])]
        };
        let stx = collect_signatures(node, &self.flow_id, stx, &sessions).await?;

        self.advance(PledgeStage::Finalizing);
        let ftx = match notarise(node, stx).await {
            Err(FlowError::InputAlreadyConsumed { conflicts, .. }) => {
                if manager != *node.party() {
                    if let Err(err) = self.catch_up(&manager, current.reference).await {
                        warn!(flow = %self.flow_id, party = %node.party(), %err, "could not refresh campaign after conflict");
                    }
                }
                let current = node
                    .current_campaign(&self.campaign_id)
                    .await
                    .ok()
                    .flatten()
                    .filter(|head| !conflicts.iter().any(|conflict| conflict.state == head.reference));
                return Err(FlowError::InputAlreadyConsumed { conflicts, current });
            }
            other => other?,
        };

        self.advance(PledgeStage::Distributing);
        node.verify_and_record(&ftx).await?;
        let observers = if self.broadcast {
            node.observers().await
        } else {
            Vec::new()
        };
        let distribution = distribute(node, &ftx, &[manager], &observers).await?;
        Ok(PledgeReceipt {
            transaction: ftx,
            distribution,
        })
    }

    /// Records the campaign versions that superseded `since`, as supplied by
    /// the manager.
    async fn catch_up(&self, manager: &Party, since: StateRef) -> Result<usize, FlowError> {
        let request = FlowMessage::CampaignHeadRequest {
            campaign_id: self.campaign_id.clone(),
            since,
        };
        let history = match self.node.request(manager, &request).await? {
            FlowMessage::CampaignHeadResponse {
                outcome: HeadOutcome::History(history),
            } => history,
            FlowMessage::CampaignHeadResponse {
                outcome: HeadOutcome::Unavailable { reason },
            } => {
                return Err(FlowError::CounterpartyRejected {
                    party: manager.name.clone(),
                    reason,
                })
            }
            other => {
                return Err(FlowError::UnexpectedReply {
                    party: manager.name.clone(),
                    reply: other.kind(),
                })
            }
        };
        for ftx in &history {
            self.node.verify_and_record(ftx).await?;
        }
        info!(flow = %self.flow_id, party = %self.node.party(), versions = history.len(), "caught up with campaign");
        Ok(history.len())
    }
}
