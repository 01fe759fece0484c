use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::contract::RuleViolation;
use crate::flows::FlowError;
use crate::identity::IdentityCertificate;
use crate::net::schema::{FinalityOutcome, HeadOutcome, SignatureOutcome};
use crate::net::Node;
use crate::party::{Party, PublicKey};
use crate::states::{Campaign, Pledge, StateRef, UniqueIdentifier};
use crate::store::CommitOutcome;
use crate::transaction::{FinalizedTransaction, SignedTransaction, TransactionSignature};

/// How long a manager waits for a campaign version it has not received yet.
const HEAD_WAIT: Duration = Duration::from_secs(2);

/// Checks a proposal sent by `sender` and signs it with this node's legal key.
///
/// Certificates are only registered once every check has passed, so a
/// refused proposal leaves no trace on this node.
pub async fn sign_proposal(
    node: &Node,
    sender: &Party,
    flow_id: &str,
    stx: SignedTransaction,
    identities: Vec<IdentityCertificate>,
) -> SignatureOutcome {
    if let Err(err) = check_proposal(node, sender, &stx, &identities).await {
        warn!(party = %node.party(), flow = flow_id, sender = %sender, %err, "refusing to sign");
        return SignatureOutcome::Rejected {
            reason: err.to_string(),
        };
    }
    {
        let mut identity = node.identity().write().await;
        for certificate in identities {
            if let Err(err) = identity.register(certificate) {
                warn!(party = %node.party(), flow = flow_id, %err, "refusing to sign");
                return SignatureOutcome::Rejected {
                    reason: err.to_string(),
                };
            }
        }
    }
    let sig = TransactionSignature::sign(&node.keys().signing, &stx.id());
    info!(party = %node.party(), flow = flow_id, sender = %sender, tx = %stx.id().short(), "signed proposal");
    SignatureOutcome::Signed(sig)
}

async fn check_proposal(
    node: &Node,
    sender: &Party,
    stx: &SignedTransaction,
    identities: &[IdentityCertificate],
) -> Result<(), FlowError> {
    let me = node.party().owning_key;
    let mut certified: HashSet<PublicKey> = HashSet::new();
    for certificate in identities {
        certificate.verify()?;
        if certificate.party != *sender {
            return Err(RuleViolation(format!(
                "certificate names {} rather than the sender",
                certificate.party
            ))
            .into());
        }
        certified.insert(certificate.one_time_key);
    }

    if stx.tx.notary != *node.notary() {
        return Err(FlowError::Notary(format!(
            "proposal names untrusted notary {}",
            stx.tx.notary
        )));
    }
    if !stx.tx.required_signers().contains(&me) {
        return Err(FlowError::ContractViolation(RuleViolation(
            "this node is not a required signer".into(),
        )));
    }
    stx.verify_signatures_except(&[me, stx.tx.notary.owning_key])?;

    let ltx = node.verify_locally(&stx.tx).await?;
    for campaign in ltx.inputs_of_type::<Campaign>() {
        if campaign.manager != *node.party() {
            return Err(FlowError::ContractViolation(RuleViolation(format!(
                "campaign {} is managed by {}",
                campaign.linear_id, campaign.manager
            ))));
        }
    }
    for pledge in ltx.outputs_of_type::<Pledge>() {
        if !certified.contains(&pledge.pledger.owning_key) {
            return Err(FlowError::ContractViolation(RuleViolation(
                "pledger key is not certified by the sender".into(),
            )));
        }
    }
    Ok(())
}

/// Verifies and records a finalized transaction delivered by `sender`.
pub async fn receive_finalized(node: &Node, sender: &Party, ftx: &FinalizedTransaction) -> FinalityOutcome {
    match node.verify_and_record(ftx).await {
        Ok(CommitOutcome::Recorded) => {
            info!(party = %node.party(), sender = %sender, tx = %ftx.id().short(), "recorded transaction");
            FinalityOutcome::Recorded
        }
        Ok(CommitOutcome::AlreadyKnown) => FinalityOutcome::AlreadyKnown,
        Err(err) => {
            warn!(party = %node.party(), sender = %sender, tx = %ftx.id().short(), %err, "refusing transaction");
            FinalityOutcome::Refused {
                reason: err.to_string(),
            }
        }
    }
}

/// Sends `sender` the versions of a campaign this node manages that
/// superseded `since`.
///
/// The requester usually asks right after losing a notarisation race, which
/// can be before the winner's transaction reaches this node; an empty history
/// is therefore re-checked on every commit until [`HEAD_WAIT`] runs out.
pub async fn serve_campaign_head(
    node: &Node,
    sender: &Party,
    campaign_id: &UniqueIdentifier,
    since: &StateRef,
) -> HeadOutcome {
    let mut commits = node.commits();
    let deadline = Instant::now() + HEAD_WAIT;
    loop {
        match campaign_history(node, campaign_id, since).await {
            Ok(history) if !history.is_empty() => {
                info!(party = %node.party(), sender = %sender, campaign = %campaign_id, versions = history.len(), "sent campaign history");
                return HeadOutcome::History(history);
            }
            Ok(_) => {}
            Err(reason) => {
                warn!(party = %node.party(), sender = %sender, campaign = %campaign_id, %reason, "refusing campaign history");
                return HeadOutcome::Unavailable { reason };
            }
        }
        if !matches!(timeout_at(deadline, commits.changed()).await, Ok(Ok(()))) {
            return HeadOutcome::Unavailable {
                reason: format!("no version of {campaign_id} newer than {since}"),
            };
        }
    }
}

async fn campaign_history(
    node: &Node,
    campaign_id: &UniqueIdentifier,
    since: &StateRef,
) -> Result<Vec<FinalizedTransaction>, String> {
    let store = node.store().read().await;
    let head = store
        .current_campaign(campaign_id)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| format!("campaign {campaign_id} is unknown here"))?;
    if head.state.manager != *node.party() {
        return Err(format!("campaign {campaign_id} is managed by {}", head.state.manager));
    }
    store
        .history_since(campaign_id, since)
        .ok_or_else(|| format!("{since} is not a version of campaign {campaign_id}"))
}
