use futures::future::try_join_all;
use tracing::debug;

use crate::flows::FlowError;
use crate::identity::IdentityCertificate;
use crate::net::schema::{FlowMessage, SignatureOutcome};
use crate::net::Node;
use crate::party::{Party, PublicKey};
use crate::transaction::{SignatureError, SignedTransaction, TransactionSignature};

/// One counterparty asked to sign, and the key it must sign with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterpartySession {
    /// Counterparty node.
    pub party: Party,
    /// Key the returned signature must be made with.
    pub expected_key: PublicKey,
    /// Certificates handed to this counterparty only.
    pub identities: Vec<IdentityCertificate>,
}

impl CounterpartySession {
    /// Session expecting a signature from the party's legal key.
    pub fn legal(party: Party, identities: Vec<IdentityCertificate>) -> Self {
        Self {
            expected_key: party.owning_key,
            party,
            identities,
        }
    }
}

async fn request_signature(
    node: &Node,
    flow_id: &str,
    stx: &SignedTransaction,
    session: &CounterpartySession,
) -> Result<TransactionSignature, FlowError> {
    let request = FlowMessage::SignatureRequest {
        flow_id: flow_id.to_string(),
        transaction: stx.clone(),
        identities: session.identities.clone(),
    };
    match node.request(&session.party, &request).await? {
        FlowMessage::SignatureResponse {
            outcome: SignatureOutcome::Signed(sig),
        } => {
            if sig.by != session.expected_key {
                return Err(SignatureError::Unexpected { by: sig.by }.into());
            }
            sig.verify(&stx.id())?;
            debug!(flow = flow_id, party = %session.party, "signature received");
            Ok(sig)
        }
        FlowMessage::SignatureResponse {
            outcome: SignatureOutcome::Rejected { reason },
        } => Err(FlowError::CounterpartyRejected {
            party: session.party.name.clone(),
            reason,
        }),
        other => Err(FlowError::UnexpectedReply {
            party: session.party.name.clone(),
            reply: other.kind(),
        }),
    }
}

/// Asks every session to sign `stx` concurrently.
///
/// All signatures or nothing: the first rejection or failure aborts the
/// collection and `stx` is dropped unchanged.
pub async fn collect_signatures(
    node: &Node,
    flow_id: &str,
    stx: SignedTransaction,
    sessions: &[CounterpartySession],
) -> Result<SignedTransaction, FlowError> {
    let requests = sessions
        .iter()
        .map(|session| request_signature(node, flow_id, &stx, session));
    let sigs = try_join_all(requests).await?;
    Ok(sigs
        .into_iter()
        .fold(stx, |stx, sig| stx.with_signature(sig)))
}
