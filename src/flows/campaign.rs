use tracing::info;

use crate::amount::Amount;
use crate::flows::finality::{distribute, notarise};
use crate::flows::FlowError;
use crate::net::Node;
use crate::states::Campaign;
use crate::transaction::{CommandData, FinalizedTransaction, SignedTransaction, TimeWindow, TransactionBuilder};

/// Issues a campaign managed by `node` and sends it to every party on the
/// node's distribution list.
///
/// Observers that refuse are reported in the log only; the campaign exists
/// once the notary has signed and the manager has recorded it.
pub async fn start_campaign(
    node: &Node,
    name: &str,
    target: Amount,
    deadline_ms: u64,
) -> Result<FinalizedTransaction, FlowError> {
    let campaign = Campaign::new(name, target, node.party().clone(), deadline_ms);
    let linear_id = campaign.linear_id.clone();
    let wtx = TransactionBuilder::new(node.notary().clone())
        .add_output_state(campaign)
        .add_command(CommandData::StartCampaign, [node.party().owning_key])
        .set_time_window(TimeWindow::until(deadline_ms))
        .to_wire_transaction();
    node.verify_locally(&wtx).await?;
    let stx = SignedTransaction::new(wtx).sign_with(&node.keys().signing);
    let ftx = notarise(node, stx).await?;
    node.verify_and_record(&ftx).await?;

    let observers = node.observers().await;
    let report = distribute(node, &ftx, &[], &observers).await?;
    info!(
        campaign = %linear_id,
        manager = %node.party(),
        holders = report.holders().len() + 1,
        "campaign started"
    );
    Ok(ftx)
}
