//! Competing pledges, refusals and stale views.

#![cfg(feature = "net")]

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{campaign_ref, demo_network, node, pledge_ref, start_rogers_campaign, OBSERVERS};
use crowdfund_ledger::config::NetworkConfig;
use crowdfund_ledger::net::LocalNetwork;
use crowdfund_ledger::transaction::CommandData;
use crowdfund_ledger::{
    Amount, ContractVerifier, CrowdFundingContract, FlowError, LedgerTransaction, Pledge,
    PledgeStage, RuleViolation, SecureHash, StoreError,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pledges_on_one_version_have_one_winner() {
    let cluster = demo_network().await;
    let campaign_id = start_rogers_campaign(&cluster, 60_000).await;

    let from_b = node(&cluster, "PartyB").start_pledge(Amount::pounds(100), campaign_id.clone(), false);
    let from_c = node(&cluster, "PartyC").start_pledge(Amount::pounds(50), campaign_id.clone(), false);
    let (b, c) = tokio::join!(from_b.outcome(), from_c.outcome());

    let (winner, loser, won_amount, loser_name, lost_amount) = match (b, c) {
        (Ok(receipt), Err(err)) => (receipt, err, 100, "PartyC", 50),
        (Err(err), Ok(receipt)) => (receipt, err, 50, "PartyB", 100),
        (b, c) => panic!("expected exactly one winner, got {b:?} and {c:?}"),
    };
    match loser {
        FlowError::InputAlreadyConsumed { conflicts, current } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].consumed_by, winner.transaction.id());
            // The loser was never sent the winning version but fetched it
            // from the manager before giving up.
            let head = current.expect("manager supplies the winning version");
            assert_eq!(head.reference, campaign_ref(&winner.transaction));
            assert_eq!(head.state.raised_so_far, Amount::pounds(won_amount));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let manager_head = node(&cluster, "PartyA")
        .current_campaign(&campaign_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager_head.reference, campaign_ref(&winner.transaction));
    assert_eq!(manager_head.state.raised_so_far, Amount::pounds(won_amount));
    assert_eq!(node(&cluster, "PartyA").pledges_for(&campaign_id).await.len(), 1);

    node(&cluster, loser_name)
        .make_pledge(Amount::pounds(lost_amount), &campaign_id, false)
        .await
        .expect("retry against the fetched version succeeds");
    let manager_head = node(&cluster, "PartyA")
        .current_campaign(&campaign_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manager_head.state.raised_so_far, Amount::pounds(150));
    // Nothing was broadcast, so bystanders still hold the opening version.
    for name in ["PartyD", "PartyE"] {
        let head = node(&cluster, name).current_campaign(&campaign_id).await.unwrap().unwrap();
        assert_eq!(head.state.raised_so_far, Amount::pounds(0), "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loser_retries_after_rereading_the_campaign() {
    let cluster = demo_network().await;
    let campaign_id = start_rogers_campaign(&cluster, 60_000).await;

    let from_b = node(&cluster, "PartyB").start_pledge(Amount::pounds(100), campaign_id.clone(), true);
    let from_c = node(&cluster, "PartyC").start_pledge(Amount::pounds(50), campaign_id.clone(), true);
    let (b, c) = tokio::join!(from_b.outcome(), from_c.outcome());
    let retry = match (b, c) {
        // The scheduler may serialise the flows so that the second one
        // already builds on the first one's result.
        (Ok(_), Ok(_)) => None,
        (Ok(_), Err(err)) => Some(("PartyC", 50, err)),
        (Err(err), Ok(_)) => Some(("PartyB", 100, err)),
        (b, c) => panic!("expected at least one winner, got {b:?} and {c:?}"),
    };
    if let Some((loser, amount, err)) = retry {
        match err {
            FlowError::InputAlreadyConsumed { conflicts, current } => {
                if let Some(head) = current {
                    assert!(conflicts.iter().all(|conflict| conflict.state != head.reference));
                }
            }
            other => panic!("unexpected error {other:?}"),
        }
        // The winner broadcast its result before finishing, so the loser
        // now holds the new head and can pledge against it.
        node(&cluster, loser)
            .make_pledge(Amount::pounds(amount), &campaign_id, true)
            .await
            .expect("retry succeeds");
    }
    for party in cluster.nodes() {
        let head = party.current_campaign(&campaign_id).await.unwrap().unwrap();
        assert_eq!(head.state.raised_so_far, Amount::pounds(150), "{}", party.party());
    }
}

#[tokio::test]
async fn stale_view_is_refused_then_refreshed_from_the_manager() {
    let cluster = demo_network().await;
    let campaign_id = start_rogers_campaign(&cluster, 60_000).await;
    let hidden = node(&cluster, "PartyB")
        .make_pledge(Amount::pounds(100), &campaign_id, false)
        .await
        .unwrap();

    let c = node(&cluster, "PartyC");
    let err = c
        .make_pledge(Amount::pounds(10), &campaign_id, false)
        .await
        .unwrap_err();
    match err {
        FlowError::InputAlreadyConsumed { conflicts, current } => {
            assert_eq!(conflicts[0].consumed_by, hidden.id());
            let head = current.expect("refreshed head");
            assert_eq!(head.reference, campaign_ref(&hidden));
            assert_eq!(head.state.raised_so_far, Amount::pounds(100));
        }
        other => panic!("unexpected error {other:?}"),
    }
    // Catching up records the missed version, never the pledger behind it.
    assert!(c.load_state(&pledge_ref(&hidden)).await.is_ok());
    let hidden_pledge = hidden.tx().outputs_of_type::<Pledge>()[0].clone();
    assert_eq!(c.well_known_party_from_anonymous(&hidden_pledge.pledger).await, None);

    let retry = c
        .make_pledge(Amount::pounds(10), &campaign_id, false)
        .await
        .expect("retry succeeds");
    let head = node(&cluster, "PartyA")
        .current_campaign(&campaign_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head.reference, campaign_ref(&retry));
    assert_eq!(head.state.raised_so_far, Amount::pounds(110));
    for name in ["PartyD", "PartyE"] {
        assert!(matches!(
            node(&cluster, name).load_state(&campaign_ref(&hidden)).await,
            Err(StoreError::UnknownReference(_))
        ));
    }
}

#[tokio::test]
async fn observers_missing_history_refuse_later_transactions() {
    let cluster = demo_network().await;
    let campaign_id = start_rogers_campaign(&cluster, 60_000).await;
    let hidden = node(&cluster, "PartyB")
        .make_pledge(Amount::pounds(100), &campaign_id, false)
        .await
        .unwrap();

    let receipt = node(&cluster, "PartyB")
        .start_pledge(Amount::pounds(20), campaign_id.clone(), true)
        .outcome()
        .await
        .expect("participants still record the pledge");
    let mut refused: Vec<&str> = receipt
        .distribution
        .refused()
        .into_iter()
        .map(|(party, _)| party)
        .collect();
    refused.sort_unstable();
    assert_eq!(refused, OBSERVERS);

    for name in OBSERVERS {
        let observer = node(&cluster, name);
        for reference in [campaign_ref(&receipt.transaction), pledge_ref(&receipt.transaction)] {
            assert_eq!(
                observer.load_state(&reference).await,
                Err(StoreError::UnknownReference(reference))
            );
        }
        assert!(matches!(
            observer.load_state(&campaign_ref(&hidden)).await,
            Err(StoreError::UnknownReference(_))
        ));
    }
    let head = node(&cluster, "PartyA")
        .current_campaign(&campaign_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(head.state.raised_so_far, Amount::pounds(120));
}

/// Signs each pledge proposal but refuses to record it once finalized.
#[derive(Default)]
struct RefuseOnSecondLook {
    reviewed: Mutex<HashSet<SecureHash>>,
}

impl ContractVerifier for RefuseOnSecondLook {
    fn verify(&self, tx: &LedgerTransaction) -> Result<(), RuleViolation> {
        CrowdFundingContract.verify(tx)?;
        if tx.command(CommandData::AcceptPledge).is_some() && !self.reviewed.lock().unwrap().insert(tx.id) {
            return Err(RuleViolation("pledge already reviewed".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "refuse-on-second-look"
    }
}

#[tokio::test]
async fn participant_refusal_after_notarisation_still_returns_the_transaction() {
    let cluster = LocalNetwork::bootstrap_with(&NetworkConfig::demo(), |name| -> Arc<dyn ContractVerifier> {
        if name == "PartyA" {
            Arc::new(RefuseOnSecondLook::default())
        } else {
            Arc::new(CrowdFundingContract)
        }
    })
    .await
    .unwrap();
    let campaign_id = start_rogers_campaign(&cluster, 60_000).await;

    let err = node(&cluster, "PartyB")
        .make_pledge(Amount::pounds(100), &campaign_id, false)
        .await
        .unwrap_err();
    let ftx = err.finalized().cloned().expect("finalized transaction travels with the error");
    match &err {
        FlowError::DistributionFailed { party, reason, .. } => {
            assert_eq!(party, "PartyA");
            assert!(reason.contains("already reviewed"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let pledger = node(&cluster, "PartyB");
    assert_eq!(pledger.transaction(&ftx.id()).await, Some(ftx.clone()));
    let head = pledger.current_campaign(&campaign_id).await.unwrap().unwrap();
    assert_eq!(head.reference, campaign_ref(&ftx));
    assert_eq!(head.state.raised_so_far, Amount::pounds(100));
    assert_eq!(node(&cluster, "PartyA").transaction(&ftx.id()).await, None);
}

/// Accepts campaign starts but vetoes every pledge.
struct VetoPledges;

impl ContractVerifier for VetoPledges {
    fn verify(&self, tx: &LedgerTransaction) -> Result<(), RuleViolation> {
        if tx.command(CommandData::AcceptPledge).is_some() {
            return Err(RuleViolation("manager vetoes pledges".into()));
        }
        CrowdFundingContract.verify(tx)
    }

    fn name(&self) -> &'static str {
        "veto-pledges"
    }
}

#[tokio::test]
async fn counterparty_rejection_leaves_no_record_anywhere() {
    let cluster = LocalNetwork::bootstrap_with(&NetworkConfig::demo(), |name| -> Arc<dyn ContractVerifier> {
        if name == "PartyA" {
            Arc::new(VetoPledges)
        } else {
            Arc::new(CrowdFundingContract)
        }
    })
    .await
    .unwrap();
    let campaign_id = start_rogers_campaign(&cluster, 60_000).await;

    let handle = node(&cluster, "PartyB").start_pledge(Amount::pounds(100), campaign_id.clone(), true);
    let progress = handle.progress();
    let err = handle.outcome().await.unwrap_err();
    match err {
        FlowError::CounterpartyRejected { party, reason } => {
            assert_eq!(party, "PartyA");
            assert!(reason.contains("vetoes"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(*progress.borrow(), PledgeStage::Aborted);
    for party in cluster.nodes() {
        assert_eq!(party.transaction_count().await, 1, "{}", party.party());
        assert!(party.pledges_for(&campaign_id).await.is_empty());
        let head = party.current_campaign(&campaign_id).await.unwrap().unwrap();
        assert_eq!(head.state.raised_so_far, Amount::pounds(0));
    }
}

#[tokio::test]
async fn expired_time_window_is_refused_by_the_notary() {
    let cluster = demo_network().await;
    let campaign_id = start_rogers_campaign(&cluster, 500).await;
    tokio::time::sleep(Duration::from_millis(800)).await;

    let err = node(&cluster, "PartyB")
        .make_pledge(Amount::pounds(100), &campaign_id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Notary(_)), "{err:?}");
    for party in cluster.nodes() {
        assert_eq!(party.transaction_count().await, 1, "{}", party.party());
    }
}
