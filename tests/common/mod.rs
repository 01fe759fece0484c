#![allow(dead_code)]

use crowdfund_ledger::config::NetworkConfig;
use crowdfund_ledger::net::{unix_time_ms, LocalNetwork, Node};
use crowdfund_ledger::{Amount, Campaign, FinalizedTransaction, Pledge, StateRef, UniqueIdentifier};

pub const OBSERVERS: [&str; 3] = ["PartyC", "PartyD", "PartyE"];

pub async fn demo_network() -> LocalNetwork {
    LocalNetwork::bootstrap(&NetworkConfig::demo())
        .await
        .expect("demo network boots")
}

pub fn node<'a>(cluster: &'a LocalNetwork, name: &str) -> &'a Node {
    cluster.node(name).expect("configured party")
}

/// PartyA starts "Roger's Campaign" for 1000 GBP, closing `ttl_ms` from now.
pub async fn start_rogers_campaign(cluster: &LocalNetwork, ttl_ms: u64) -> UniqueIdentifier {
    let start = node(cluster, "PartyA")
        .start_campaign("Roger's Campaign", Amount::pounds(1000), unix_time_ms() + ttl_ms)
        .await
        .expect("campaign starts");
    start.tx().outputs_of_type::<Campaign>()[0].linear_id.clone()
}

pub fn campaign_ref(ftx: &FinalizedTransaction) -> StateRef {
    ftx.tx().out_refs_of_type::<Campaign>()[0].reference
}

pub fn pledge_ref(ftx: &FinalizedTransaction) -> StateRef {
    ftx.tx().out_refs_of_type::<Pledge>()[0].reference
}
