#![cfg(feature = "net")]

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, NetworkConfig};
use crate::contract::{ContractVerifier, CrowdFundingContract};
use crate::net::node::Node;
use crate::net::notary::NotaryNode;
use crate::net::transport::{Network, TransportError};

/// Failures while bringing up a [`LocalNetwork`].
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    /// The configuration was invalid or a key could not be loaded.
    Config(#[from] ConfigError),
    #[error(transparent)]
    /// A node could not attach to the network.
    Transport(#[from] TransportError),
}

/// Every node of a configured network running in this process.
#[derive(Debug)]
pub struct LocalNetwork {
    network: Network,
    notary: NotaryNode,
    nodes: BTreeMap<String, Node>,
}

impl LocalNetwork {
    /// Starts the notary and every party, all verifying with [`CrowdFundingContract`].
    pub async fn bootstrap(config: &NetworkConfig) -> Result<Self, ClusterError> {
        Self::bootstrap_with(config, |_| Arc::new(CrowdFundingContract)).await
    }

    /// Starts the network with a per-party verifier chosen by `verifier_for`.
    pub async fn bootstrap_with<F>(config: &NetworkConfig, verifier_for: F) -> Result<Self, ClusterError>
    where
        F: Fn(&str) -> Arc<dyn ContractVerifier>,
    {
        config.validate()?;
        let network = Network::new();
        let notary = NotaryNode::spawn(
            &config.notary.name,
            config.notary.key_material()?,
            network.clone(),
        )
        .await?;
        let mut nodes = BTreeMap::new();
        for party in &config.parties {
            let node = Node::spawn(
                &party.name,
                party.key_material()?,
                notary.party().clone(),
                party.distribution_list.clone(),
                network.clone(),
                verifier_for(&party.name),
            )
            .await?;
            nodes.insert(party.name.clone(), node);
        }
        info!(notary = %notary.party(), parties = nodes.len(), "local network ready");
        Ok(Self {
            network,
            notary,
            nodes,
        })
    }

    /// The shared transport.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// The notary service.
    pub fn notary(&self) -> &NotaryNode {
        &self.notary
    }

    /// Node named `name`.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Every node, sorted by name.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartyConfig;

    #[tokio::test]
    async fn demo_network_starts_every_party() {
        let cluster = LocalNetwork::bootstrap(&NetworkConfig::demo()).await.unwrap();
        let names: Vec<&str> = cluster.nodes().map(|node| node.party().name.as_str()).collect();
        assert_eq!(names, ["PartyA", "PartyB", "PartyC", "PartyD", "PartyE"]);
        assert_eq!(cluster.network().parties().await.len(), 6);
        assert_eq!(cluster.node("PartyA").unwrap().notary(), cluster.notary().party());
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let config = NetworkConfig {
            notary: PartyConfig::seeded("Notary"),
            parties: vec![PartyConfig::seeded("Notary")],
        };
        assert!(matches!(
            LocalNetwork::bootstrap(&config).await,
            Err(ClusterError::Config(ConfigError::DuplicateName(_)))
        ));
    }
}
