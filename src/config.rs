//! JSON network description: notary, parties, keys and distribution lists.
//!
//! ```json
//! {
//!   "notary": { "name": "Notary", "key": "ed25519://notary" },
//!   "parties": [
//!     { "name": "PartyA", "key": "ed25519://party-a", "distribution_list": ["PartyB"] },
//!     { "name": "PartyB", "key": "ed25519://party-b" }
//!   ]
//! }
//! ```
//!
//! `key` accepts an `ed25519://` seed, a path to a key file, or may be
//! omitted for a random key.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::keys::{KeyError, KeyMaterial, KeySource};

/// One network participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyConfig {
    /// Unique party name.
    pub name: String,
    /// `ed25519://<seed>`, a key file path, or absent for a random key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Observers that receive this party's broadcast transactions.
    #[serde(default)]
    pub distribution_list: Vec<String>,
}

impl PartyConfig {
    /// A party with a deterministic seed derived from its name.
    pub fn seeded(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: Some(format!("ed25519://{}", name.to_ascii_lowercase())),
            distribution_list: Vec::new(),
        }
    }

    /// Loads the configured key material.
    pub fn key_material(&self) -> Result<KeyMaterial, ConfigError> {
        KeyMaterial::load(&KeySource::parse(self.key.as_deref())).map_err(|source| ConfigError::Key {
            party: self.name.clone(),
            source,
        })
    }
}

/// The whole network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// The single notary.
    pub notary: PartyConfig,
    /// Every other node.
    pub parties: Vec<PartyConfig>,
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    /// Reading the file failed.
    Io(String),
    #[error("config parse error: {0}")]
    /// The JSON did not match the schema.
    Parse(String),
    #[error("duplicate party name: {0}")]
    /// Two entries share a name.
    DuplicateName(String),
    #[error("{party} lists unknown party {unknown} in its distribution list")]
    /// A distribution list names a party that is not configured.
    UnknownObserver {
        /// Party owning the list.
        party: String,
        /// Unresolvable entry.
        unknown: String,
    },
    #[error("{0} may not list the notary or itself as an observer")]
    /// A distribution list contains the notary or the owner.
    InvalidObserver(String),
    #[error("key for {party}: {source}")]
    /// Key material could not be loaded.
    Key {
        /// Party whose key failed.
        party: String,
        /// Underlying key error.
        source: KeyError,
    },
}

impl NetworkConfig {
    /// The demo network: `Notary` plus `PartyA`..`PartyE`, each observing all others.
    pub fn demo() -> Self {
        let names = ["PartyA", "PartyB", "PartyC", "PartyD", "PartyE"];
        let parties = names
            .iter()
            .map(|name| PartyConfig {
                distribution_list: names
                    .iter()
                    .filter(|other| *other != name)
                    .map(|other| other.to_string())
                    .collect(),
                ..PartyConfig::seeded(name)
            })
            .collect();
        Self {
            notary: PartyConfig::seeded("Notary"),
            parties,
        }
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_json_str(&contents)
    }

    /// Parses and validates JSON text.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks names are unique and distribution lists resolve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        names.insert(self.notary.name.as_str());
        for party in &self.parties {
            if !names.insert(party.name.as_str()) {
                return Err(ConfigError::DuplicateName(party.name.clone()));
            }
        }
        for party in &self.parties {
            for observer in &party.distribution_list {
                if observer == &self.notary.name || observer == &party.name {
                    return Err(ConfigError::InvalidObserver(party.name.clone()));
                }
                if !names.contains(observer.as_str()) {
                    return Err(ConfigError::UnknownObserver {
                        party: party.name.clone(),
                        unknown: observer.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Looks up a party entry by name.
    pub fn party(&self, name: &str) -> Option<&PartyConfig> {
        self.parties.iter().find(|party| party.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_is_valid() {
        let config = NetworkConfig::demo();
        assert!(config.validate().is_ok());
        assert_eq!(config.parties.len(), 5);
        assert_eq!(config.party("PartyA").unwrap().distribution_list.len(), 4);
    }

    #[test]
    fn parses_minimal_json() {
        let config = NetworkConfig::from_json_str(
            r#"{
                "notary": { "name": "Notary" },
                "parties": [
                    { "name": "PartyA", "key": "ed25519://a", "distribution_list": ["PartyB"] },
                    { "name": "PartyB" }
                ]
            }"#,
        )
        .unwrap();
        assert!(config.party("PartyB").unwrap().distribution_list.is_empty());
        assert!(config.party("PartyA").unwrap().key_material().is_ok());
    }

    #[test]
    fn rejects_unknown_observer() {
        let err = NetworkConfig::from_json_str(
            r#"{ "notary": { "name": "Notary" },
                 "parties": [ { "name": "PartyA", "distribution_list": ["PartyZ"] } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownObserver { .. }));
    }

    #[test]
    fn rejects_duplicates_and_notary_observers() {
        let duplicate = NetworkConfig::from_json_str(
            r#"{ "notary": { "name": "Notary" },
                 "parties": [ { "name": "PartyA" }, { "name": "PartyA" } ] }"#,
        );
        assert!(matches!(duplicate, Err(ConfigError::DuplicateName(_))));
        let notary_observer = NetworkConfig::from_json_str(
            r#"{ "notary": { "name": "Notary" },
                 "parties": [ { "name": "PartyA", "distribution_list": ["Notary"] } ] }"#,
        );
        assert!(matches!(notary_observer, Err(ConfigError::InvalidObserver(_))));
    }
}
