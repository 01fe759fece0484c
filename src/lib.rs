#![deny(missing_docs)]

//! # crowdfund_ledger
//!
//! **crowdfund_ledger** records pledges against crowdfunding campaigns on a
//! shared multi-party ledger.  A pledge is a transaction that consumes the
//! current campaign version, re-issues it with a higher total and creates a
//! pledge state owned by a one-time anonymous key.  The transaction is signed
//! by the pledger and the campaign manager, ordered by a single notary that
//! refuses double spends, and then delivered explicitly to the participants
//! and, optionally, to a list of observers.  Nodes that are not sent the
//! transaction cannot resolve its states and cannot tell who pledged.
//!
//! ## Layout
//!
//! * Ledger model: [`states`], [`transaction`], [`contract`], [`amount`],
//!   [`party`], with ids derived through [`merkle`] and [`data`].
//! * Per-node bookkeeping: [`store`] (finalized transactions and state heads)
//!   and [`identity`] (one-time keys and the certificates that resolve them).
//! * Ordering: [`notary`] holds the consumed-input map.
//! * Runtime (feature `net`): [`net`] routes signed envelopes between nodes
//!   over tokio channels and [`flows`] implements campaign start, pledging
//!   and the responders.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # #[cfg(feature = "net")]
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use crowdfund_ledger::{config::NetworkConfig, net::LocalNetwork, Amount};
//!
//! let cluster = LocalNetwork::bootstrap(&NetworkConfig::demo()).await?;
//! let manager = cluster.node("PartyA").expect("configured");
//! let pledger = cluster.node("PartyB").expect("configured");
//! let deadline = crowdfund_ledger::net::unix_time_ms() + 60_000;
//! let start = manager
//!     .start_campaign("Roger's Campaign", Amount::pounds(1000), deadline)
//!     .await?;
//! let campaign = start.tx().outputs_of_type::<crowdfund_ledger::Campaign>()[0].linear_id.clone();
//! pledger.make_pledge(Amount::pounds(100), &campaign, true).await?;
//! # Ok(())
//! # }
//! ```

pub mod amount;
pub mod config;
pub mod contract;
pub mod data;
#[cfg(feature = "net")]
pub mod flows;
pub mod identity;
pub mod keys;
pub mod merkle;
#[cfg(feature = "net")]
pub mod net;
pub mod notary;
pub mod party;
pub mod states;
pub mod store;
pub mod transaction;

pub use amount::{Amount, AmountError};
pub use contract::{ContractVerifier, CrowdFundingContract, RuleViolation};
pub use data::SecureHash;
#[cfg(feature = "net")]
pub use flows::{FlowError, PledgeHandle, PledgeReceipt, PledgeStage};
pub use identity::{IdentityCertificate, IdentityError, IdentityService};
pub use notary::{ConsumptionConflict, OrderingOracle, StateConflict, UniquenessProvider};
pub use party::{AnonymousParty, Party, PublicKey};
pub use states::{Campaign, ContractState, Pledge, StateAndRef, StateRef, UniqueIdentifier};
pub use store::{CommitOutcome, LedgerStore, StoreError};
pub use transaction::{
    FinalizedTransaction, LedgerTransaction, SignedTransaction, TransactionBuilder, WireTransaction,
};
