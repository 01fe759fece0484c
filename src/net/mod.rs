//! In-process networking for crowdfunding nodes.
//!
//! These modules are gated behind the `net` Cargo feature and provide the
//! runtime the flows execute on: signed envelopes, point-to-point routing
//! over tokio channels, party nodes, and the notary service.

#![cfg(feature = "net")]

/// Bootstrapping a whole configured network in one process.
pub mod cluster;
/// Party nodes: store, identities, dispatcher.
pub mod node;
/// Notary service wrapping the uniqueness provider.
pub mod notary;
/// Flow messages and signed envelopes.
pub mod schema;
/// Mailboxes and request/response routing.
pub mod transport;

pub use cluster::{ClusterError, LocalNetwork};
pub use node::Node;
pub use notary::{unix_time_ms, NotaryNode};
pub use schema::{
    EnvelopeError, FinalityOutcome, FlowMessage, HeadOutcome, MessageEnvelope,
    NotarisationOutcome, SignatureOutcome,
};
pub use transport::{Delivery, Network, TransportError};
