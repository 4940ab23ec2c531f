//! Fedmesh Core
//!
//! This crate contains the runtime-agnostic building blocks of the
//! federation overlay:
//! - Wire messages and the broker topic namespace (`envelope`)
//! - Broker client seam + in-process broker (`broker`, `inproc`)
//! - Topic-filter matching (`filter`)
//! - Duplicate-suppression cache (`cache`)
//! - Symmetric crypto used as black boxes (`crypto`)
//! - Identifiers and error types (`ids`, `error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod broker;
pub mod cache;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod ids;
pub mod inproc;

// Small prelude for downstream crates; kept minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::broker::{connect, BrokerClient, BrokerMessage};
    pub use crate::cache::PubCache;
    pub use crate::envelope::{
        CoreAnn, Decoded, MeshMembAck, MeshMembAnn, NodeAction, NodeAnn, RoutedPub, TopologyAction,
        TopologyAnn, WorkerEvent,
    };
    pub use crate::error::{FedError, Result};
    pub use crate::ids::{NodeId, PubId, Seqn};
}
