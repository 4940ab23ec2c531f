//! Identifiers shared across the federation overlay.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique federator identifier.
pub type NodeId = i64;

/// Monotonically increasing counter per (origin, purpose).
pub type Seqn = u64;

/// Network-wide unique name of a publication.
///
/// Minted by the originating federator: its own id plus a local counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PubId {
    pub origin_id: NodeId,
    pub seqn: Seqn,
}

impl PubId {
    #[must_use]
    pub const fn new(origin_id: NodeId, seqn: Seqn) -> Self {
        Self { origin_id, seqn }
    }
}

impl fmt::Display for PubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin_id, self.seqn)
    }
}
