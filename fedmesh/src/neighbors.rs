//! Neighbor registry.
//!
//! Maps neighbor federator ids to publish handles on their brokers.
//! Written only by the dispatcher (topology announcements); read by every
//! topic worker and announcer, so the map is a concurrent read-mostly
//! structure. A neighbor disappearing between lookup and publish is
//! harmless: the publish fails and is logged, nothing else happens.

use dashmap::DashMap;
use fedmesh_core::broker::{connect, BrokerClient};
use fedmesh_core::error::Result;
use fedmesh_core::ids::NodeId;
use std::sync::Arc;
use tracing::{debug, warn};

struct Neighbor {
    addr: String,
    client: Arc<dyn BrokerClient>,
}

/// Concurrent registry of neighbor publish handles.
pub struct NeighborTable {
    client_id: String,
    inner: DashMap<NodeId, Neighbor>,
}

impl NeighborTable {
    #[must_use]
    pub fn new(client_id: String) -> Self {
        Self {
            client_id,
            inner: DashMap::new(),
        }
    }

    /// Connects to the broker at `addr` and installs (or replaces) the
    /// handle for `id`.
    pub fn upsert(&self, id: NodeId, addr: &str) -> Result<()> {
        let client = connect(addr, &self.client_id)?;
        self.inner.insert(
            id,
            Neighbor {
                addr: addr.to_string(),
                client,
            },
        );
        Ok(())
    }

    /// Drops the handle for `id`. Returns true when it existed.
    pub fn remove(&self, id: NodeId) -> bool {
        self.inner.remove(&id).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Broker address recorded for `id`.
    #[must_use]
    pub fn addr(&self, id: NodeId) -> Option<String> {
        self.inner.get(&id).map(|n| n.addr.clone())
    }

    /// Snapshot of every (id, client) pair. Taken before any await so no
    /// map guard is held across suspension points.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(NodeId, Arc<dyn BrokerClient>)> {
        self.inner
            .iter()
            .map(|entry| (*entry.key(), entry.value().client.clone()))
            .collect()
    }

    fn client(&self, id: NodeId) -> Option<Arc<dyn BrokerClient>> {
        self.inner.get(&id).map(|n| n.client.clone())
    }

    /// Publishes to one neighbor. Absent neighbors and transport errors
    /// are logged and reported as false; the mesh heals on the next
    /// announcement cycle.
    pub async fn publish(
        &self,
        id: NodeId,
        topic: &str,
        payload: bytes::Bytes,
        qos: u8,
        retained: bool,
    ) -> bool {
        let Some(client) = self.client(id) else {
            debug!("[neighbors] {} is not a neighbor", id);
            return false;
        };

        match client.publish(topic, payload, qos, retained).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[neighbors] publish to {} failed: {}", id, e);
                false
            }
        }
    }

    /// Publishes the same message to each id in `ids` (QoS 2, not
    /// retained).
    pub async fn send_to(&self, ids: &[NodeId], topic: &str, payload: bytes::Bytes) {
        for &id in ids {
            self.publish(id, topic, payload.clone(), 2, false).await;
        }
    }
}
