//! Federator runtime: shared context and the inbound dispatcher.
//!
//! The dispatcher is the single inbound pipeline: it subscribes to the
//! control channels on the host broker, decodes every message into a typed
//! event keyed by (channel, federated topic), and routes it to the topic
//! worker for that topic, creating the worker on first reference.
//! Topology announcements mutate the neighbor registry directly instead.

use crate::config::FederatorConfig;
use crate::neighbors::NeighborTable;
use crate::worker::TopicWorkerHandle;
use bytes::Bytes;
use fedmesh_core::broker::{self, BrokerClient, BrokerMessage};
use fedmesh_core::envelope::{self, Decoded, TopologyAction, TopologyAnn};
use fedmesh_core::error::{FedError, Result};
use fedmesh_core::crypto;
use fedmesh_core::ids::NodeId;
use hashbrown::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Immutable environment shared by the dispatcher, every topic worker and
/// every announcer. Only the neighbor registry inside is mutable, and only
/// the dispatcher writes it.
pub struct FederatorContext {
    pub id: NodeId,
    pub core_ann_interval: Duration,
    pub beacon_interval: Duration,
    pub redundancy: usize,
    pub cache_size: usize,
    pub secure: bool,
    pub neighbors: NeighborTable,
    pub host: Arc<dyn BrokerClient>,
    /// Shared key with the topology manager; seals TopologyAnn/NodeAnn.
    pub shared_key: Option<Vec<u8>>,
    /// Pre-seeded session key handed to new workers.
    pub session_key: Option<Vec<u8>>,
}

impl FederatorContext {
    /// Entries unseen for longer than this are no longer mesh members.
    #[must_use]
    pub fn child_expiry(&self) -> Duration {
        3 * self.core_ann_interval
    }

    /// Beacons older than this mean "no local subscriber".
    #[must_use]
    pub fn beacon_expiry(&self) -> Duration {
        3 * self.beacon_interval
    }
}

/// Connects the host broker and the configured neighbors, producing the
/// shared context. Host connect failure is fatal; an unreachable neighbor
/// is logged and skipped (the topology manager will re-announce it).
pub fn build_context(config: &FederatorConfig) -> Result<Arc<FederatorContext>> {
    let client_id = config.client_id();
    let host = broker::connect(&config.host_broker_uri(), &client_id)?;

    let neighbors = NeighborTable::new(client_id);
    for neighbor in &config.neighbors {
        if let Err(e) = neighbors.upsert(neighbor.id, &neighbor.addr) {
            warn!(
                "[dispatch] neighbor {} at {} skipped: {}",
                neighbor.id, neighbor.addr, e
            );
        }
    }

    Ok(Arc::new(FederatorContext {
        id: config.id,
        core_ann_interval: config.core_ann_interval(),
        beacon_interval: config.beacon_interval(),
        redundancy: config.redundancy,
        cache_size: config.cache_size,
        secure: config.secure(),
        neighbors,
        host,
        shared_key: config.shared_key.clone(),
        session_key: config.session_key.clone(),
    }))
}

/// The inbound dispatcher plus its table of live topic workers.
pub struct Federator {
    ctx: Arc<FederatorContext>,
    workers: HashMap<String, TopicWorkerHandle>,
}

impl Federator {
    #[must_use]
    pub fn new(ctx: Arc<FederatorContext>) -> Self {
        Self {
            ctx,
            workers: HashMap::new(),
        }
    }

    /// Subscribes to the control channels and dispatches until the broker
    /// connection drops.
    pub async fn run(mut self) -> Result<()> {
        let filters: Vec<String> = envelope::CONTROL_FILTERS
            .iter()
            .map(ToString::to_string)
            .collect();
        let rx = self.ctx.host.subscribe(&filters).await?;

        info!("[dispatch] federator {} consuming control channels", self.ctx.id);

        while let Ok(msg) = rx.recv_async().await {
            self.dispatch(msg);
        }

        Err(FedError::ChannelClosed)
    }

    /// Routes one inbound broker message. Decode failures discard the
    /// message with a diagnostic; they are never fatal.
    pub fn dispatch(&mut self, msg: BrokerMessage) {
        match envelope::decode(&msg.topic, msg.payload) {
            Ok(Decoded::Topology(raw)) => self.apply_topology(&raw),
            Ok(Decoded::Event { topic, event }) => {
                let ctx = self.ctx.clone();
                let worker = self.workers.entry(topic).or_insert_with_key(|topic| {
                    debug!("[dispatch] new worker for {}", topic);
                    TopicWorkerHandle::spawn(topic.clone(), ctx)
                });
                worker.dispatch(event);
            }
            Err(e) => warn!("[dispatch] discarding message on {}: {}", msg.topic, e),
        }
    }

    /// Applies one topology announcement to the neighbor registry.
    fn apply_topology(&self, raw: &Bytes) {
        let payload = match &self.ctx.shared_key {
            Some(key) => match crypto::open(key, raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!("[dispatch] discarding topology ann: {}", e);
                    return;
                }
            },
            None => raw.to_vec(),
        };

        let ann = match TopologyAnn::decode(&payload) {
            Ok(ann) => ann,
            Err(e) => {
                warn!("[dispatch] discarding topology ann: {}", e);
                return;
            }
        };

        match ann.action {
            TopologyAction::New => {
                info!(
                    "[dispatch] adding neighbor {} at {}",
                    ann.neighbor.id, ann.neighbor.addr
                );
                if let Err(e) = self.ctx.neighbors.upsert(ann.neighbor.id, &ann.neighbor.addr) {
                    warn!(
                        "[dispatch] cannot connect neighbor {} at {}: {}",
                        ann.neighbor.id, ann.neighbor.addr, e
                    );
                }
            }
            TopologyAction::Remove => {
                info!("[dispatch] removing neighbor {}", ann.neighbor.id);
                self.ctx.neighbors.remove(ann.neighbor.id);
            }
        }
    }

    /// Number of live topic workers (one per federated topic seen).
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedmesh_core::envelope::{CoreAnn, NeighborInfo};

    fn ctx(case: &str, shared_key: Option<Vec<u8>>) -> Arc<FederatorContext> {
        Arc::new(FederatorContext {
            id: 1,
            core_ann_interval: Duration::from_millis(40),
            beacon_interval: Duration::from_millis(40),
            redundancy: 2,
            cache_size: 1000,
            secure: shared_key.is_some(),
            neighbors: NeighborTable::new("federator_1".to_string()),
            host: broker::connect(&format!("mem://{case}-host"), "host").unwrap(),
            shared_key,
            session_key: None,
        })
    }

    fn topology_new(id: NodeId, addr: &str) -> Bytes {
        let ann = TopologyAnn {
            neighbor: NeighborInfo {
                id,
                addr: addr.to_string(),
            },
            action: TopologyAction::New,
        };
        ann.encode().unwrap().1
    }

    #[compio::test]
    async fn plain_topology_ann_mutates_neighbors() {
        let mut federator = Federator::new(ctx("disp-topo", None));

        federator.dispatch(BrokerMessage {
            topic: envelope::TOPOLOGY_ANN.to_string(),
            payload: topology_new(4, "mem://disp-topo-4"),
        });
        assert!(federator.ctx.neighbors.contains(4));

        let remove = TopologyAnn {
            neighbor: NeighborInfo {
                id: 4,
                addr: "mem://disp-topo-4".to_string(),
            },
            action: TopologyAction::Remove,
        };
        federator.dispatch(BrokerMessage {
            topic: envelope::TOPOLOGY_ANN.to_string(),
            payload: remove.encode().unwrap().1,
        });
        assert!(!federator.ctx.neighbors.contains(4));
    }

    #[compio::test]
    async fn sealed_topology_ann_requires_the_shared_key() {
        let key = vec![5u8; 32];
        let mut federator = Federator::new(ctx("disp-sealed", Some(key.clone())));

        // Garbage that does not open: discarded.
        federator.dispatch(BrokerMessage {
            topic: envelope::TOPOLOGY_ANN.to_string(),
            payload: Bytes::from_static(b"not sealed"),
        });
        assert!(federator.ctx.neighbors.is_empty());

        // Properly sealed: applied.
        let sealed = crypto::seal(&key, &topology_new(4, "mem://disp-sealed-4")).unwrap();
        federator.dispatch(BrokerMessage {
            topic: envelope::TOPOLOGY_ANN.to_string(),
            payload: sealed.into(),
        });
        assert!(federator.ctx.neighbors.contains(4));
    }

    #[compio::test]
    async fn workers_are_created_once_per_topic() {
        let mut federator = Federator::new(ctx("disp-workers", None));

        let ann = CoreAnn {
            core_id: 2,
            sender_id: 2,
            seqn: 0,
            dist: 0,
        };
        let (topic, payload) = ann.encode("t").unwrap();

        federator.dispatch(BrokerMessage {
            topic: topic.clone(),
            payload: payload.clone(),
        });
        federator.dispatch(BrokerMessage { topic, payload });
        assert_eq!(federator.worker_count(), 1);

        let (topic, payload) = ann.encode("other").unwrap();
        federator.dispatch(BrokerMessage { topic, payload });
        assert_eq!(federator.worker_count(), 2);
    }

    #[compio::test]
    async fn foreign_and_broken_messages_are_discarded() {
        let mut federator = Federator::new(ctx("disp-junk", None));

        federator.dispatch(BrokerMessage {
            topic: "sensors/temp".to_string(),
            payload: Bytes::from_static(b"x"),
        });
        federator.dispatch(BrokerMessage {
            topic: format!("{}t", envelope::CORE_ANN_PREFIX),
            payload: Bytes::from_static(b"{broken"),
        });

        assert_eq!(federator.worker_count(), 0);
    }
}
