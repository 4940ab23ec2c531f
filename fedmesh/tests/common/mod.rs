//! Harness for end-to-end tests: whole federators wired together over
//! in-process brokers, driven through their public surface only.

use bytes::Bytes;
use fedmesh::config::FederatorConfig;
use fedmesh::federator::{self, Federator};
use fedmesh_core::broker::{self, BrokerClient, BrokerMessage};
use fedmesh_core::ids::NodeId;
use flume::Receiver;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Announcement interval used by every test node.
pub const INTERVAL: Duration = Duration::from_millis(40);

/// A running federator plus a driver client on its local broker.
pub struct TestNode {
    pub id: NodeId,
    client: Arc<dyn BrokerClient>,
}

/// Starts a federator with broker `mem://<prefix>-<id>` and the given
/// neighbor ids (brokers named the same way). `extra_yaml` is appended to
/// the config verbatim.
pub fn start_node(prefix: &str, id: NodeId, neighbors: &[NodeId], extra_yaml: &str) -> TestNode {
    let mut yaml = format!(
        "id: {id}\nip: \"mem://{prefix}-{id}\"\nredundancy: 2\ncoreAnnInterval: {}\nbeaconInterval: {}\n",
        INTERVAL.as_millis(),
        INTERVAL.as_millis(),
    );
    if neighbors.is_empty() {
        yaml.push_str("neighbors: []\n");
    } else {
        yaml.push_str("neighbors:\n");
        for n in neighbors {
            let _ = writeln!(yaml, "  - id: {n}\n    ip: \"mem://{prefix}-{n}\"");
        }
    }
    yaml.push_str(extra_yaml);

    let config = FederatorConfig::from_yaml(&yaml).expect("test config");
    let ctx = federator::build_context(&config).expect("context");
    compio::runtime::spawn(async move {
        let _ = Federator::new(ctx).run().await;
    })
    .detach();

    TestNode {
        id,
        client: broker::connect(&format!("mem://{prefix}-{id}"), "driver").unwrap(),
    }
}

impl TestNode {
    /// Subscription a local client would hold on the bare federated topic.
    pub async fn local_subscriber(&self, topic: &str) -> Receiver<BrokerMessage> {
        self.client.subscribe(&[topic.to_string()]).await.unwrap()
    }

    /// Raw subscription on this node's broker.
    pub async fn subscribe(&self, filter: &str) -> Receiver<BrokerMessage> {
        self.client.subscribe(&[filter.to_string()]).await.unwrap()
    }

    /// Publishes on this node's broker as a local client would.
    pub async fn publish(&self, topic: &str, payload: &[u8]) {
        self.client
            .publish(topic, Bytes::copy_from_slice(payload), 2, false)
            .await
            .unwrap();
    }

    /// Keeps a local subscriber alive until the guard is dropped.
    pub fn keep_beaconing(&self, topic: &str, secure: bool) -> BeaconGuard {
        let (stop_tx, stop_rx) = flume::bounded(1);
        let client = self.client.clone();
        let channel = if secure {
            format!("federator/beacon/s/{topic}")
        } else {
            format!("federator/beacon/{topic}")
        };

        compio::runtime::spawn(async move {
            loop {
                if let Err(flume::TryRecvError::Disconnected) = stop_rx.try_recv() {
                    break;
                }
                let _ = client.publish(&channel, Bytes::new(), 2, false).await;
                compio::time::sleep(INTERVAL / 2).await;
            }
        })
        .detach();

        BeaconGuard { _stop: stop_tx }
    }
}

/// Dropping stops the beacon task at its next iteration.
pub struct BeaconGuard {
    _stop: flume::Sender<()>,
}

/// Receives with an async timeout so background federators keep running.
pub async fn recv_within(rx: &Receiver<BrokerMessage>, ms: u64) -> Option<BrokerMessage> {
    compio::time::timeout(Duration::from_millis(ms), rx.recv_async())
        .await
        .ok()
        .and_then(|r| r.ok())
}

/// Lets the mesh converge for `ms` milliseconds.
pub async fn settle(ms: u64) {
    compio::time::sleep(Duration::from_millis(ms)).await;
}
