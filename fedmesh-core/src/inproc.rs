//! In-process broker.
//!
//! Responsibilities:
//! - Keep a process-global registry of named hubs (`mem://<name>`).
//! - Fan published messages out to every subscription whose filter set
//!   matches, zero-copy via `Bytes`.
//! - Replay retained messages to late subscribers.
//!
//! Delivery is exactly-once by construction, so the QoS argument is
//! accepted and ignored. Disconnected subscribers are pruned on the next
//! publish that visits them.

use crate::broker::{BrokerClient, BrokerMessage};
use crate::error::Result;
use crate::filter::FilterSet;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use flume::{Receiver, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// Global registry of in-process hubs, keyed by broker name.
static HUBS: Lazy<DashMap<String, Arc<Hub>>> = Lazy::new(DashMap::new);

struct Subscription {
    client_id: String,
    filters: FilterSet,
    tx: Sender<BrokerMessage>,
}

/// One in-process broker instance.
struct Hub {
    name: String,
    subs: Mutex<Vec<Subscription>>,
    retained: DashMap<String, Bytes>,
}

impl Hub {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subs: Mutex::new(Vec::new()),
            retained: DashMap::new(),
        }
    }

    fn publish(&self, topic: &str, payload: Bytes, retained: bool) {
        if retained {
            self.retained.insert(topic.to_string(), payload.clone());
        }

        let mut subs = self.subs.lock();
        subs.retain(|sub| {
            if sub.filters.matches(topic) {
                let delivered = sub
                    .tx
                    .send(BrokerMessage {
                        topic: topic.to_string(),
                        payload: payload.clone(),
                    })
                    .is_ok();
                if !delivered {
                    trace!("[inproc] {}: pruning subscriber {}", self.name, sub.client_id);
                }
                delivered
            } else {
                !sub.tx.is_disconnected()
            }
        });
    }

    fn subscribe(&self, client_id: String, filters: &[String]) -> Receiver<BrokerMessage> {
        let filters = FilterSet::new(filters.to_vec());
        let (tx, rx) = flume::unbounded();

        // Replay retained messages before any live traffic.
        for entry in self.retained.iter() {
            if filters.matches(entry.key()) {
                let _ = tx.send(BrokerMessage {
                    topic: entry.key().clone(),
                    payload: entry.value().clone(),
                });
            }
        }

        self.subs.lock().push(Subscription {
            client_id,
            filters,
            tx,
        });
        rx
    }
}

/// Client handle onto one in-process hub.
pub struct MemClient {
    client_id: String,
    hub: Arc<Hub>,
}

impl MemClient {
    /// Attaches to the hub called `name`, creating it on first use.
    #[must_use]
    pub fn attach(name: &str, client_id: &str) -> Self {
        let hub = HUBS
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Hub::new(name)))
            .clone();

        Self {
            client_id: client_id.to_string(),
            hub,
        }
    }
}

#[async_trait]
impl BrokerClient for MemClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn publish(&self, topic: &str, payload: Bytes, _qos: u8, retained: bool) -> Result<()> {
        self.hub.publish(topic, payload, retained);
        Ok(())
    }

    async fn subscribe(&self, filters: &[String]) -> Result<Receiver<BrokerMessage>> {
        Ok(self.hub.subscribe(self.client_id.clone(), filters))
    }
}
