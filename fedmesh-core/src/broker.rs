//! Broker client seam.
//!
//! The federation overlay never speaks a wire protocol itself; it consumes
//! a publish/subscribe client through this trait. [`connect`] dispatches on
//! the URI scheme. The crate ships the in-process scheme (`mem://`, see
//! [`crate::inproc`]); wire-protocol clients slot in as further schemes.

use crate::error::{FedError, Result};
use crate::inproc::MemClient;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// One message as delivered by a broker subscription.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Handle to one broker connection.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to use
/// from many tasks at once.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Identifier this client presented to the broker.
    fn client_id(&self) -> &str;

    /// Publishes one message. `qos` follows broker semantics (the overlay
    /// always asks for 2); `retained` asks the broker to replay the
    /// message to late subscribers.
    async fn publish(&self, topic: &str, payload: Bytes, qos: u8, retained: bool) -> Result<()>;

    /// Subscribes to a set of topic filters, returning the delivery
    /// channel. Dropping the receiver ends the subscription.
    async fn subscribe(&self, filters: &[String]) -> Result<flume::Receiver<BrokerMessage>>;
}

/// Connects to the broker named by `uri`.
///
/// Supported schemes:
/// - `mem://<name>` — the in-process broker `<name>`, created on first use
///
/// Anything else fails with [`FedError::UnsupportedScheme`]; at startup
/// that is fatal, on a topology update it is logged and the neighbor is
/// skipped.
pub fn connect(uri: &str, client_id: &str) -> Result<Arc<dyn BrokerClient>> {
    if let Some(name) = uri.strip_prefix("mem://") {
        if name.is_empty() {
            return Err(FedError::broker("in-process broker name cannot be empty"));
        }
        return Ok(Arc::new(MemClient::attach(name, client_id)));
    }

    Err(FedError::UnsupportedScheme(uri.to_string()))
}
