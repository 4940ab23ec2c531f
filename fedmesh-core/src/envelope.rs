//! Wire messages and the broker topic namespace.
//!
//! Responsibilities:
//! - Own the literal channel prefixes of the federation namespace.
//! - Classify an inbound broker message into a typed event plus its
//!   federated topic (prefix stripped).
//! - Encode outbound messages back onto the right channel.
//!
//! All structured messages are JSON. Byte-array fields travel as base64
//! strings, consistent on both ends. Publication payloads are opaque
//! octet strings and are never re-encoded.

use crate::error::{FedError, Result};
use crate::ids::{NodeId, PubId, Seqn};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Control channel carrying neighbor topology updates.
pub const TOPOLOGY_ANN: &str = "federator/topology_ann";

pub const CORE_ANN_PREFIX: &str = "federator/core_ann/";
pub const MEMB_ANN_PREFIX: &str = "federator/memb_ann/";
pub const MEMB_ACK_PREFIX: &str = "federator/memb_ack/";
pub const BEACON_PREFIX: &str = "federator/beacon/";
pub const SECURE_BEACON_PREFIX: &str = "federator/beacon/s/";
pub const ROUTING_PREFIX: &str = "federator/routing/";
pub const SECURE_ROUTING_PREFIX: &str = "federator/routing/s/";
pub const FEDERATED_PREFIX: &str = "federated/";
pub const SECURE_FEDERATED_PREFIX: &str = "federated/s/";
pub const NODE_ANN_PREFIX: &str = "federator/node_ann/";

/// Subscription filters covering every channel a federator consumes.
pub const CONTROL_FILTERS: &[&str] = &[
    "federator/topology_ann",
    "federator/core_ann/#",
    "federator/memb_ann/#",
    "federator/memb_ack/#",
    "federator/beacon/#",
    "federator/routing/#",
    "federated/#",
];

/// Periodic announcement from the core, forwarded hop by hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CoreAnn {
    pub core_id: NodeId,
    pub sender_id: NodeId,
    pub seqn: Seqn,
    pub dist: u32,
}

/// Mesh member answering upstream at the current (core, seqn).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeshMembAnn {
    pub core_id: NodeId,
    pub sender_id: NodeId,
    pub seqn: Seqn,
}

/// Parent acknowledging a child, optionally carrying the session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeshMembAck {
    pub core_id: NodeId,
    pub sender_id: NodeId,
    pub seqn: Seqn,
    #[serde(with = "b64_opt", default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<Vec<u8>>,
}

/// Publication travelling through the mesh.
///
/// On the secure routing channel `payload` is ciphertext and `mac` carries
/// the end-to-end tag over the plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoutedPub {
    pub pub_id: PubId,
    pub sender_id: NodeId,
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    #[serde(with = "b64_opt", default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<Vec<u8>>,
}

/// Neighbor entry as announced by the topology manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborInfo {
    pub id: NodeId,
    #[serde(rename = "ip")]
    pub addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopologyAction {
    New,
    Remove,
}

/// Out-of-band neighbor update from the topology manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyAnn {
    pub neighbor: NeighborInfo,
    pub action: TopologyAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeAction {
    UpdateCore,
    Join,
    UpdatePassword,
}

/// Federator-to-topology-manager notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnn {
    pub id: NodeId,
    pub topic: String,
    pub action: NodeAction,
    #[serde(with = "b64_opt", default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Vec<u8>>,
}

/// A typed event addressed to one Topic Worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    CoreAnn(CoreAnn),
    MembAnn(MeshMembAnn),
    MembAck(MeshMembAck),
    Beacon { secure: bool },
    FederatedPub { payload: Bytes, secure: bool },
    RoutedPub { pub_msg: RoutedPub, secure: bool },
}

/// Result of classifying one inbound broker message.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// Topology update; the payload may still be sealed with the shared
    /// key, so it is handed up opaque.
    Topology(Bytes),
    /// Everything else: a worker event plus its federated topic.
    Event { topic: String, event: WorkerEvent },
}

/// Classifies `topic` by channel prefix and decodes `payload` accordingly.
///
/// The secure sub-prefixes (`.../s/`) are checked before their plain
/// parents. Messages outside the namespace, with an empty federated topic,
/// or with an undecodable payload produce an error; callers discard with a
/// diagnostic, never fail.
pub fn decode(topic: &str, payload: Bytes) -> Result<Decoded> {
    if topic == TOPOLOGY_ANN {
        return Ok(Decoded::Topology(payload));
    }

    let (fed_topic, event) = if let Some(t) = strip(topic, SECURE_ROUTING_PREFIX) {
        let pub_msg: RoutedPub = serde_json::from_slice(&payload)?;
        (t, WorkerEvent::RoutedPub { pub_msg, secure: true })
    } else if let Some(t) = strip(topic, ROUTING_PREFIX) {
        let pub_msg: RoutedPub = serde_json::from_slice(&payload)?;
        (t, WorkerEvent::RoutedPub { pub_msg, secure: false })
    } else if let Some(t) = strip(topic, SECURE_FEDERATED_PREFIX) {
        (t, WorkerEvent::FederatedPub { payload, secure: true })
    } else if let Some(t) = strip(topic, FEDERATED_PREFIX) {
        (t, WorkerEvent::FederatedPub { payload, secure: false })
    } else if let Some(t) = strip(topic, CORE_ANN_PREFIX) {
        (t, WorkerEvent::CoreAnn(serde_json::from_slice(&payload)?))
    } else if let Some(t) = strip(topic, MEMB_ANN_PREFIX) {
        (t, WorkerEvent::MembAnn(serde_json::from_slice(&payload)?))
    } else if let Some(t) = strip(topic, MEMB_ACK_PREFIX) {
        (t, WorkerEvent::MembAck(serde_json::from_slice(&payload)?))
    } else if let Some(t) = strip(topic, SECURE_BEACON_PREFIX) {
        (t, WorkerEvent::Beacon { secure: true })
    } else if let Some(t) = strip(topic, BEACON_PREFIX) {
        (t, WorkerEvent::Beacon { secure: false })
    } else {
        return Err(FedError::UnknownChannel(topic.to_string()));
    };

    Ok(Decoded::Event {
        topic: fed_topic,
        event,
    })
}

fn strip(topic: &str, prefix: &str) -> Option<String> {
    match topic.strip_prefix(prefix) {
        Some(rest) if !rest.is_empty() => Some(rest.to_string()),
        _ => None,
    }
}

impl CoreAnn {
    /// Serializes onto the core-announcement channel for `fed_topic`.
    pub fn encode(&self, fed_topic: &str) -> Result<(String, Bytes)> {
        Ok((
            format!("{CORE_ANN_PREFIX}{fed_topic}"),
            serde_json::to_vec(self)?.into(),
        ))
    }
}

impl MeshMembAnn {
    pub fn encode(&self, fed_topic: &str) -> Result<(String, Bytes)> {
        Ok((
            format!("{MEMB_ANN_PREFIX}{fed_topic}"),
            serde_json::to_vec(self)?.into(),
        ))
    }
}

impl MeshMembAck {
    pub fn encode(&self, fed_topic: &str) -> Result<(String, Bytes)> {
        Ok((
            format!("{MEMB_ACK_PREFIX}{fed_topic}"),
            serde_json::to_vec(self)?.into(),
        ))
    }
}

impl RoutedPub {
    /// Serializes onto the plain or secure routing channel.
    pub fn encode(&self, fed_topic: &str, secure: bool) -> Result<(String, Bytes)> {
        let prefix = if secure {
            SECURE_ROUTING_PREFIX
        } else {
            ROUTING_PREFIX
        };
        Ok((format!("{prefix}{fed_topic}"), serde_json::to_vec(self)?.into()))
    }
}

impl TopologyAnn {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> Result<(String, Bytes)> {
        Ok((TOPOLOGY_ANN.to_string(), serde_json::to_vec(self)?.into()))
    }
}

impl NodeAnn {
    /// Serializes onto this federator's node-announcement channel.
    pub fn encode(&self) -> Result<(String, Bytes)> {
        Ok((
            format!("{NODE_ANN_PREFIX}{}", self.id),
            serde_json::to_vec(self)?.into(),
        ))
    }
}

/// Serde adapter: `Vec<u8>` as a base64 string.
pub mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Option<Vec<u8>>` as an optional base64 string.
pub mod b64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD.decode(s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
