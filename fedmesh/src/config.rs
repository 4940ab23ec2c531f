//! Federator configuration.
//!
//! Two sources, checked in order:
//! 1. `TOPOLOGY_MANAGER_URL` — POST a join request to the topology manager
//!    and use the configuration it returns.
//! 2. `CONFIG_FILE` — a YAML file with the same fields.
//!
//! Neither being set is fatal. Interval fields are milliseconds on the
//! wire (`coreAnnInterval`); the YAML file may also use snake_case names.

use fedmesh_core::envelope::NeighborInfo;
use fedmesh_core::error::{FedError, Result};
use fedmesh_core::ids::NodeId;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

/// Default local broker port when the config does not name a broker URI.
pub const DEFAULT_BROKER_PORT: &str = "1883";

/// Request body for joining the federation through the topology manager.
#[derive(Debug, Clone, Serialize)]
pub struct JoinRequest {
    pub ip: String,
}

/// Response envelope used by the topology manager API.
#[derive(Debug, Deserialize)]
struct HttpResponse {
    #[allow(dead_code)]
    status: String,
    code: u16,
    data: serde_json::Value,
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FederatorConfig {
    pub id: NodeId,

    /// Broker URI this federator is reachable at (also the host broker
    /// when it carries a connectable scheme).
    #[serde(rename = "ip", alias = "host", default)]
    pub host: Option<String>,

    #[serde(default)]
    pub neighbors: Vec<NeighborInfo>,

    pub redundancy: usize,

    #[serde(rename = "coreAnnInterval", alias = "core_ann_interval")]
    core_ann_interval_ms: u64,

    #[serde(rename = "beaconInterval", alias = "beacon_interval")]
    beacon_interval_ms: u64,

    #[serde(rename = "cacheSize", alias = "cache_size", default = "default_cache_size")]
    pub cache_size: usize,

    /// Shared key with the topology manager (base64). Its presence turns
    /// the secure variant on.
    #[serde(
        rename = "sharedKey",
        alias = "shared_key",
        default,
        with = "fedmesh_core::envelope::b64_opt"
    )]
    pub shared_key: Option<Vec<u8>>,

    /// Pre-seeded per-topic session key (base64). Normally distributed by
    /// the elected core instead.
    #[serde(
        rename = "sessionKey",
        alias = "session_key",
        default,
        with = "fedmesh_core::envelope::b64_opt"
    )]
    pub session_key: Option<Vec<u8>>,

    /// Forces the secure variant even without pre-seeded keys.
    #[serde(default)]
    pub secure: bool,
}

fn default_cache_size() -> usize {
    fedmesh_core::cache::DEFAULT_CAPACITY
}

impl FederatorConfig {
    pub fn core_ann_interval(&self) -> Duration {
        Duration::from_millis(self.core_ann_interval_ms)
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }

    pub fn secure(&self) -> bool {
        self.secure || self.shared_key.is_some() || self.session_key.is_some()
    }

    /// Client identifier presented to every broker this federator talks to.
    pub fn client_id(&self) -> String {
        format!("federator_{}", self.id)
    }

    /// URI of the local broker: the configured host when it carries a
    /// scheme, otherwise localhost at `MOSQUITTO_PORT`.
    pub fn host_broker_uri(&self) -> String {
        if let Some(host) = &self.host {
            if host.contains("://") {
                return host.clone();
            }
        }
        let port = env::var("MOSQUITTO_PORT").unwrap_or_else(|_| DEFAULT_BROKER_PORT.to_string());
        format!("tcp://localhost:{port}")
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| FedError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.core_ann_interval_ms == 0 || self.beacon_interval_ms == 0 {
            return Err(FedError::config("announcement intervals must be nonzero"));
        }
        Ok(())
    }
}

/// Loads the federator configuration from the environment.
pub fn load() -> Result<FederatorConfig> {
    if let Ok(url) = env::var("TOPOLOGY_MANAGER_URL") {
        return join(&url);
    }
    if let Ok(path) = env::var("CONFIG_FILE") {
        let text = fs::read_to_string(&path)
            .map_err(|e| FedError::config(format!("cannot read {path}: {e}")))?;
        return FederatorConfig::from_yaml(&text);
    }
    Err(FedError::config(
        "set TOPOLOGY_MANAGER_URL or CONFIG_FILE",
    ))
}

/// Joins the federation via the topology manager and returns the
/// configuration it assigned. Runs before the async runtime exists.
fn join(base_url: &str) -> Result<FederatorConfig> {
    let request = JoinRequest {
        ip: env::var("ADVERTISED_LISTENER").unwrap_or_default(),
    };

    let response: HttpResponse = reqwest::blocking::Client::new()
        .post(format!("{base_url}/api/v1/join"))
        .json(&request)
        .send()
        .map_err(|e| FedError::config(format!("join request failed: {e}")))?
        .json()
        .map_err(|e| FedError::config(format!("join response unreadable: {e}")))?;

    if response.code != 200 {
        return Err(FedError::config(format!(
            "join rejected: {}",
            response.description
        )));
    }

    parse_join_payload(response.data)
}

fn parse_join_payload(data: serde_json::Value) -> Result<FederatorConfig> {
    let config: FederatorConfig = serde_json::from_value(data)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_with_wire_names() {
        let config = FederatorConfig::from_yaml(
            r#"
id: 1
ip: "mem://fed-1"
neighbors:
  - id: 2
    ip: "mem://fed-2"
redundancy: 2
coreAnnInterval: 5000
beaconInterval: 3000
"#,
        )
        .unwrap();

        assert_eq!(config.id, 1);
        assert_eq!(config.neighbors.len(), 1);
        assert_eq!(config.neighbors[0].addr, "mem://fed-2");
        assert_eq!(config.core_ann_interval(), Duration::from_secs(5));
        assert_eq!(config.cache_size, 1000);
        assert!(!config.secure());
        assert_eq!(config.client_id(), "federator_1");
        assert_eq!(config.host_broker_uri(), "mem://fed-1");
    }

    #[test]
    fn yaml_with_snake_case_names_and_keys() {
        let config = FederatorConfig::from_yaml(
            r#"
id: 7
redundancy: 1
core_ann_interval: 1000
beacon_interval: 1000
shared_key: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
"#,
        )
        .unwrap();

        assert!(config.secure());
        assert_eq!(config.shared_key.unwrap().len(), 32);
        assert!(config.neighbors.is_empty());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = FederatorConfig::from_yaml(
            r#"
id: 1
redundancy: 1
coreAnnInterval: 0
beaconInterval: 1000
"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn join_payload_round_trip() {
        let data = serde_json::json!({
            "id": 9,
            "ip": "mem://fed-9",
            "neighbors": [{"id": 4, "ip": "mem://fed-4"}],
            "redundancy": 2,
            "coreAnnInterval": 5000,
            "beaconInterval": 3000,
        });

        let config = parse_join_payload(data).unwrap();
        assert_eq!(config.id, 9);
        assert_eq!(config.neighbors[0].id, 4);
    }

    #[test]
    fn join_payload_missing_fields_is_an_error() {
        assert!(parse_join_payload(serde_json::json!({"id": 9})).is_err());
    }
}
