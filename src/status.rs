//! Server status reported by the agent

use localup_cloud::ServerStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Local facts about this server, from the config file or CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub datacenter: String,

    /// Address other cluster members reach this server on
    #[serde(default)]
    pub lan_address: String,

    #[serde(default)]
    pub gossip_port: u16,

    #[serde(default)]
    pub rpc_port: u16,
}

/// Builds status snapshots for the manager's status callback
#[derive(Debug, Clone)]
pub struct StatusReporter {
    node_id: String,
    node_name: String,
    info: ServerInfo,
    started_at: Instant,
}

impl StatusReporter {
    pub fn new(node_id: String, node_name: String, info: ServerInfo) -> Self {
        Self {
            node_id,
            node_name,
            info,
            started_at: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> ServerStatus {
        let mut extra: HashMap<String, serde_json::Value> = HashMap::new();
        extra.insert("git_hash".to_string(), env!("GIT_HASH").into());
        extra.insert("build_time".to_string(), env!("BUILD_TIME").into());
        extra.insert(
            "uptime_secs".to_string(),
            self.started_at.elapsed().as_secs().into(),
        );

        ServerStatus {
            id: self.node_id.clone(),
            name: self.node_name.clone(),
            version: env!("GIT_TAG").to_string(),
            lan_address: self.info.lan_address.clone(),
            gossip_port: self.info.gossip_port,
            rpc_port: self.info.rpc_port,
            datacenter: self.info.datacenter.clone(),
            // No tunnel provider is wired into this agent
            tunnel_status: "disabled".to_string(),
            extra,
        }
    }
}
