//! Control-plane client seam and the server status payload

use crate::error::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of this server's state as reported to the control plane
///
/// The manager never inspects these fields; they are produced by the status
/// callback and handed to the [`CloudClient`] as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub id: String,
    pub name: String,
    pub version: String,
    pub lan_address: String,
    pub gossip_port: u16,
    pub rpc_port: u16,
    pub datacenter: String,
    /// State of the tunnel provider (e.g., "connected", "disconnected")
    pub tunnel_status: String,
    /// Additional fields owned by the embedding agent
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Client used to talk to the remote control plane
///
/// Implementations must be safe for concurrent use; the manager calls them
/// from its loop while the telemetry provider may hold another reference.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Push a server status snapshot to the control plane
    async fn push_server_status(&self, status: &ServerStatus) -> Result<(), ClientError>;
}
