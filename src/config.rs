//! Agent configuration: YAML file merged with CLI flags and environment variables

use crate::status::ServerInfo;
use anyhow::{Context, Result};
use localup_cloud::CloudConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Control-plane identity and credentials
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Environment variable holding the client secret (preferred over `cloud.client_secret`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_env: Option<String>,

    #[serde(default)]
    pub server: ServerInfo,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// Heartbeat bounds; zero or missing means the manager's defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default, with = "duration_secs")]
    pub min_interval: Duration,

    #[serde(default, with = "duration_secs")]
    pub max_interval: Duration,
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Values that can be given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub hostname: Option<String>,
    pub resource_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub node_id: Option<String>,
    pub node_name: Option<String>,
    pub datacenter: Option<String>,
    pub lan_address: Option<String>,
    pub min_interval: Option<u64>,
    pub max_interval: Option<u64>,
    pub insecure: bool,
}

/// Fully merged agent settings
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub cloud: CloudConfig,
    pub server: ServerInfo,
    pub heartbeat: HeartbeatConfig,
}

/// Load configuration from YAML file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Merge CLI args with config file, giving precedence to CLI args
///
/// `generated_node_id` is used when neither source names the node, so that a
/// reload keeps reporting under the same id.
pub fn build_settings(overrides: &Overrides, generated_node_id: &str) -> Result<AgentSettings> {
    let mut file = match &overrides.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    if let Some(env_var) = &file.client_secret_env {
        file.cloud.client_secret = std::env::var(env_var)
            .with_context(|| format!("Environment variable {} not set", env_var))?;
    }

    let mut cloud = file.cloud;
    override_string(&mut cloud.hostname, &overrides.hostname);
    override_string(&mut cloud.resource_id, &overrides.resource_id);
    override_string(&mut cloud.client_id, &overrides.client_id);
    override_string(&mut cloud.client_secret, &overrides.client_secret);
    override_string(&mut cloud.node_id, &overrides.node_id);
    override_string(&mut cloud.node_name, &overrides.node_name);
    cloud.tls_insecure |= overrides.insecure;

    if cloud.node_id.is_empty() {
        cloud.node_id = generated_node_id.to_string();
    }
    if cloud.node_name.is_empty() {
        cloud.node_name = cloud.node_id.clone();
    }

    let mut server = file.server;
    override_string(&mut server.datacenter, &overrides.datacenter);
    override_string(&mut server.lan_address, &overrides.lan_address);

    let mut heartbeat = file.heartbeat;
    if let Some(secs) = overrides.min_interval {
        heartbeat.min_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = overrides.max_interval {
        heartbeat.max_interval = Duration::from_secs(secs);
    }

    Ok(AgentSettings {
        cloud,
        server,
        heartbeat,
    })
}

fn override_string(target: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}
