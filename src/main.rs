//! LocalUp Cloud Agent - keeps this server linked to the cloud control plane
//!
//! Reports server status on a jittered heartbeat and picks up configuration
//! changes on SIGHUP without restarting.

mod config;
mod http_client;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use config::{build_settings, AgentSettings, Overrides};
use http_client::HttpCloudClient;
use localup_cloud::{CloudClient, Manager, ManagerConfig, ManagerError};
use status::StatusReporter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// LocalUp cloud agent - reports server status to the control plane
#[derive(Parser, Debug, Clone)]
#[command(name = "localup-cloud-agent")]
#[command(about = "LocalUp cloud agent - reports server status to the control plane")]
#[command(version = env!("GIT_TAG"))]
#[command(long_about = r#"
LocalUp Cloud Agent keeps this server linked to the cloud control plane.
It pushes a status report every 45-75 minutes (jittered), and immediately
after start-up or a configuration reload.

Without cloud credentials the agent stays idle until a reload supplies them.

EXAMPLES:
  # Start with a config file
  localup-cloud-agent --config cloud.yaml

  # Start with flags
  localup-cloud-agent --hostname api.cloud.example.com \
    --resource-id $RESOURCE_ID \
    --client-id $CLIENT_ID \
    --client-secret $CLIENT_SECRET

  # Reload the config file
  kill -HUP $(pidof localup-cloud-agent)

ENVIRONMENT VARIABLES:
  LOCALUP_CLOUD_HOSTNAME       Control plane API host
  LOCALUP_CLOUD_RESOURCE_ID    Resource this cluster is linked to
  LOCALUP_CLOUD_CLIENT_ID      Client ID
  LOCALUP_CLOUD_CLIENT_SECRET  Client secret
  LOCALUP_CLOUD_NODE_ID        Node identifier
"#)]
struct Args {
    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Control plane API host (e.g., api.cloud.example.com)
    #[arg(long, env = "LOCALUP_CLOUD_HOSTNAME")]
    hostname: Option<String>,

    /// Resource ID this cluster is linked to
    #[arg(long, env = "LOCALUP_CLOUD_RESOURCE_ID")]
    resource_id: Option<String>,

    /// Client ID
    #[arg(long, env = "LOCALUP_CLOUD_CLIENT_ID")]
    client_id: Option<String>,

    /// Client secret
    #[arg(long, env = "LOCALUP_CLOUD_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Node ID (auto-generated if not specified)
    #[arg(long, env = "LOCALUP_CLOUD_NODE_ID")]
    node_id: Option<String>,

    /// Node name (defaults to the node ID)
    #[arg(long)]
    node_name: Option<String>,

    /// Datacenter reported in status updates
    #[arg(long)]
    datacenter: Option<String>,

    /// LAN address reported in status updates
    #[arg(long)]
    lan_address: Option<String>,

    /// Minimum heartbeat interval in seconds (default: 2700)
    #[arg(long)]
    min_interval: Option<u64>,

    /// Maximum heartbeat interval in seconds (default: 4500)
    #[arg(long)]
    max_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Skip certificate verification (insecure, for development only)
    #[arg(long)]
    insecure: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            config: self.config.clone(),
            hostname: self.hostname.clone(),
            resource_id: self.resource_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            node_id: self.node_id.clone(),
            node_name: self.node_name.clone(),
            datacenter: self.datacenter.clone(),
            lan_address: self.lan_address.clone(),
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            insecure: self.insecure,
        }
    }
}

/// How long shutdown waits for the manager loop to return
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Turn merged settings into a manager configuration
///
/// Missing credentials produce an idle config rather than an error.
fn manager_config(settings: AgentSettings) -> Result<ManagerConfig> {
    let reporter = StatusReporter::new(
        settings.cloud.node_id.clone(),
        settings.cloud.node_name.clone(),
        settings.server,
    );

    let mut builder = ManagerConfig::builder()
        .min_interval(settings.heartbeat.min_interval)
        .max_interval(settings.heartbeat.max_interval)
        .status_fn(move || {
            let status = reporter.snapshot();
            async move { Ok(status) }
        });

    match HttpCloudClient::from_config(&settings.cloud).context("Failed to create cloud client")? {
        Some(client) => {
            let client: Arc<dyn CloudClient> = Arc::new(client);
            builder = builder.client(client);
        }
        None => {
            warn!("Cloud credentials not configured, status updates disabled until reload");
        }
    }

    Ok(builder.cloud_config(settings.cloud).build())
}

/// Re-read configuration on SIGHUP and hand it to the manager
#[cfg(unix)]
async fn reload_on_hangup(args: Args, node_id: String, manager: Arc<Manager>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    while hangup.recv().await.is_some() {
        info!("Received SIGHUP, reloading configuration...");

        let config = match build_settings(&args.overrides(), &node_id).and_then(manager_config) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to reload configuration: {:#}", e);
                continue;
            }
        };

        if let Err(e) = manager.update_config(config) {
            error!("Configuration applied but providers failed to restart: {}", e);
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn reload_on_hangup(_args: Args, _node_id: String, _manager: Arc<Manager>) -> Result<()> {
    std::future::pending().await
}

/// Cancel the manager and wait for its loop to return
async fn shutdown(
    cancel: &CancellationToken,
    manager_task: &mut JoinHandle<Result<(), ManagerError>>,
) -> Result<()> {
    cancel.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, manager_task).await {
        Ok(Ok(Ok(()))) => {
            info!("Cloud manager stopped");
            Ok(())
        }
        Ok(Ok(Err(e))) => Err(e.into()),
        Ok(Err(e)) => Err(anyhow::Error::new(e).context("Cloud manager task panicked")),
        Err(_) => anyhow::bail!("Cloud manager did not stop within {:?}", SHUTDOWN_TIMEOUT),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Setup logging first
    setup_logging(&args.log_level)?;

    info!(
        "LocalUp Cloud Agent {} ({}) starting...",
        env!("GIT_TAG"),
        env!("GIT_HASH")
    );

    let generated_node_id = format!("server-{}", uuid::Uuid::new_v4());
    let settings = build_settings(&args.overrides(), &generated_node_id)
        .context("Failed to build agent configuration")?;

    // Log configuration (but not the secrets)
    info!("Node ID: {}", settings.cloud.node_id);
    if !settings.cloud.hostname.is_empty() {
        info!("Control plane: {}", settings.cloud.hostname);
    }
    if settings.cloud.tls_insecure {
        warn!("⚠️  Certificate verification disabled (insecure mode)");
    }

    // Reloads keep the node ID stable even when it was generated
    let node_id = settings.cloud.node_id.clone();
    let manager = Arc::new(Manager::new(manager_config(settings)?));
    let cancel = CancellationToken::new();

    let mut manager_task = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };

    let reload_task = tokio::spawn(reload_on_hangup(args, node_id, manager.clone()));

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
            reload_task.abort();
            if let Err(e) = shutdown(&cancel, &mut manager_task).await {
                error!("Cloud manager shutdown failed: {:#}", e);
            }
        }
        result = &mut manager_task => {
            reload_task.abort();
            match result {
                Ok(Ok(())) => {
                    info!("Cloud manager stopped normally");
                }
                Ok(Err(e)) => {
                    error!("Cloud manager error: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Cloud manager task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    info!("LocalUp Cloud Agent stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::HeartbeatConfig;
    use localup_cloud::CloudConfig;
    use std::time::Duration;

    fn settings(cloud: CloudConfig) -> AgentSettings {
        AgentSettings {
            cloud,
            server: Default::default(),
            heartbeat: HeartbeatConfig {
                min_interval: Duration::from_secs(60),
                max_interval: Duration::from_secs(120),
            },
        }
    }

    #[test]
    fn test_manager_config_idle_without_credentials() {
        let config = manager_config(settings(CloudConfig {
            node_id: "node-1".to_string(),
            ..Default::default()
        }))
        .unwrap();

        assert!(!config.enabled());
        assert!(config.status_fn.is_some());
        assert_eq!(
            config.heartbeat_bounds(),
            (Duration::from_secs(60), Duration::from_secs(120))
        );
    }

    #[test]
    fn test_manager_config_enabled_with_credentials() {
        let config = manager_config(settings(CloudConfig {
            resource_id: "res-123".to_string(),
            client_secret: "secret".to_string(),
            hostname: "api.example.com".to_string(),
            node_id: "node-1".to_string(),
            ..Default::default()
        }))
        .unwrap();

        assert!(config.enabled());
        assert_eq!(config.cloud_config.node_id, "node-1");
    }

    #[tokio::test]
    async fn test_status_fn_reports_node() {
        let config = manager_config(settings(CloudConfig {
            node_id: "node-7".to_string(),
            node_name: "server-7".to_string(),
            ..Default::default()
        }))
        .unwrap();

        let status_fn = config.status_fn.unwrap();
        let status = status_fn().await.unwrap();
        assert_eq!(status.id, "node-7");
        assert_eq!(status.name, "server-7");
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_manager() {
        let manager = Arc::new(Manager::new(ManagerConfig::default()));
        let cancel = CancellationToken::new();
        let mut manager_task = {
            let manager = manager.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { manager.run(cancel).await })
        };

        shutdown(&cancel, &mut manager_task).await.unwrap();
        assert!(cancel.is_cancelled());
        assert!(manager_task.is_finished());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "localup-cloud-agent",
            "--hostname",
            "api.example.com",
            "--min-interval",
            "30",
            "--insecure",
        ])
        .unwrap();

        let overrides = args.overrides();
        assert_eq!(overrides.hostname.as_deref(), Some("api.example.com"));
        assert_eq!(overrides.min_interval, Some(30));
        assert!(overrides.insecure);
    }
}
