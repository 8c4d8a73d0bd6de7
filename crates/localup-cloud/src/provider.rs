//! Tunnel and telemetry provider seams and their startup sequencing
//!
//! Both providers are owned elsewhere; the manager only pushes them the latest
//! configuration and starts them. Every step here is safe to repeat with a
//! newer config.

use crate::client::CloudClient;
use crate::config::{CloudConfig, ManagerConfig};
use crate::error::{ManagerError, ProviderError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Metadata key carrying the node identifier
pub const META_SERVER_ID: &str = "server_id";

/// Metadata key carrying the node name, when one is configured
pub const META_SERVER_NAME: &str = "server_name";

/// Reverse-connectivity provider that lets the control plane reach this node
#[cfg_attr(test, mockall::automock)]
pub trait TunnelProvider: Send + Sync {
    /// Replace the provider's view of the cloud configuration
    fn update_cloud_config(&self, config: &CloudConfig) -> Result<(), ProviderError>;

    /// Replace the descriptive metadata sent along with the tunnel session
    fn update_metadata(&self, metadata: HashMap<String, String>);

    /// Start (or keep running) the provider
    fn start(&self) -> Result<(), ProviderError>;
}

/// Inputs handed to the telemetry provider on every (re)start
#[derive(Clone)]
pub struct TelemetryProviderConfig {
    pub client: Option<Arc<dyn CloudClient>>,
    pub cloud_config: CloudConfig,
}

/// Metrics forwarder that runs its own background refresh cycle
#[cfg_attr(test, mockall::automock)]
pub trait TelemetryProvider: Send + Sync {
    /// Start the provider's background work; must not block
    ///
    /// `cancel` is cancelled when the manager's run loop stops or the provider
    /// is restarted with a newer config.
    fn run(
        &self,
        cancel: CancellationToken,
        config: TelemetryProviderConfig,
    ) -> Result<(), ProviderError>;
}

/// Push config and metadata into the tunnel provider, then start it
pub fn start_tunnel_provider(config: &ManagerConfig) -> Result<(), ProviderError> {
    let Some(provider) = config.tunnel_provider.as_ref() else {
        return Ok(());
    };

    debug!("Updating tunnel provider with cloud configuration");
    if let Err(e) = provider.update_cloud_config(&config.cloud_config) {
        error!("Failed to update tunnel provider configuration: {}", e);
        return Err(e);
    }

    provider.update_metadata(tunnel_metadata(&config.cloud_config));

    provider.start()
}

/// Hand the client and a config snapshot to the telemetry provider
pub fn start_telemetry_provider(
    config: &ManagerConfig,
    cancel: CancellationToken,
) -> Result<(), ProviderError> {
    let Some(provider) = config.telemetry_provider.as_ref() else {
        return Ok(());
    };

    debug!("Starting telemetry provider");
    provider.run(
        cancel,
        TelemetryProviderConfig {
            client: config.client.clone(),
            cloud_config: config.cloud_config.clone(),
        },
    )
}

/// Start the tunnel provider, then the telemetry provider
///
/// Errors are logged here and returned tagged with the provider that failed.
pub fn bootstrap_providers(
    config: &ManagerConfig,
    cancel: CancellationToken,
) -> Result<(), ManagerError> {
    if let Err(e) = start_tunnel_provider(config) {
        error!("Failed to start tunnel provider: {}", e);
        return Err(ManagerError::TunnelProvider(e));
    }

    if let Err(e) = start_telemetry_provider(config, cancel) {
        error!("Failed to start telemetry provider: {}", e);
        return Err(ManagerError::TelemetryProvider(e));
    }

    Ok(())
}

fn tunnel_metadata(cloud_config: &CloudConfig) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert(META_SERVER_ID.to_string(), cloud_config.node_id.clone());
    if !cloud_config.node_name.is_empty() {
        metadata.insert(META_SERVER_NAME.to_string(), cloud_config.node_name.clone());
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    fn cloud_config() -> CloudConfig {
        CloudConfig {
            node_id: "node-1".to_string(),
            node_name: "server-a".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_providers_is_noop() {
        let config = ManagerConfig::default();
        assert!(bootstrap_providers(&config, CancellationToken::new()).is_ok());
    }

    #[test]
    fn test_tunnel_provider_sequence() {
        let mut provider = MockTunnelProvider::new();
        let mut seq = Sequence::new();

        provider
            .expect_update_cloud_config()
            .withf(|cfg| cfg.node_id == "node-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        provider
            .expect_update_metadata()
            .withf(|meta| {
                meta.get(META_SERVER_ID).map(String::as_str) == Some("node-1")
                    && meta.get(META_SERVER_NAME).map(String::as_str) == Some("server-a")
            })
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        provider
            .expect_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let config = ManagerConfig::builder()
            .cloud_config(cloud_config())
            .tunnel_provider(Arc::new(provider))
            .build();

        assert!(start_tunnel_provider(&config).is_ok());
    }

    #[test]
    fn test_tunnel_config_failure_skips_start() {
        let mut provider = MockTunnelProvider::new();
        provider
            .expect_update_cloud_config()
            .returning(|_| Err(ProviderError::InvalidConfig("missing address".into())));
        provider.expect_update_metadata().never();
        provider.expect_start().never();

        let config = ManagerConfig::builder()
            .tunnel_provider(Arc::new(provider))
            .build();

        let err = start_tunnel_provider(&config).unwrap_err();
        assert_eq!(err, ProviderError::InvalidConfig("missing address".into()));
    }

    #[test]
    fn test_tunnel_metadata_omits_empty_name() {
        let meta = tunnel_metadata(&CloudConfig {
            node_id: "node-2".to_string(),
            ..Default::default()
        });

        assert_eq!(meta.len(), 1);
        assert_eq!(meta[META_SERVER_ID], "node-2");
    }

    #[test]
    fn test_tunnel_failure_stops_before_telemetry() {
        let mut tunnel = MockTunnelProvider::new();
        tunnel.expect_update_cloud_config().returning(|_| Ok(()));
        tunnel.expect_update_metadata().return_const(());
        tunnel
            .expect_start()
            .returning(|| Err(ProviderError::StartFailed("broker unreachable".into())));

        let mut telemetry = MockTelemetryProvider::new();
        telemetry.expect_run().never();

        let config = ManagerConfig::builder()
            .tunnel_provider(Arc::new(tunnel))
            .telemetry_provider(Arc::new(telemetry))
            .build();

        let err = bootstrap_providers(&config, CancellationToken::new()).unwrap_err();
        assert!(matches!(
            err,
            ManagerError::TunnelProvider(ProviderError::StartFailed(_))
        ));
    }

    #[test]
    fn test_telemetry_provider_receives_snapshot() {
        let mut telemetry = MockTelemetryProvider::new();
        telemetry
            .expect_run()
            .withf(|_, cfg| cfg.cloud_config.node_id == "node-1" && cfg.client.is_none())
            .times(1)
            .returning(|_, _| Ok(()));

        let config = ManagerConfig::builder()
            .cloud_config(cloud_config())
            .telemetry_provider(Arc::new(telemetry))
            .build();

        assert!(bootstrap_providers(&config, CancellationToken::new()).is_ok());
    }

    #[test]
    fn test_telemetry_failure_is_tagged() {
        let mut telemetry = MockTelemetryProvider::new();
        telemetry
            .expect_run()
            .returning(|_, _| Err(ProviderError::Other("sink unavailable".into())));

        let config = ManagerConfig::builder()
            .telemetry_provider(Arc::new(telemetry))
            .build();

        let err = bootstrap_providers(&config, CancellationToken::new()).unwrap_err();
        assert!(matches!(err, ManagerError::TelemetryProvider(_)));
    }
}
