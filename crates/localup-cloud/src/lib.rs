//! Cloud link manager - keeps a server's connection to the remote control plane alive
//!
//! The [`Manager`] reports server status to the control plane on a jittered
//! heartbeat, accepts configuration changes at runtime, and starts the tunnel
//! and telemetry providers with the latest cloud configuration.
//!
//! # Example Usage
//!
//! ```no_run
//! use localup_cloud::{CloudConfig, Manager, ManagerConfig, ServerStatus};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(client: Arc<dyn localup_cloud::CloudClient>) -> Result<(), localup_cloud::ManagerError> {
//! let config = ManagerConfig::builder()
//!     .client(client)
//!     .cloud_config(CloudConfig {
//!         node_id: "node-1".to_string(),
//!         ..Default::default()
//!     })
//!     .status_fn(|| async {
//!         Ok(ServerStatus {
//!             id: "node-1".to_string(),
//!             ..Default::default()
//!         })
//!     })
//!     .build();
//!
//! let manager = Arc::new(Manager::new(config));
//! let cancel = CancellationToken::new();
//!
//! let runner = manager.clone();
//! let task = tokio::spawn({
//!     let cancel = cancel.clone();
//!     async move { runner.run(cancel).await }
//! });
//!
//! // Push status now instead of waiting for the next heartbeat
//! manager.send_update();
//!
//! cancel.cancel();
//! task.await.expect("manager task panicked")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle
//!
//! 1. **Bootstrap**: tunnel provider, then telemetry provider (failures abort `run`)
//! 2. **Initial update**: one status push right away
//! 3. **Loop**: upsert the management token, wait for the heartbeat or a trigger, push
//! 4. **Reconfiguration**: `update_config` swaps the config, restarts providers and triggers a push

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod provider;
pub mod trigger;

pub use client::{CloudClient, ServerStatus};
pub use config::{
    CloudConfig, ManagerConfig, ManagerConfigBuilder, StatusFn, TokenUpserterFn,
    DEFAULT_MAX_INTERVAL, DEFAULT_MIN_INTERVAL,
};
pub use error::{CallbackError, ClientError, ManagerError, ProviderError, UpdateError};
pub use manager::{Manager, MANAGEMENT_TOKEN_LABEL, UPDATE_TIMEOUT};
pub use provider::{TelemetryProvider, TelemetryProviderConfig, TunnelProvider};
pub use trigger::{update_channel, UpdateSignal, UpdateTrigger};
