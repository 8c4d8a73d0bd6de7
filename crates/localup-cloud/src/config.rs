//! Manager configuration and heartbeat scheduling

use crate::client::{CloudClient, ServerStatus};
use crate::error::CallbackError;
use crate::provider::{TelemetryProvider, TunnelProvider};
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Lower heartbeat bound used when none is configured
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(45 * 60);

/// Upper heartbeat bound used when none is configured
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(75 * 60);

/// Produces a fresh server status snapshot
pub type StatusFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ServerStatus, CallbackError>> + Send + Sync>;

/// Idempotently upserts the management token: `(label, secret)`
pub type TokenUpserterFn = Arc<dyn Fn(&str, &str) -> Result<(), CallbackError> + Send + Sync>;

/// Identity and endpoints of this server on the control plane
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Control-plane resource this cluster is linked to
    #[serde(default)]
    pub resource_id: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Control-plane API host (e.g., "api.cloud.example.com")
    #[serde(default)]
    pub hostname: String,

    #[serde(default)]
    pub auth_url: String,

    /// Tunnel broker address used by the tunnel provider
    #[serde(default)]
    pub tunnel_address: String,

    /// Management token issued by the control plane, upserted every cycle
    #[serde(default)]
    pub management_token: Option<String>,

    #[serde(default)]
    pub node_id: String,

    #[serde(default)]
    pub node_name: String,

    /// Skip TLS verification (development only, insecure)
    #[serde(default)]
    pub tls_insecure: bool,
}

impl CloudConfig {
    /// Management token, if one is set and non-empty
    pub fn management_token(&self) -> Option<&str> {
        self.management_token.as_deref().filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudConfig")
            .field("resource_id", &self.resource_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("hostname", &self.hostname)
            .field("auth_url", &self.auth_url)
            .field("tunnel_address", &self.tunnel_address)
            .field(
                "management_token",
                &self.management_token.as_ref().map(|_| "<redacted>"),
            )
            .field("node_id", &self.node_id)
            .field("node_name", &self.node_name)
            .field("tls_insecure", &self.tls_insecure)
            .finish()
    }
}

/// Full manager configuration, replaced wholesale on every reconfiguration
#[derive(Clone, Default)]
pub struct ManagerConfig {
    pub client: Option<Arc<dyn CloudClient>>,
    pub cloud_config: CloudConfig,
    pub tunnel_provider: Option<Arc<dyn TunnelProvider>>,
    pub telemetry_provider: Option<Arc<dyn TelemetryProvider>>,
    pub status_fn: Option<StatusFn>,
    pub token_upserter_fn: Option<TokenUpserterFn>,
    /// Zero means [`DEFAULT_MIN_INTERVAL`]
    pub min_interval: Duration,
    /// Zero means [`DEFAULT_MAX_INTERVAL`]
    pub max_interval: Duration,
}

impl ManagerConfig {
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }

    /// Whether status updates can be sent at all
    ///
    /// A config without a client or a status callback is idle: the manager
    /// keeps running but every update is a silent no-op.
    pub fn enabled(&self) -> bool {
        self.client.is_some() && self.status_fn.is_some()
    }

    /// Delay until the next heartbeat, uniformly jittered in `[min, max]`
    pub fn next_heartbeat(&self) -> Duration {
        let (min, max) = self.heartbeat_bounds();
        let spread = max - min;
        if spread.is_zero() {
            return min;
        }
        min + rand::thread_rng().gen_range(Duration::ZERO..=spread)
    }

    /// Effective `(min, max)` after defaulting; `max` never falls below `min`
    pub fn heartbeat_bounds(&self) -> (Duration, Duration) {
        let min = if self.min_interval.is_zero() {
            DEFAULT_MIN_INTERVAL
        } else {
            self.min_interval
        };
        let max = if self.max_interval.is_zero() {
            DEFAULT_MAX_INTERVAL
        } else {
            self.max_interval
        };
        (min, max.max(min))
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("client", &self.client.is_some())
            .field("cloud_config", &self.cloud_config)
            .field("tunnel_provider", &self.tunnel_provider.is_some())
            .field("telemetry_provider", &self.telemetry_provider.is_some())
            .field("status_fn", &self.status_fn.is_some())
            .field("token_upserter_fn", &self.token_upserter_fn.is_some())
            .field("min_interval", &self.min_interval)
            .field("max_interval", &self.max_interval)
            .finish()
    }
}

/// Builder for ManagerConfig
#[derive(Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    pub fn client(mut self, client: Arc<dyn CloudClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn cloud_config(mut self, cloud_config: CloudConfig) -> Self {
        self.config.cloud_config = cloud_config;
        self
    }

    pub fn tunnel_provider(mut self, provider: Arc<dyn TunnelProvider>) -> Self {
        self.config.tunnel_provider = Some(provider);
        self
    }

    pub fn telemetry_provider(mut self, provider: Arc<dyn TelemetryProvider>) -> Self {
        self.config.telemetry_provider = Some(provider);
        self
    }

    /// Set the status callback from any async closure
    pub fn status_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServerStatus, CallbackError>> + Send + 'static,
    {
        self.config.status_fn = Some(Arc::new(move || f().boxed()));
        self
    }

    pub fn token_upserter_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.config.token_upserter_fn = Some(Arc::new(f));
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.config.min_interval = interval;
        self
    }

    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.config.max_interval = interval;
        self
    }

    pub fn build(self) -> ManagerConfig {
        self.config
    }
}
