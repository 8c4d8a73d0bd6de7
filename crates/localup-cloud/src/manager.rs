//! Cloud link manager
//!
//! Keeps this node's status current on the control plane. The manager runs a
//! single long-lived loop that pushes a status snapshot on a jittered
//! heartbeat, or earlier when anything calls [`Manager::send_update`]. It is
//! meant to run for the whole life of the agent, even before any cloud
//! credentials exist: an idle config turns every push into a no-op until
//! [`Manager::update_config`] supplies one.

use crate::config::ManagerConfig;
use crate::error::{ManagerError, UpdateError};
use crate::provider::bootstrap_providers;
use crate::trigger::{update_channel, UpdateSignal, UpdateTrigger};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

/// Deadline for collecting and pushing one status snapshot
pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Label passed to the token upserter
pub const MANAGEMENT_TOKEN_LABEL: &str = "Cloud Management Token";

pub struct Manager {
    cfg: RwLock<ManagerConfig>,

    trigger: UpdateTrigger,

    /// Taken by the first call to `run`
    signal: Mutex<Option<UpdateSignal>>,

    /// Held across every config swap that restarts providers, and across the initial bootstrap
    providers: Mutex<ProviderState>,

    /// Signalled after every enabled push attempt
    #[cfg(test)]
    update_sent: Option<tokio::sync::mpsc::Sender<()>>,
}

/// Provider lifecycle of the active run
#[derive(Default)]
struct ProviderState {
    /// Token of the active run; `None` while not running
    run: Option<CancellationToken>,

    /// Child of `run` handed to the current telemetry provider
    telemetry: Option<CancellationToken>,
}

impl ProviderState {
    /// Stop the previous telemetry run and bootstrap both providers with `config`
    ///
    /// No-op while not running.
    fn restart(&mut self, config: &ManagerConfig) -> Result<(), ManagerError> {
        let Some(run) = &self.run else {
            return Ok(());
        };

        let telemetry = run.child_token();
        if let Some(previous) = self.telemetry.replace(telemetry.clone()) {
            debug!("Stopping previous telemetry provider run");
            previous.cancel();
        }

        bootstrap_providers(config, telemetry)
    }

    fn stop(&mut self) {
        self.run = None;
        if let Some(telemetry) = self.telemetry.take() {
            telemetry.cancel();
        }
    }
}

impl Manager {
    /// Create a manager with the given configuration
    pub fn new(config: ManagerConfig) -> Self {
        let (trigger, signal) = update_channel();
        Self {
            cfg: RwLock::new(config),
            trigger,
            signal: Mutex::new(Some(signal)),
            providers: Mutex::new(ProviderState::default()),
            #[cfg(test)]
            update_sent: None,
        }
    }

    /// Run the manager until `cancel` fires
    ///
    /// Starts the providers, sends one status update immediately, then keeps
    /// pushing on every heartbeat or trigger. Returns `Ok(())` on cancellation
    /// and an error only if a provider fails to start. Can only be called once.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ManagerError> {
        let mut signal = self
            .signal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(ManagerError::AlreadyRunning)?;

        let node_id = self.snapshot().cloud_config.node_id;
        let span = info_span!("cloud_manager", node_id = %node_id);

        self.run_loop(&mut signal, cancel).instrument(span).await
    }

    async fn run_loop(
        &self,
        signal: &mut UpdateSignal,
        cancel: CancellationToken,
    ) -> Result<(), ManagerError> {
        debug!("Cloud manager starting");

        {
            let mut providers = self.lock_providers();
            providers.run = Some(cancel.clone());
            if let Err(e) = providers.restart(&self.snapshot()) {
                providers.stop();
                return Err(e);
            }
        }

        if cancel.is_cancelled() {
            self.lock_providers().stop();
            return Ok(());
        }

        // Anything armed during bootstrap is covered by the initial update
        if signal.drain() {
            debug!("Dropping update queued before start");
        }
        let mut last_result = self.push_update().await;

        loop {
            let cfg = self.snapshot();

            if let Some(token) = cfg.cloud_config.management_token() {
                if let Some(upsert) = cfg.token_upserter_fn.as_ref() {
                    if let Err(e) = upsert(MANAGEMENT_TOKEN_LABEL, token) {
                        error!("Failed to upsert management token: {}", e);
                    }
                }
            }

            let next_heartbeat = cfg.next_heartbeat();
            drop(cfg);

            if let Err(e) = &last_result {
                error!(
                    next_heartbeat = ?next_heartbeat,
                    "Failed to send server status: {}", e
                );
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Cloud manager stopping");
                    self.lock_providers().stop();
                    return Ok(());
                }
                _ = signal.armed() => {
                    last_result = self.push_update().await;
                }
                _ = tokio::time::sleep(next_heartbeat) => {
                    last_result = self.push_update().await;
                }
            }
        }
    }

    /// Replace the configuration and request an immediate update
    ///
    /// If the manager is running, the providers are restarted with the new
    /// config; a provider failure is logged and returned, but the new config
    /// stays in place and the update is still requested.
    pub fn update_config(&self, config: ManagerConfig) -> Result<(), ManagerError> {
        // Concurrent callers restart providers in the same order they write the config
        let mut providers = self.lock_providers();

        let latest = config.clone();
        let (was_enabled, is_enabled) = {
            let mut cfg = self.cfg.write().unwrap_or_else(|e| e.into_inner());
            let was_enabled = cfg.enabled();
            *cfg = config;
            (was_enabled, cfg.enabled())
        };

        // Stay quiet unless the cloud link is or was configured
        match (was_enabled, is_enabled) {
            (false, true) => info!("Cloud configuration added, status updates enabled"),
            (true, false) => info!("Cloud configuration removed, status updates disabled"),
            (true, true) => info!("Updated cloud configuration"),
            (false, false) => {}
        }

        let result = providers.restart(&latest);
        drop(providers);

        // New config may carry connection details worth reporting right away
        self.send_update();

        result
    }

    /// Request a status update ahead of the next heartbeat; never blocks
    pub fn send_update(&self) {
        debug!("Triggering cloud status update");
        if !self.trigger.arm() {
            debug!("Status update already pending");
        }
    }

    fn lock_providers(&self) -> MutexGuard<'_, ProviderState> {
        self.providers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> ManagerConfig {
        self.cfg.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // TODO: retry failed pushes with backoff, dropping the retry when a newer
    // trigger arrives instead of starting a second retry cycle
    async fn push_update(&self) -> Result<(), UpdateError> {
        let cfg = self.snapshot();
        let (Some(client), Some(status_fn)) = (cfg.client.as_ref(), cfg.status_fn.as_ref()) else {
            return Ok(());
        };

        let result = tokio::time::timeout(UPDATE_TIMEOUT, async {
            let status = status_fn().await.map_err(UpdateError::Status)?;
            client.push_server_status(&status).await?;
            Ok::<(), UpdateError>(())
        })
        .await
        .unwrap_or(Err(UpdateError::Timeout(UPDATE_TIMEOUT)));

        if result.is_ok() {
            debug!("Sent server status to control plane");
        }

        self.notify_update_sent();

        result
    }

    #[cfg(test)]
    fn notify_update_sent(&self) {
        if let Some(tx) = &self.update_sent {
            let _ = tx.try_send(());
        }
    }

    #[cfg(not(test))]
    fn notify_update_sent(&self) {}
}
