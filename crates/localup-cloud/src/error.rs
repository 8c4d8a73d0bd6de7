//! Error types for the cloud link manager

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::Manager::run`] and [`crate::Manager::update_config`]
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Cloud manager is already running")]
    AlreadyRunning,

    #[error("Tunnel provider error: {0}")]
    TunnelProvider(ProviderError),

    #[error("Telemetry provider error: {0}")]
    TelemetryProvider(ProviderError),
}

/// Errors reported by tunnel and telemetry providers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    #[error("Provider failed to start: {0}")]
    StartFailed(String),

    #[error("Provider error: {0}")]
    Other(String),
}

/// Errors reported by a [`crate::CloudClient`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Connection to control plane failed: {0}")]
    ConnectionFailed(String),

    #[error("Control plane rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Error returned by the status and token-upsert callbacks
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Outcome of a single status push attempt
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Failed to collect server status: {0}")]
    Status(CallbackError),

    #[error("Failed to push server status: {0}")]
    Push(#[from] ClientError),

    #[error("Status update timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ManagerError::TunnelProvider(ProviderError::StartFailed("boom".into()));
        assert_eq!(
            err.to_string(),
            "Tunnel provider error: Provider failed to start: boom"
        );

        let err = UpdateError::Push(ClientError::Rejected {
            status: 503,
            message: "unavailable".into(),
        });
        assert_eq!(
            err.to_string(),
            "Failed to push server status: Control plane rejected request (503): unavailable"
        );

        let err = UpdateError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "Status update timed out after 5s");
    }
}
