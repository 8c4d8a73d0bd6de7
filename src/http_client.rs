//! JSON-over-HTTPS control-plane client

use async_trait::async_trait;
use localup_cloud::{ClientError, CloudClient, CloudConfig, ServerStatus, UPDATE_TIMEOUT};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

/// Pushes server status to `{base_url}/resources/{resource_id}/servers/{id}/status`
pub struct HttpCloudClient {
    http: reqwest::Client,
    base_url: String,
    resource_id: String,
    client_id: String,
    client_secret: String,
}

#[derive(Serialize)]
struct PushStatusRequest<'a> {
    client_id: &'a str,
    server: &'a ServerStatus,
}

impl HttpCloudClient {
    /// Build a client, or `None` if the config carries no credentials
    pub fn from_config(cloud: &CloudConfig) -> Result<Option<Self>, ClientError> {
        if cloud.resource_id.is_empty() || cloud.client_secret.is_empty() {
            return Ok(None);
        }

        let http = reqwest::Client::builder()
            .timeout(UPDATE_TIMEOUT)
            .danger_accept_invalid_certs(cloud.tls_insecure)
            .user_agent(concat!("localup-cloud-agent/", env!("GIT_TAG")))
            .build()
            .map_err(|e| {
                ClientError::ConnectionFailed(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Some(Self {
            http,
            base_url: base_url(&cloud.hostname),
            resource_id: cloud.resource_id.clone(),
            client_id: cloud.client_id.clone(),
            client_secret: cloud.client_secret.clone(),
        }))
    }

    fn status_url(&self, server_id: &str) -> String {
        format!(
            "{}/resources/{}/servers/{}/status",
            self.base_url, self.resource_id, server_id
        )
    }
}

#[async_trait]
impl CloudClient for HttpCloudClient {
    async fn push_server_status(&self, status: &ServerStatus) -> Result<(), ClientError> {
        let url = self.status_url(&status.id);
        debug!("Pushing server status to {}", url);

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.client_secret)
            .json(&PushStatusRequest {
                client_id: &self.client_id,
                server: status,
            })
            .send()
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

        match response.status() {
            code if code.is_success() => Ok(()),
            code @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => Err(
                ClientError::Unauthorized(format!("control plane returned {}", code)),
            ),
            code => {
                let message = response.text().await.unwrap_or_default();
                Err(ClientError::Rejected {
                    status: code.as_u16(),
                    message,
                })
            }
        }
    }
}

/// Normalize a configured hostname into a base URL without a trailing slash
fn base_url(hostname: &str) -> String {
    let hostname = hostname.trim().trim_end_matches('/');
    if hostname.is_empty() {
        return "https://api.cloud.localup.dev".to_string();
    }
    if hostname.starts_with("http://") || hostname.starts_with("https://") {
        hostname.to_string()
    } else {
        format!("https://{}", hostname)
    }
}
