//! Remote directory of device links.
//!
//! The directory is the authoritative source other devices query. It
//! stores the complete current set for a master key, never deltas, and a
//! publish is atomic from the caller's view: either the new set is visible
//! afterwards or the old one remains.

use crate::config::DirectoryConfig;
use crate::error::NetworkError;
use crate::link::DeviceLinkSet;
use async_trait::async_trait;
use serde::Serialize;

/// Publishes device-link sets to the remote directory.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Replace the directory's set for `master_public_key` with `links`.
    /// An empty set means "no linked devices".
    async fn publish_device_links(
        &self,
        master_public_key: &str,
        links: &DeviceLinkSet,
    ) -> Result<(), NetworkError>;
}

#[derive(Serialize)]
struct PublishBody<'a> {
    device_links: &'a DeviceLinkSet,
}

/// HTTP directory client: `PUT {base_url}/device_links/{master}`.
pub struct HttpDirectoryClient {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl HttpDirectoryClient {
    /// Create a client from the directory section of the config.
    pub fn new(config: &DirectoryConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            http,
        })
    }

    fn device_links_url(&self, master_public_key: &str) -> String {
        format!("{}/device_links/{}", self.base_url, master_public_key)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn publish_device_links(
        &self,
        master_public_key: &str,
        links: &DeviceLinkSet,
    ) -> Result<(), NetworkError> {
        let mut request = self
            .http
            .put(self.device_links_url(master_public_key))
            .json(&PublishBody {
                device_links: links,
            });
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| NetworkError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            tracing::debug!(
                master = %master_public_key,
                links = links.len(),
                "Directory accepted device link set"
            );
            return Ok(());
        }

        if status == reqwest::StatusCode::CONFLICT || status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(NetworkError::Rejected(if body.is_empty() {
                status.to_string()
            } else {
                body
            }));
        }

        Err(NetworkError::Status(status.as_u16()))
    }
}
