//! Authenticated protocol messages to individual devices.
//!
//! Delivery may use sealed (unidentified) sender when the recipient
//! supports it, hiding sender metadata from the server. Every failure here
//! is non-fatal to the calling workflow.

use crate::config::MessagingConfig;
use crate::error::DeliveryError;
use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A typed data message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    /// Sender timestamp in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Tells the recipient it has been unlinked and should clean up.
    #[serde(default)]
    pub is_device_unlinking_request: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl DataMessage {
    pub fn device_unlinking_request(timestamp: u64) -> Self {
        Self {
            timestamp,
            is_device_unlinking_request: true,
            body: None,
        }
    }
}

/// Credential allowing sealed delivery to one recipient.
#[derive(Clone, PartialEq, Eq)]
pub struct UnidentifiedAccess {
    pub access_key: Vec<u8>,
}

impl std::fmt::Debug for UnidentifiedAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnidentifiedAccess")
            .field("access_key", &"<redacted>")
            .finish()
    }
}

/// How a message is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Sender hidden from the server.
    Sealed(UnidentifiedAccess),
    /// Sender visible to the server.
    Plain,
}

impl DeliveryMode {
    pub fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }
}

/// Sends protocol messages to a device address.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    /// Sealed-delivery credential for `recipient`, if it supports it.
    async fn unidentified_access(&self, _recipient: &str) -> Option<UnidentifiedAccess> {
        None
    }

    async fn send(
        &self,
        recipient: &str,
        mode: DeliveryMode,
        message: &DataMessage,
        timestamp: u64,
    ) -> Result<(), DeliveryError>;
}

#[derive(Serialize)]
struct Envelope<'a> {
    timestamp: u64,
    sealed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    message: &'a DataMessage,
}

/// HTTP dispatcher: `POST {base_url}/messages/{recipient}`.
pub struct HttpMessageDispatcher {
    base_url: String,
    /// Local account key, sent as the source on plain delivery.
    source: String,
    http: reqwest::Client,
    /// recipient -> sealed-delivery credential
    access_keys: Mutex<HashMap<String, UnidentifiedAccess>>,
}

impl HttpMessageDispatcher {
    /// Build a dispatcher, registering every sealed-sender access key
    /// listed in `config.unidentified_access`.
    pub fn new(config: &MessagingConfig, source: &str) -> anyhow::Result<Self> {
        let mut access_keys = HashMap::new();
        for (recipient, encoded) in &config.unidentified_access {
            let access_key = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .with_context(|| format!("Invalid unidentified access key for {recipient}"))?;
            access_keys.insert(recipient.clone(), UnidentifiedAccess { access_key });
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            source: source.to_string(),
            http,
            access_keys: Mutex::new(access_keys),
        })
    }

    /// Remember the sealed-delivery credential for a recipient.
    pub fn register_unidentified_access(&self, recipient: &str, access: UnidentifiedAccess) {
        self.access_keys.lock().insert(recipient.to_string(), access);
    }
}

#[async_trait]
impl MessageDispatcher for HttpMessageDispatcher {
    async fn unidentified_access(&self, recipient: &str) -> Option<UnidentifiedAccess> {
        self.access_keys.lock().get(recipient).cloned()
    }

    async fn send(
        &self,
        recipient: &str,
        mode: DeliveryMode,
        message: &DataMessage,
        timestamp: u64,
    ) -> Result<(), DeliveryError> {
        let envelope = Envelope {
            timestamp,
            sealed: mode.is_sealed(),
            source: match mode {
                DeliveryMode::Sealed(_) => None,
                DeliveryMode::Plain => Some(self.source.as_str()),
            },
            message,
        };

        let mut request = self
            .http
            .post(format!("{}/messages/{}", self.base_url, recipient))
            .json(&envelope);
        if let DeliveryMode::Sealed(ref access) = mode {
            request = request.header(
                "Unidentified-Access-Key",
                base64::engine::general_purpose::STANDARD.encode(&access.access_key),
            );
        }

        let resp = request
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => Err(DeliveryError::Unreachable),
            reqwest::StatusCode::CONFLICT => Err(DeliveryError::NoSession),
            s => Err(DeliveryError::Network(format!("HTTP {s}"))),
        }
    }
}
