//! Configuration for the device-link core.
//!
//! Loaded from TOML; every field has a default so a partial file is fine.
//! `DEVICELINK_*` environment variables override the file. The local account
//! identity lives here and is handed to the manager at construction, never
//! looked up from ambient state.
//!
//! ```toml
//! local_public_key = "…64 hex chars…"
//! contact_sync_delay_ms = 0
//!
//! [directory]
//! base_url = "https://directory.example.org"
//! auth_token = "…"
//!
//! [messaging]
//! base_url = "https://relay.example.org"
//!
//! [messaging.unidentified_access]
//! "…device key…" = "…base64 access key…"
//!
//! [sync]
//! base_url = "https://relay.example.org"
//! ```

use crate::link::signature::decode_public_key;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8787";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLinkConfig {
    /// Hex-encoded Ed25519 public key of the local (master) account.
    pub local_public_key: String,
    /// Where the link store and key-material vault live.
    pub data_dir: Option<PathBuf>,
    /// Extra wait after closed-group sync completes before contact sync.
    pub contact_sync_delay_ms: u64,
    pub directory: DirectoryConfig,
    pub messaging: MessagingConfig,
    pub sync: SyncConfig,
}

/// Remote device-link directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout_secs: u64,
}

/// Message relay used for unlink notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Sealed-sender access keys, device public key -> base64 key.
    /// Devices listed here receive unlink notifications with sealed delivery.
    pub unidentified_access: BTreeMap<String, String>,
}

/// Sync subsystem endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub base_url: String,
}

impl Default for DeviceLinkConfig {
    fn default() -> Self {
        Self {
            local_public_key: String::new(),
            data_dir: None,
            contact_sync_delay_ms: 0,
            directory: DirectoryConfig::default(),
            messaging: MessagingConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            auth_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            unidentified_access: BTreeMap::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
        }
    }
}

impl DeviceLinkConfig {
    /// Default config file location (`~/.config/devicelink/config.toml` on Linux).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "devicelink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid devicelink config")
    }

    /// Load, apply environment overrides, and validate.
    ///
    /// With no explicit path, the default location is used if it exists and
    /// pure defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match resolved {
            Some(ref p) if p.exists() => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config {}", p.display()))?;
                Self::from_toml(&text)?
            }
            Some(ref p) if path.is_some() => bail!("Config file {} not found", p.display()),
            _ => Self::default(),
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `DEVICELINK_*` overrides from `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("DEVICELINK_LOCAL_PUBLIC_KEY") {
            self.local_public_key = key.trim().to_string();
        }
        if let Some(dir) = non_empty("DEVICELINK_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = non_empty("DEVICELINK_DIRECTORY_URL") {
            self.directory.base_url = url;
        }
        if let Some(token) = non_empty("DEVICELINK_DIRECTORY_TOKEN") {
            self.directory.auth_token = Some(token);
        }
        if let Some(url) = non_empty("DEVICELINK_MESSAGING_URL") {
            self.messaging.base_url = url;
        }
        if let Some(url) = non_empty("DEVICELINK_SYNC_URL") {
            self.sync.base_url = url;
        }
    }

    /// Reject configs the manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.local_public_key.trim().is_empty() {
            bail!("local_public_key is not set");
        }
        decode_public_key(&self.local_public_key)
            .map_err(|reason| anyhow::anyhow!("local_public_key is malformed: {reason}"))?;

        for (section, url) in [
            ("directory", &self.directory.base_url),
            ("messaging", &self.messaging.base_url),
            ("sync", &self.sync.base_url),
        ] {
            reqwest::Url::parse(url)
                .with_context(|| format!("{section}.base_url is not a valid URL: '{url}'"))?;
        }
        Ok(())
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("", "", "devicelink")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".devicelink"))
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir().join("device_links.db")
    }

    pub fn vault_path(&self) -> PathBuf {
        self.data_dir().join("key_material.db")
    }

    pub fn contact_sync_delay(&self) -> Duration {
        Duration::from_millis(self.contact_sync_delay_ms)
    }
}
