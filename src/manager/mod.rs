//! Device-link lifecycle orchestration.
//!
//! [`DeviceLinkManager`] is the only entry point the UI uses. It composes
//! the local link store, the key-material vault, the remote directory, the
//! message dispatcher and the post-link sync scheduler.
//!
//! ## Unlink sequence
//!
//! 1. Look up the (master, slave) link locally; absent → `NotFound`
//! 2. Publish an empty set to the directory; failure → `Directory`,
//!    local state untouched
//! 3. Clear the local set for the master
//! 4. Per unlinked device, best effort: send an unlinking request
//!    (sealed when possible), then remove its key material
//!
//! The directory is always updated before local state, so a crash between
//! steps can never leave a local link the directory no longer has.
//!
//! Writes on one master key (authorize, unlink, rename) are serialized by a
//! per-key lock. Reads are never blocked and always see a whole set.

pub mod locks;
pub mod outcome;
pub mod request;

pub use locks::KeyedLocks;
pub use outcome::{LinkOutcome, UnlinkSummary, UserOutcome};
pub use request::{LinkRequest, LinkRequestHandle};

use crate::config::DeviceLinkConfig;
use crate::directory::{DirectoryClient, HttpDirectoryClient};
use crate::dispatch::{DataMessage, DeliveryMode, HttpMessageDispatcher, MessageDispatcher};
use crate::error::{LinkError, UnlinkError};
use crate::link::{Device, DeviceLink, DeviceLinkSet};
use crate::store::{DeviceLinkStore, LinkEntry};
use crate::sync::{HttpSyncTrigger, SyncScheduler};
use crate::vault::KeyMaterialVault;
use anyhow::Context;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// At most this many devices may be linked to one master key.
pub const MAX_LINKED_DEVICES: usize = 1;

/// Orchestrates linking and unlinking of secondary devices.
pub struct DeviceLinkManager {
    store: Arc<DeviceLinkStore>,
    vault: Arc<KeyMaterialVault>,
    directory: Arc<dyn DirectoryClient>,
    dispatcher: Arc<dyn MessageDispatcher>,
    sync: SyncScheduler,
    locks: KeyedLocks,
}

impl DeviceLinkManager {
    pub fn new(
        store: Arc<DeviceLinkStore>,
        vault: Arc<KeyMaterialVault>,
        directory: Arc<dyn DirectoryClient>,
        dispatcher: Arc<dyn MessageDispatcher>,
        sync: SyncScheduler,
    ) -> Self {
        Self {
            store,
            vault,
            directory,
            dispatcher,
            sync,
            locks: KeyedLocks::new(),
        }
    }

    /// Build a manager with file-backed stores and HTTP collaborators.
    pub fn from_config(config: &DeviceLinkConfig) -> anyhow::Result<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let store = DeviceLinkStore::open(&config.store_path())?;
        let vault = KeyMaterialVault::open(&config.vault_path())?;
        let directory = HttpDirectoryClient::new(&config.directory)?;
        let dispatcher = HttpMessageDispatcher::new(&config.messaging, &config.local_public_key)?;
        let sync = HttpSyncTrigger::new(&config.sync, &config.local_public_key)?;

        Ok(Self::new(
            Arc::new(store),
            Arc::new(vault),
            Arc::new(directory),
            Arc::new(dispatcher),
            SyncScheduler::new(Arc::new(sync), config.contact_sync_delay()),
        ))
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Linked devices for `master`, oldest first.
    ///
    /// Recomputed from the store on every call. Never fails: a store error
    /// is logged and yields an empty list.
    pub fn list_devices(&self, master: &str) -> Vec<Device> {
        match self.store.entries(master) {
            Ok(entries) => entries.into_iter().map(project).collect(),
            Err(e) => {
                tracing::warn!(master = %master, "Failed to read device links: {e}");
                Vec::new()
            }
        }
    }

    // ── Linking ─────────────────────────────────────────────────────

    /// Enter "awaiting authorization" mode for `master`.
    ///
    /// Refused up front with [`LinkError::LimitReached`] when a device is
    /// already linked. Nothing is touched either way.
    pub fn request_link(
        &self,
        master: &str,
    ) -> Result<(LinkRequest, LinkRequestHandle), LinkError> {
        if self.list_devices(master).len() >= MAX_LINKED_DEVICES {
            tracing::info!(master = %master, "Link request refused: multi-device limit reached");
            return Err(LinkError::LimitReached);
        }
        tracing::info!(master = %master, "Awaiting device link request");
        Ok(LinkRequest::new(master))
    }

    /// Wait for the request to be answered or canceled.
    pub async fn await_link(&self, request: LinkRequest) -> LinkOutcome {
        let LinkRequest {
            master_public_key,
            mut candidates,
            cancel,
        } = request;

        let candidate = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = candidates.recv() => next,
        };

        let Some(candidate) = candidate else {
            tracing::info!(master = %master_public_key, "Device link request canceled");
            return LinkOutcome::Canceled;
        };

        if candidate.master_public_key != master_public_key {
            tracing::warn!(
                master = %master_public_key,
                addressed_to = %candidate.master_public_key,
                "Device link request addressed to another master"
            );
            return LinkOutcome::Failed(LinkError::WrongMaster);
        }

        match self.authorize_link(candidate).await {
            Ok(device) => LinkOutcome::Authorized(device),
            Err(e) => LinkOutcome::Failed(e),
        }
    }

    /// Verify and persist a slave's link request.
    ///
    /// On success the new set is published to the directory first, then
    /// stored locally, then the post-link sync broadcasts are scheduled.
    /// Any failure before the local write leaves local state unchanged.
    pub async fn authorize_link(&self, candidate: DeviceLink) -> Result<Device, LinkError> {
        let master = candidate.master_public_key.clone();
        let slave = candidate.slave_public_key.clone();

        if let Err(e) = candidate.verify() {
            tracing::warn!(master = %master, slave = %slave, "Device link rejected: {e}");
            return Err(e.into());
        }

        let device = {
            let _guard = self.locks.lock(&master).await;

            let mut links = self.store.get_device_links(&master)?;
            if !links.contains(&master, &slave) && links.len() >= MAX_LINKED_DEVICES {
                tracing::info!(master = %master, slave = %slave, "Authorization refused: multi-device limit reached");
                return Err(LinkError::LimitReached);
            }
            links.insert(candidate);

            if let Err(e) = self.directory.publish_device_links(&master, &links).await {
                tracing::warn!(master = %master, slave = %slave, "Failed to publish device links: {e}");
                return Err(LinkError::Directory(e));
            }
            self.store.set_device_links(&master, &links)?;

            self.store
                .entry(&master, &slave)?
                .map(project)
                .ok_or(LinkError::NotLinked)?
        };

        tracing::info!(master = %master, slave = %slave, "Device linked");
        self.sync.schedule_after_link(&slave);
        Ok(device)
    }

    /// Set or clear the display name of a linked device.
    pub async fn rename_device(
        &self,
        master: &str,
        slave: &str,
        name: Option<&str>,
    ) -> Result<Device, LinkError> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let _guard = self.locks.lock(master).await;

        if !self.store.set_device_name(master, slave, name)? {
            return Err(LinkError::NotLinked);
        }
        self.store
            .entry(master, slave)?
            .map(project)
            .ok_or(LinkError::NotLinked)
    }

    // ── Unlinking ───────────────────────────────────────────────────

    /// Revoke the link between `master` and `slave`.
    pub async fn unlink_device(
        &self,
        master: &str,
        slave: &str,
    ) -> Result<UnlinkSummary, UnlinkError> {
        let _guard = self.locks.lock(master).await;

        let links = self.store.get_device_links(master)?;
        if !links.contains(master, slave) {
            tracing::info!(master = %master, slave = %slave, "Unlink failed: no such device link");
            return Err(UnlinkError::NotFound);
        }

        // Single-link topology: revoking one device clears the whole set.
        if let Err(e) = self
            .directory
            .publish_device_links(master, &DeviceLinkSet::new())
            .await
        {
            tracing::warn!(master = %master, slave = %slave, "Unlink failed, directory not updated: {e}");
            return Err(UnlinkError::Directory(e));
        }

        self.store.clear_device_links(master)?;

        let mut summary = UnlinkSummary::default();
        for link in links.iter() {
            let device = link.slave_public_key.as_str();
            if !self.notify_unlinked(device).await {
                summary.undelivered.push(device.to_string());
            }
            if let Err(e) = self.vault.remove_all_sessions_and_keys(device) {
                tracing::warn!(slave = %device, "Failed to remove key material: {e}");
            }
            summary.unlinked.push(device.to_string());
        }

        tracing::info!(
            master = %master,
            unlinked = summary.unlinked.len(),
            undelivered = summary.undelivered.len(),
            "Device unlinked"
        );
        Ok(summary)
    }

    /// Best-effort unlinking request to a revoked device. Returns whether
    /// it was delivered.
    async fn notify_unlinked(&self, device: &str) -> bool {
        let timestamp = epoch_millis();
        let message = DataMessage::device_unlinking_request(timestamp);
        let mode = match self.dispatcher.unidentified_access(device).await {
            Some(access) => DeliveryMode::Sealed(access),
            None => DeliveryMode::Plain,
        };

        match self.dispatcher.send(device, mode, &message, timestamp).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(slave = %device, "Failed to send unlinking request: {e}");
                false
            }
        }
    }
}

fn project(entry: LinkEntry) -> Device {
    Device {
        id: entry.link.slave_public_key,
        name: entry.name,
        linked_at: entry.linked_at,
    }
}

/// Current Unix epoch in milliseconds.
fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
