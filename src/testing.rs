//! Test doubles for the external collaborators, plus key helpers.

use crate::directory::DirectoryClient;
use crate::dispatch::{DataMessage, DeliveryMode, MessageDispatcher, UnidentifiedAccess};
use crate::error::{DeliveryError, NetworkError};
use crate::link::{public_key_hex, DeviceLink, DeviceLinkSet};
use crate::manager::DeviceLinkManager;
use crate::store::DeviceLinkStore;
use crate::sync::{SyncCoordinator, SyncScheduler};
use crate::vault::KeyMaterialVault;
use async_trait::async_trait;
use parking_lot::Mutex;
use ring::rand::SystemRandom;
use ring::signature::Ed25519KeyPair;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub fn keypair() -> Ed25519KeyPair {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
    Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
}

/// A link with valid request and grant signatures.
pub fn signed_link(master: &Ed25519KeyPair, slave: &Ed25519KeyPair) -> DeviceLink {
    let mut link = DeviceLink::new(public_key_hex(master), public_key_hex(slave));
    link.sign_request(master).unwrap();
    link.sign_grant(slave).unwrap();
    link
}

// ── Directory ────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDirectory {
    attempts: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    published: Mutex<Vec<(String, DeviceLinkSet)>>,
}

impl FakeDirectory {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Every publish call, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successfully published sets, in order.
    pub fn published(&self) -> Vec<(String, DeviceLinkSet)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn publish_device_links(
        &self,
        master_public_key: &str,
        links: &DeviceLinkSet,
    ) -> Result<(), NetworkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NetworkError::Transport("connection reset".into()));
        }
        self.published
            .lock()
            .push((master_public_key.to_string(), links.clone()));
        Ok(())
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub sealed: bool,
    pub message: DataMessage,
    pub timestamp: u64,
}

#[derive(Default)]
pub struct FakeDispatcher {
    attempts: AtomicUsize,
    failing: AtomicBool,
    sealed_recipients: Mutex<HashSet<String>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl FakeDispatcher {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn allow_sealed(&self, recipient: &str) {
        self.sealed_recipients.lock().insert(recipient.to_string());
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageDispatcher for FakeDispatcher {
    async fn unidentified_access(&self, recipient: &str) -> Option<UnidentifiedAccess> {
        self.sealed_recipients
            .lock()
            .contains(recipient)
            .then(|| UnidentifiedAccess {
                access_key: vec![7; 16],
            })
    }

    async fn send(
        &self,
        recipient: &str,
        mode: DeliveryMode,
        message: &DataMessage,
        timestamp: u64,
    ) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Unreachable);
        }
        self.sent.lock().push(SentMessage {
            recipient: recipient.to_string(),
            sealed: mode.is_sealed(),
            message: message.clone(),
            timestamp,
        });
        Ok(())
    }
}

// ── Sync ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSync {
    closed_group_delay: Duration,
    fail_closed_groups: AtomicBool,
    finished: Mutex<Vec<&'static str>>,
    pub contacts_done: Notify,
}

impl FakeSync {
    pub fn with_closed_group_delay(delay: Duration) -> Self {
        Self {
            closed_group_delay: delay,
            ..Self::default()
        }
    }

    pub fn fail_closed_groups(&self) {
        self.fail_closed_groups.store(true, Ordering::SeqCst);
    }

    /// Triggers in the order they completed.
    pub fn finished(&self) -> Vec<&'static str> {
        self.finished.lock().clone()
    }
}

#[async_trait]
impl SyncCoordinator for FakeSync {
    async fn sync_closed_groups(&self) -> anyhow::Result<()> {
        if !self.closed_group_delay.is_zero() {
            tokio::time::sleep(self.closed_group_delay).await;
        }
        self.finished.lock().push("closed_groups");
        if self.fail_closed_groups.load(Ordering::SeqCst) {
            anyhow::bail!("closed group sync failed");
        }
        Ok(())
    }

    async fn sync_open_groups(&self) -> anyhow::Result<()> {
        self.finished.lock().push("open_groups");
        Ok(())
    }

    async fn sync_contacts(&self) -> anyhow::Result<()> {
        self.finished.lock().push("contacts");
        self.contacts_done.notify_one();
        Ok(())
    }
}

// ── Manager harness ──────────────────────────────────────────────

/// A manager over in-memory stores and fake collaborators.
pub struct Harness {
    pub manager: DeviceLinkManager,
    pub store: Arc<DeviceLinkStore>,
    pub vault: Arc<KeyMaterialVault>,
    pub directory: Arc<FakeDirectory>,
    pub dispatcher: Arc<FakeDispatcher>,
    pub sync: Arc<FakeSync>,
    pub master: Ed25519KeyPair,
    pub master_key: String,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(DeviceLinkStore::in_memory().unwrap());
        let vault = Arc::new(KeyMaterialVault::in_memory().unwrap());
        let directory = Arc::new(FakeDirectory::default());
        let dispatcher = Arc::new(FakeDispatcher::default());
        let sync = Arc::new(FakeSync::default());
        let manager = DeviceLinkManager::new(
            Arc::clone(&store),
            Arc::clone(&vault),
            directory.clone(),
            dispatcher.clone(),
            SyncScheduler::new(sync.clone(), Duration::ZERO),
        );
        let master = keypair();
        let master_key = public_key_hex(&master);

        Self {
            manager,
            store,
            vault,
            directory,
            dispatcher,
            sync,
            master,
            master_key,
        }
    }

    /// A valid candidate from a fresh slave to this harness's master.
    pub fn candidate(&self) -> (Ed25519KeyPair, DeviceLink) {
        let slave = keypair();
        let link = signed_link(&self.master, &slave);
        (slave, link)
    }
}
