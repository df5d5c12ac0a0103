//! Post-link synchronization broadcasts.
//!
//! After a device is linked, the new device needs the account's closed
//! groups, open groups and contacts. The triggers themselves belong to an
//! external sync subsystem; this module only orders them.
//!
//! Contact sync depends on closed-group state having propagated, so it is
//! started only once the closed-group trigger has completed. An optional
//! grace period can still be added after that completion.

use crate::config::SyncConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Fire-and-forget sync triggers provided by the sync subsystem.
#[async_trait]
pub trait SyncCoordinator: Send + Sync {
    async fn sync_closed_groups(&self) -> anyhow::Result<()>;
    async fn sync_open_groups(&self) -> anyhow::Result<()>;
    async fn sync_contacts(&self) -> anyhow::Result<()>;
}

/// Which triggers succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub closed_groups: bool,
    pub open_groups: bool,
    pub contacts: bool,
}

/// Runs the three triggers in dependency order on a background task.
#[derive(Clone)]
pub struct SyncScheduler {
    coordinator: Arc<dyn SyncCoordinator>,
    contact_grace: Duration,
}

impl SyncScheduler {
    pub fn new(coordinator: Arc<dyn SyncCoordinator>, contact_grace: Duration) -> Self {
        Self {
            coordinator,
            contact_grace,
        }
    }

    /// Spawn the post-link broadcasts for a newly linked `slave`.
    ///
    /// Closed and open groups run concurrently; contacts start after both
    /// have completed. A failing trigger is logged and does not stop the
    /// others.
    pub fn schedule_after_link(&self, slave: &str) -> JoinHandle<SyncReport> {
        let coordinator = Arc::clone(&self.coordinator);
        let grace = self.contact_grace;
        let slave = slave.to_string();

        tokio::spawn(async move {
            let (closed, open) = tokio::join!(
                coordinator.sync_closed_groups(),
                coordinator.sync_open_groups()
            );
            let closed_groups = log_outcome(&slave, "closed_groups", closed);
            let open_groups = log_outcome(&slave, "open_groups", open);

            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
            let contacts = log_outcome(&slave, "contacts", coordinator.sync_contacts().await);

            SyncReport {
                closed_groups,
                open_groups,
                contacts,
            }
        })
    }
}

fn log_outcome(slave: &str, kind: &'static str, result: anyhow::Result<()>) -> bool {
    match result {
        Ok(()) => {
            tracing::debug!(slave = %slave, kind, "Sync broadcast sent");
            true
        }
        Err(e) => {
            tracing::warn!(slave = %slave, kind, "Sync broadcast failed: {e}");
            false
        }
    }
}

#[derive(Serialize)]
struct TriggerBody<'a> {
    account: &'a str,
}

/// HTTP sync triggers: `POST {base_url}/sync/{closed_groups|open_groups|contacts}`.
pub struct HttpSyncTrigger {
    base_url: String,
    account: String,
    http: reqwest::Client,
}

impl HttpSyncTrigger {
    pub fn new(config: &SyncConfig, account: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            account: account.to_string(),
            http,
        })
    }

    async fn trigger(&self, kind: &str) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/sync/{kind}", self.base_url))
            .json(&TriggerBody {
                account: &self.account,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl SyncCoordinator for HttpSyncTrigger {
    async fn sync_closed_groups(&self) -> anyhow::Result<()> {
        self.trigger("closed_groups").await
    }

    async fn sync_open_groups(&self) -> anyhow::Result<()> {
        self.trigger("open_groups").await
    }

    async fn sync_contacts(&self) -> anyhow::Result<()> {
        self.trigger("contacts").await
    }
}
