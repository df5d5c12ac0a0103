//! A pending "awaiting authorization" link request.
//!
//! [`LinkRequest`] stays with the manager side and is consumed by
//! `DeviceLinkManager::await_link`. [`LinkRequestHandle`] goes to whatever
//! receives the slave's out-of-band request (a QR scanner, a relay
//! listener) and to the UI's cancel button.

use crate::link::DeviceLink;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The waiting side of a link request.
#[derive(Debug)]
pub struct LinkRequest {
    pub(crate) master_public_key: String,
    pub(crate) candidates: mpsc::Receiver<DeviceLink>,
    pub(crate) cancel: CancellationToken,
}

impl LinkRequest {
    pub(crate) fn new(master_public_key: &str) -> (Self, LinkRequestHandle) {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        (
            Self {
                master_public_key: master_public_key.to_string(),
                candidates: rx,
                cancel: cancel.clone(),
            },
            LinkRequestHandle { sender: tx, cancel },
        )
    }

    pub fn master_public_key(&self) -> &str {
        &self.master_public_key
    }
}

/// The delivering side of a link request.
#[derive(Debug, Clone)]
pub struct LinkRequestHandle {
    sender: mpsc::Sender<DeviceLink>,
    cancel: CancellationToken,
}

impl LinkRequestHandle {
    /// Hand a slave's signed link request to the waiting manager.
    ///
    /// Returns `false` if the request was canceled, already received a
    /// candidate, or is no longer awaited.
    pub fn submit(&self, candidate: DeviceLink) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.sender.try_send(candidate).is_ok()
    }

    /// Abort the request. No network or local state is touched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
