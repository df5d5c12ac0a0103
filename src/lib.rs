//! Device-link lifecycle for a multi-device secure-messaging account.
//!
//! A primary ("master") device authorizes a secondary ("slave") device to
//! share its identity, and later revokes it. [`DeviceLinkManager`] is the
//! entry point; the remote directory, the message relay and the sync
//! subsystem sit behind the [`DirectoryClient`], [`MessageDispatcher`] and
//! [`SyncCoordinator`] traits.

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod manager;
pub mod store;
pub mod sync;
pub mod vault;

#[cfg(test)]
pub(crate) mod testing;

pub use config::DeviceLinkConfig;
pub use directory::DirectoryClient;
pub use dispatch::MessageDispatcher;
pub use error::{DeliveryError, LinkError, NetworkError, StoreError, UnlinkError};
pub use link::{Device, DeviceLink, DeviceLinkSet};
pub use manager::{
    DeviceLinkManager, LinkOutcome, LinkRequest, LinkRequestHandle, UnlinkSummary, UserOutcome,
    MAX_LINKED_DEVICES,
};
pub use sync::SyncCoordinator;
