//! Error taxonomy for the device-link lifecycle.
//!
//! Authoritative steps (directory publish, local store writes) surface their
//! errors to the caller unchanged. Best-effort steps (unlink notification,
//! key-material teardown) are logged and never reported as overall failure.

use crate::link::LinkCheckError;

/// Failure talking to the remote directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[error("directory transport error: {0}")]
    Transport(String),
    /// The directory answered with a non-success status.
    #[error("directory responded with HTTP {0}")]
    Status(u16),
    /// The directory accepted the request but refused the write.
    #[error("directory rejected the device link set: {0}")]
    Rejected(String),
}

/// Failure delivering a protocol message to a device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("network error while sending: {0}")]
    Network(String),
    #[error("no session established with recipient")]
    NoSession,
    #[error("recipient is unreachable")]
    Unreachable,
}

/// Local persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("link for master {found} cannot be stored under {expected}")]
    MasterMismatch { expected: String, found: String },
}

/// Errors from requesting, authorizing, or editing a device link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The account already has the maximum number of linked devices.
    #[error("multi-device limit reached")]
    LimitReached,
    /// One of the link signatures does not verify.
    #[error("device link signature is invalid")]
    SignatureInvalid,
    /// The candidate link is malformed (bad key encoding, master == slave).
    #[error("invalid device link: {0}")]
    InvalidLink(String),
    /// The candidate was addressed to a different master key.
    #[error("device link is addressed to a different master key")]
    WrongMaster,
    /// No link exists for the requested (master, slave) pair.
    #[error("device is not linked")]
    NotLinked,
    #[error(transparent)]
    Directory(NetworkError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<LinkCheckError> for LinkError {
    fn from(err: LinkCheckError) -> Self {
        match err {
            LinkCheckError::RequestSignature | LinkCheckError::GrantSignature => {
                Self::SignatureInvalid
            }
            other => Self::InvalidLink(other.to_string()),
        }
    }
}

/// Errors from the unlink sequence.
///
/// `NotFound` is a pure local lookup miss and `Directory` a remote failure;
/// both leave local state exactly as it was.
#[derive(Debug, thiserror::Error)]
pub enum UnlinkError {
    #[error("no device link found for this master/slave pair")]
    NotFound,
    #[error("directory update failed: {0}")]
    Directory(NetworkError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failures_map_to_signature_invalid() {
        assert!(matches!(
            LinkError::from(LinkCheckError::RequestSignature),
            LinkError::SignatureInvalid
        ));
        assert!(matches!(
            LinkError::from(LinkCheckError::GrantSignature),
            LinkError::SignatureInvalid
        ));
    }

    #[test]
    fn shape_failures_map_to_invalid_link() {
        match LinkError::from(LinkCheckError::SameKey) {
            LinkError::InvalidLink(msg) => assert!(msg.contains("same key")),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn not_found_and_directory_error_render_differently() {
        let not_found = UnlinkError::NotFound.to_string();
        let directory = UnlinkError::Directory(NetworkError::Status(503)).to_string();
        assert_ne!(not_found, directory);
        assert!(directory.contains("503"));
    }
}
