//! Typed results handed back to the UI layer.

use crate::error::{LinkError, UnlinkError};
use crate::link::Device;

/// Terminal state of an awaited link request.
#[derive(Debug)]
pub enum LinkOutcome {
    /// The slave was authorized and is now linked.
    Authorized(Device),
    /// Signature invalid, wrong master key, or the directory refused.
    Failed(LinkError),
    /// The user aborted; nothing was changed.
    Canceled,
}

/// What a completed unlink did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlinkSummary {
    /// Every slave removed from the directory and the local store.
    pub unlinked: Vec<String>,
    /// Slaves whose unlink notification could not be delivered.
    pub undelivered: Vec<String>,
}

/// The user-facing categories every terminal state maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    MultiDeviceLimitReached,
    LinkAuthorizationFailed,
    LinkCanceled,
    UnlinkFailed,
    UnlinkSucceeded,
}

impl UserOutcome {
    /// Stable key for the UI to localize.
    pub fn label(self) -> &'static str {
        match self {
            Self::MultiDeviceLimitReached => "multi_device_limit_reached",
            Self::LinkAuthorizationFailed => "link_authorization_failed",
            Self::LinkCanceled => "link_canceled",
            Self::UnlinkFailed => "unlink_failed",
            Self::UnlinkSucceeded => "unlink_succeeded",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::MultiDeviceLimitReached | Self::LinkAuthorizationFailed | Self::UnlinkFailed
        )
    }

    /// Category for a refused `request_link`.
    pub fn for_request_error(err: &LinkError) -> Self {
        match err {
            LinkError::LimitReached => Self::MultiDeviceLimitReached,
            _ => Self::LinkAuthorizationFailed,
        }
    }

    /// Category for an awaited link request.
    ///
    /// A successful authorization has no message of its own: the UI just
    /// refreshes its device list.
    pub fn for_link(outcome: &LinkOutcome) -> Option<Self> {
        match outcome {
            LinkOutcome::Authorized(_) => None,
            LinkOutcome::Failed(LinkError::LimitReached) => Some(Self::MultiDeviceLimitReached),
            LinkOutcome::Failed(_) => Some(Self::LinkAuthorizationFailed),
            LinkOutcome::Canceled => Some(Self::LinkCanceled),
        }
    }

    /// Category for an unlink result.
    pub fn for_unlink(result: &Result<UnlinkSummary, UnlinkError>) -> Self {
        match result {
            Ok(_) => Self::UnlinkSucceeded,
            Err(_) => Self::UnlinkFailed,
        }
    }
}

impl std::fmt::Display for UserOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
