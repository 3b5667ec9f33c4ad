use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::HolderId;

/// Observable state of one client claim session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClaimSessionState {
    /// No lease is owned; `held_by` names the blocking holder when known.
    Unclaimed {
        /// Holder that denied or took over the claim.
        held_by: Option<HolderId>,
    },
    /// Acquisition in flight.
    Claiming,
    /// Lease owned until `expires_at`.
    Claimed {
        /// Current lease expiry.
        expires_at: DateTime<Utc>,
    },
    /// Renewal in flight for a lease that is still owned.
    Renewing {
        /// Expiry of the lease being renewed.
        expires_at: DateTime<Utc>,
    },
    /// Session closed and lease released.
    Released,
}

impl ClaimSessionState {
    /// Returns whether the session currently owns the task.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed { .. } | Self::Renewing { .. })
    }

    /// Returns the blocking holder when the session is unclaimed.
    #[must_use]
    pub fn held_by(&self) -> Option<&HolderId> {
        match self {
            Self::Unclaimed { held_by } => held_by.as_ref(),
            _ => None,
        }
    }
}
