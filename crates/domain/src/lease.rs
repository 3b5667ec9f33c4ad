use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use inspectra_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Default lease duration for inspection task claims.
pub const DEFAULT_LEASE_SECONDS: u32 = 300;

const MAX_LEASE_SECONDS: u32 = 86_400;

/// Identifier of one claimable inspection task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(NonEmptyString);

impl TaskId {
    /// Creates a validated task identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value)
            .map(Self)
            .map_err(|_| AppError::Validation("task_id must not be empty".to_owned()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Identity of a lease holder, normally the authenticated actor subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HolderId(NonEmptyString);

impl HolderId {
    /// Creates a validated holder identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        NonEmptyString::new(value)
            .map(Self)
            .map_err(|_| AppError::Validation("holder_id must not be empty".to_owned()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Lease duration and client renewal cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    lease_seconds: u32,
    renew_interval: Duration,
}

impl LeasePolicy {
    /// Creates a policy that renews at 80% of the lease duration.
    pub fn new(lease_seconds: u32) -> AppResult<Self> {
        if lease_seconds == 0 {
            return Err(AppError::Validation(
                "lease_seconds must be greater than zero".to_owned(),
            ));
        }

        if lease_seconds > MAX_LEASE_SECONDS {
            return Err(AppError::Validation(format!(
                "lease_seconds must not exceed {MAX_LEASE_SECONDS}"
            )));
        }

        Ok(Self {
            lease_seconds,
            renew_interval: Duration::from_millis(u64::from(lease_seconds) * 800),
        })
    }

    /// Overrides the renewal cadence.
    ///
    /// The interval must be non-zero and strictly shorter than the lease,
    /// otherwise an active session would let its own lease lapse.
    pub fn with_renew_interval(mut self, renew_interval: Duration) -> AppResult<Self> {
        if renew_interval.is_zero() {
            return Err(AppError::Validation(
                "renew interval must be greater than zero".to_owned(),
            ));
        }

        if renew_interval >= self.lease_duration() {
            return Err(AppError::Validation(format!(
                "renew interval {}ms must be shorter than the {}s lease",
                renew_interval.as_millis(),
                self.lease_seconds
            )));
        }

        self.renew_interval = renew_interval;
        Ok(self)
    }

    /// Returns the lease duration in seconds.
    #[must_use]
    pub fn lease_seconds(&self) -> u32 {
        self.lease_seconds
    }

    /// Returns the lease duration.
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.lease_seconds))
    }

    /// Returns the client renewal cadence.
    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        self.renew_interval
    }

    /// Returns the expiry for a lease granted or renewed at `now`.
    #[must_use]
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + TimeDelta::seconds(i64::from(self.lease_seconds))
    }
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            lease_seconds: DEFAULT_LEASE_SECONDS,
            renew_interval: Duration::from_secs(u64::from(DEFAULT_LEASE_SECONDS) * 4 / 5),
        }
    }
}

/// Time-bounded exclusive claim on one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    task_id: TaskId,
    holder_id: HolderId,
    acquired_at: DateTime<Utc>,
    renewed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a fresh lease for `holder_id` starting at `now`.
    #[must_use]
    pub fn grant(
        task_id: TaskId,
        holder_id: HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> Self {
        Self {
            task_id,
            holder_id,
            acquired_at: now,
            renewed_at: None,
            expires_at: policy.expires_at(now),
        }
    }

    /// Rebuilds a lease from persisted fields.
    #[must_use]
    pub fn from_parts(
        task_id: TaskId,
        holder_id: HolderId,
        acquired_at: DateTime<Utc>,
        renewed_at: Option<DateTime<Utc>>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            holder_id,
            acquired_at,
            renewed_at,
            expires_at,
        }
    }

    /// Returns a copy extended from `now`, keeping the original acquisition time.
    #[must_use]
    pub fn renewed(&self, now: DateTime<Utc>, policy: &LeasePolicy) -> Self {
        Self {
            task_id: self.task_id.clone(),
            holder_id: self.holder_id.clone(),
            acquired_at: self.acquired_at,
            renewed_at: Some(now),
            expires_at: policy.expires_at(now),
        }
    }

    /// Returns the claimed task.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Returns the current holder.
    #[must_use]
    pub fn holder_id(&self) -> &HolderId {
        &self.holder_id
    }

    /// Returns the first acquisition timestamp.
    #[must_use]
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Returns the latest renewal timestamp, if any.
    #[must_use]
    pub fn renewed_at(&self) -> Option<DateTime<Utc>> {
        self.renewed_at
    }

    /// Returns the expiry timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// A lease at or past its expiry is logically absent.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Returns whether `holder_id` owns this lease.
    #[must_use]
    pub fn is_held_by(&self, holder_id: &HolderId) -> bool {
        &self.holder_id == holder_id
    }
}

/// Store-side decision for one acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Write this lease.
    Grant(Lease),
    /// Keep the stored lease untouched.
    Deny {
        /// Holder of the active conflicting lease.
        held_by: HolderId,
    },
}

/// Store-side decision for one renewal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalDecision {
    /// Write this extended lease.
    Renew(Lease),
    /// Renewal refused; the caller no longer owns the task.
    Lost {
        /// Active holder when someone else owns the task.
        held_by: Option<HolderId>,
    },
}

/// Evaluates an acquisition against the currently stored lease.
///
/// Adapters that cannot express the rule natively (in-memory) call this
/// inside their write lock; Redis and Postgres encode the same rule in their
/// conditional writes.
#[must_use]
pub fn decide_claim(
    existing: Option<&Lease>,
    task_id: &TaskId,
    holder_id: &HolderId,
    now: DateTime<Utc>,
    policy: &LeasePolicy,
) -> ClaimDecision {
    match existing {
        Some(lease) if lease.is_active_at(now) && !lease.is_held_by(holder_id) => {
            ClaimDecision::Deny {
                held_by: lease.holder_id().clone(),
            }
        }
        Some(lease) if lease.is_active_at(now) => ClaimDecision::Grant(lease.renewed(now, policy)),
        _ => ClaimDecision::Grant(Lease::grant(
            task_id.clone(),
            holder_id.clone(),
            now,
            policy,
        )),
    }
}

/// Evaluates a renewal against the currently stored lease.
///
/// Expired leases are never renewed, even when nobody else claimed them.
#[must_use]
pub fn decide_renewal(
    existing: Option<&Lease>,
    holder_id: &HolderId,
    now: DateTime<Utc>,
    policy: &LeasePolicy,
) -> RenewalDecision {
    match existing {
        Some(lease) if lease.is_active_at(now) && lease.is_held_by(holder_id) => {
            RenewalDecision::Renew(lease.renewed(now, policy))
        }
        Some(lease) if lease.is_active_at(now) => RenewalDecision::Lost {
            held_by: Some(lease.holder_id().clone()),
        },
        _ => RenewalDecision::Lost { held_by: None },
    }
}

/// Result of a claim attempt returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Caller owns the task until `expires_at`.
    Claimed {
        /// Lease expiry.
        expires_at: DateTime<Utc>,
    },
    /// Another holder owns an active lease.
    Held {
        /// Current holder.
        held_by: HolderId,
    },
}

impl AcquireOutcome {
    /// Returns whether the caller now owns the task.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed { .. })
    }
}

/// Result of a renewal attempt returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    /// Lease extended until `expires_at`.
    Renewed {
        /// New lease expiry.
        expires_at: DateTime<Utc>,
    },
    /// Lease expired, was released, or passed to another holder.
    Lost {
        /// New holder when one exists.
        held_by: Option<HolderId>,
    },
}

impl RenewOutcome {
    /// Returns whether the lease was extended.
    #[must_use]
    pub fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed { .. })
    }
}
