use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inspectra_core::AppResult;
use inspectra_domain::{ClaimDecision, HolderId, Lease, LeasePolicy, RenewalDecision, TaskId};

/// Durable keyed storage for task leases.
///
/// Every mutation for one `task_id` must be an atomic read-modify-write:
/// two concurrent `try_acquire` calls for an unclaimed task can never both
/// return [`ClaimDecision::Grant`]. Reads treat leases with
/// `expires_at <= now` as absent.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Grants the lease when it is free, expired, or already held by `holder_id`.
    async fn try_acquire(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<ClaimDecision>;

    /// Extends an active lease owned by `holder_id`.
    async fn renew(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<RenewalDecision>;

    /// Deletes the lease only when `holder_id` owns it. Returns whether a row was removed.
    async fn release(&self, task_id: &TaskId, holder_id: &HolderId) -> AppResult<bool>;

    /// Returns the active lease for one task.
    async fn find_active(&self, task_id: &TaskId, now: DateTime<Utc>)
    -> AppResult<Option<Lease>>;

    /// Physically removes expired leases and returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;
}
