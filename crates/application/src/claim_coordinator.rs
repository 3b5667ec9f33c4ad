use std::sync::Arc;

use inspectra_core::AppResult;
use inspectra_domain::{
    AcquireOutcome, ClaimDecision, HolderId, Lease, LeasePolicy, RenewOutcome, RenewalDecision,
    TaskId,
};
use tracing::debug;

use crate::claim_ports::LeaseStore;
use crate::clock::Clock;

#[derive(Clone)]
enum CoordinatorMode {
    Enabled(Arc<dyn LeaseStore>),
    Disabled,
}

/// Acquires, renews, and releases task leases with single-holder semantics.
///
/// The coordinator keeps no lease state of its own; the configured
/// [`LeaseStore`] is the only source of truth, so any number of API
/// processes can share it.
#[derive(Clone)]
pub struct ClaimCoordinator {
    mode: CoordinatorMode,
    policy: LeasePolicy,
    clock: Arc<dyn Clock>,
}

impl ClaimCoordinator {
    /// Creates a coordinator backed by a lease store.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>, policy: LeasePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            mode: CoordinatorMode::Enabled(store),
            policy,
            clock,
        }
    }

    /// Creates a coordinator that reports every claim as granted without storing it.
    ///
    /// Only for deployments that run without a lease store; it is never
    /// selected as a reaction to store errors.
    #[must_use]
    pub fn disabled(policy: LeasePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            mode: CoordinatorMode::Disabled,
            policy,
            clock,
        }
    }

    /// Returns whether claims are enforced.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, CoordinatorMode::Enabled(_))
    }

    /// Returns the lease policy.
    #[must_use]
    pub fn policy(&self) -> &LeasePolicy {
        &self.policy
    }

    /// Claims one task, or reports who holds it.
    pub async fn acquire(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
    ) -> AppResult<AcquireOutcome> {
        let now = self.clock.now();
        let CoordinatorMode::Enabled(store) = &self.mode else {
            return Ok(AcquireOutcome::Claimed {
                expires_at: self.policy.expires_at(now),
            });
        };

        match store.try_acquire(task_id, holder_id, now, &self.policy).await? {
            ClaimDecision::Grant(lease) => Ok(AcquireOutcome::Claimed {
                expires_at: lease.expires_at(),
            }),
            ClaimDecision::Deny { held_by } => {
                debug!(
                    task_id = %task_id,
                    holder_id = %holder_id,
                    held_by = %held_by,
                    "task claim denied"
                );
                Ok(AcquireOutcome::Held { held_by })
            }
        }
    }

    /// Extends a lease the caller still owns.
    pub async fn renew(&self, task_id: &TaskId, holder_id: &HolderId) -> AppResult<RenewOutcome> {
        let now = self.clock.now();
        let CoordinatorMode::Enabled(store) = &self.mode else {
            return Ok(RenewOutcome::Renewed {
                expires_at: self.policy.expires_at(now),
            });
        };

        match store.renew(task_id, holder_id, now, &self.policy).await? {
            RenewalDecision::Renew(lease) => Ok(RenewOutcome::Renewed {
                expires_at: lease.expires_at(),
            }),
            RenewalDecision::Lost { held_by } => {
                debug!(
                    task_id = %task_id,
                    holder_id = %holder_id,
                    held_by = held_by.as_ref().map(HolderId::as_str),
                    "task claim renewal lost"
                );
                Ok(RenewOutcome::Lost { held_by })
            }
        }
    }

    /// Releases the caller's lease. Releasing someone else's lease is a no-op.
    pub async fn release(&self, task_id: &TaskId, holder_id: &HolderId) -> AppResult<()> {
        let CoordinatorMode::Enabled(store) = &self.mode else {
            return Ok(());
        };

        let removed = store.release(task_id, holder_id).await?;
        if !removed {
            debug!(
                task_id = %task_id,
                holder_id = %holder_id,
                "task claim release ignored for non-holder"
            );
        }

        Ok(())
    }

    /// Returns the active lease for one task.
    pub async fn current_lease(&self, task_id: &TaskId) -> AppResult<Option<Lease>> {
        match &self.mode {
            CoordinatorMode::Enabled(store) => store.find_active(task_id, self.clock.now()).await,
            CoordinatorMode::Disabled => Ok(None),
        }
    }

    /// Removes expired leases from storage.
    pub async fn compact_expired(&self) -> AppResult<u64> {
        match &self.mode {
            CoordinatorMode::Enabled(store) => store.purge_expired(self.clock.now()).await,
            CoordinatorMode::Disabled => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests;
