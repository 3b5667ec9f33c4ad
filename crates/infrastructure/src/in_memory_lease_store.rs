use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inspectra_application::LeaseStore;
use inspectra_core::AppResult;
use inspectra_domain::{
    ClaimDecision, HolderId, Lease, LeasePolicy, RenewalDecision, TaskId, decide_claim,
    decide_renewal,
};
use tokio::sync::RwLock;

/// In-memory lease store for single-process deployments and tests.
///
/// Every mutation runs under one write lock, which makes the
/// read-decide-write sequence atomic per process.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: RwLock<HashMap<TaskId, Lease>>,
}

impl InMemoryLeaseStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<ClaimDecision> {
        let mut leases = self.leases.write().await;
        let decision = decide_claim(leases.get(task_id), task_id, holder_id, now, policy);

        if let ClaimDecision::Grant(lease) = &decision {
            leases.insert(task_id.clone(), lease.clone());
        }

        Ok(decision)
    }

    async fn renew(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<RenewalDecision> {
        let mut leases = self.leases.write().await;
        let decision = decide_renewal(leases.get(task_id), holder_id, now, policy);

        match &decision {
            RenewalDecision::Renew(lease) => {
                leases.insert(task_id.clone(), lease.clone());
            }
            RenewalDecision::Lost { held_by: None } => {
                leases.remove(task_id);
            }
            RenewalDecision::Lost { held_by: Some(_) } => {}
        }

        Ok(decision)
    }

    async fn release(&self, task_id: &TaskId, holder_id: &HolderId) -> AppResult<bool> {
        let mut leases = self.leases.write().await;

        if !leases
            .get(task_id)
            .is_some_and(|lease| lease.is_held_by(holder_id))
        {
            return Ok(false);
        }

        leases.remove(task_id);
        Ok(true)
    }

    async fn find_active(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Lease>> {
        let leases = self.leases.read().await;

        Ok(leases
            .get(task_id)
            .filter(|lease| lease.is_active_at(now))
            .cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut leases = self.leases.write().await;
        let before = leases.len();
        leases.retain(|_, lease| lease.is_active_at(now));

        Ok(u64::try_from(before - leases.len()).unwrap_or(u64::MAX))
    }
}
