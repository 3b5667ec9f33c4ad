use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inspectra_application::LeaseStore;
use inspectra_core::{AppError, AppResult};
use inspectra_domain::{ClaimDecision, HolderId, Lease, LeasePolicy, RenewalDecision, TaskId};
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::postgres_error::map_sqlx_error;

const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// PostgreSQL-backed task lease store.
///
/// Acquisition is a single conditional upsert: the update branch only fires
/// when the stored lease belongs to the caller or has expired, so concurrent
/// claimants serialize on the row lock and exactly one wins.
#[derive(Clone)]
pub struct PostgresLeaseStore {
    pool: PgPool,
}

impl PostgresLeaseStore {
    /// Creates a lease store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn active_row(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> AppResult<Option<TaskClaimRow>> {
        sqlx::query_as::<_, TaskClaimRow>(
            r#"
            SELECT task_id, holder_id, acquired_at, renewed_at, expires_at
            FROM task_claims
            WHERE task_id = $1
              AND expires_at > $2
            "#,
        )
        .bind(task_id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(format!("failed to read task claim '{task_id}'"), error))
    }
}

#[derive(Debug, FromRow)]
struct TaskClaimRow {
    task_id: String,
    holder_id: String,
    acquired_at: DateTime<Utc>,
    renewed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl TaskClaimRow {
    fn into_lease(self) -> AppResult<Lease> {
        Ok(Lease::from_parts(
            TaskId::new(self.task_id)?,
            HolderId::new(self.holder_id)?,
            self.acquired_at,
            self.renewed_at,
            self.expires_at,
        ))
    }
}

#[async_trait]
impl LeaseStore for PostgresLeaseStore {
    async fn try_acquire(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<ClaimDecision> {
        let expires_at = policy.expires_at(now);

        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let claimed = sqlx::query_as::<_, TaskClaimRow>(
                r#"
                INSERT INTO task_claims (task_id, holder_id, acquired_at, renewed_at, expires_at)
                VALUES ($1, $2, $3, NULL, $4)
                ON CONFLICT (task_id)
                DO UPDATE SET
                    holder_id = EXCLUDED.holder_id,
                    acquired_at = CASE
                        WHEN task_claims.holder_id = EXCLUDED.holder_id
                         AND task_claims.expires_at > $3
                        THEN task_claims.acquired_at
                        ELSE EXCLUDED.acquired_at
                    END,
                    renewed_at = CASE
                        WHEN task_claims.holder_id = EXCLUDED.holder_id
                         AND task_claims.expires_at > $3
                        THEN $3
                        ELSE NULL
                    END,
                    expires_at = EXCLUDED.expires_at
                WHERE task_claims.holder_id = EXCLUDED.holder_id
                   OR task_claims.expires_at <= $3
                RETURNING task_id, holder_id, acquired_at, renewed_at, expires_at
                "#,
            )
            .bind(task_id.as_str())
            .bind(holder_id.as_str())
            .bind(now)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| {
                map_sqlx_error(format!("failed to claim task '{task_id}'"), error)
            })?;

            if let Some(row) = claimed {
                return Ok(ClaimDecision::Grant(row.into_lease()?));
            }

            if let Some(current) = self.active_row(task_id, now).await? {
                return Ok(ClaimDecision::Deny {
                    held_by: HolderId::new(current.holder_id)?,
                });
            }

            debug!(
                task_id = %task_id,
                attempt,
                "task claim changed between upsert and read; retrying"
            );
        }

        Err(AppError::Unavailable(format!(
            "task claim '{task_id}' is under heavy contention"
        )))
    }

    async fn renew(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<RenewalDecision> {
        let renewed = sqlx::query_as::<_, TaskClaimRow>(
            r#"
            UPDATE task_claims
            SET renewed_at = $3,
                expires_at = $4
            WHERE task_id = $1
              AND holder_id = $2
              AND expires_at > $3
            RETURNING task_id, holder_id, acquired_at, renewed_at, expires_at
            "#,
        )
        .bind(task_id.as_str())
        .bind(holder_id.as_str())
        .bind(now)
        .bind(policy.expires_at(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(format!("failed to renew task claim '{task_id}'"), error))?;

        if let Some(row) = renewed {
            return Ok(RenewalDecision::Renew(row.into_lease()?));
        }

        let held_by = self
            .active_row(task_id, now)
            .await?
            .map(|row| HolderId::new(row.holder_id))
            .transpose()?
            .filter(|current| current != holder_id);

        Ok(RenewalDecision::Lost { held_by })
    }

    async fn release(&self, task_id: &TaskId, holder_id: &HolderId) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM task_claims
            WHERE task_id = $1
              AND holder_id = $2
            "#,
        )
        .bind(task_id.as_str())
        .bind(holder_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            map_sqlx_error(format!("failed to release task claim '{task_id}'"), error)
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_active(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Lease>> {
        self.active_row(task_id, now)
            .await?
            .map(TaskClaimRow::into_lease)
            .transpose()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM task_claims
            WHERE expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error("failed to purge expired task claims", error))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests;
