use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inspectra_application::{ClaimedJob, EXPIRED_LOCK_ERROR, JobStore, NewJob, QueueStats};
use inspectra_core::{AppError, AppResult};
use inspectra_domain::{Job, JobId, JobState, QueueName};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

use crate::postgres_error::map_sqlx_error;

/// PostgreSQL-backed durable job store.
///
/// Claims use `FOR UPDATE SKIP LOCKED` so any number of worker processes can
/// poll the same queue. Every post-claim mutation is fenced by the lock token
/// issued at claim time.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Creates a job store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: uuid::Uuid,
    queue_name: String,
    payload: Value,
    priority: i16,
    state: String,
    attempt: i32,
    max_attempts: i32,
    last_error: Option<String>,
    enqueued_at: DateTime<Utc>,
    available_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct ClaimedJobRow {
    #[sqlx(flatten)]
    job: JobRow,
    lock_token: String,
    locked_by: String,
}

#[derive(Debug, FromRow)]
struct StateCountRow {
    state: String,
    job_count: i64,
}

impl JobRow {
    fn into_job(self) -> AppResult<Job> {
        Ok(Job {
            id: JobId::from_uuid(self.id),
            queue_name: QueueName::new(self.queue_name)?,
            payload: self.payload,
            priority: self.priority,
            state: JobState::parse(self.state.as_str())?,
            attempt: u32::try_from(self.attempt).map_err(|error| {
                AppError::Internal(format!("invalid persisted job attempt: {error}"))
            })?,
            max_attempts: u32::try_from(self.max_attempts).map_err(|error| {
                AppError::Internal(format!("invalid persisted job max_attempts: {error}"))
            })?,
            last_error: self.last_error,
            enqueued_at: self.enqueued_at,
            available_at: self.available_at,
            updated_at: self.updated_at,
            finished_at: self.finished_at,
        })
    }
}

fn fenced_job(
    job_id: JobId,
    action: &str,
    row: Result<Option<JobRow>, sqlx::Error>,
) -> AppResult<Job> {
    let row = row
        .map_err(|error| map_sqlx_error(format!("failed to {action} job '{job_id}'"), error))?;

    let Some(row) = row else {
        return Err(AppError::Conflict(format!(
            "job '{job_id}' is not currently locked with the provided token"
        )));
    };

    row.into_job()
}

fn attempt_to_db(value: u32, field: &str) -> AppResult<i32> {
    i32::try_from(value)
        .map_err(|error| AppError::Validation(format!("invalid job {field} value: {error}")))
}

const JOB_COLUMNS: &str = "id, queue_name, payload, priority, state, attempt, max_attempts, \
     last_error, enqueued_at, available_at, updated_at, finished_at";

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(&self, job: NewJob) -> AppResult<Job> {
        let query = format!(
            r#"
            INSERT INTO background_jobs (
                id,
                queue_name,
                payload,
                priority,
                state,
                attempt,
                max_attempts,
                enqueued_at,
                available_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, 'queued', 1, $5, $6, $7, $6)
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(query.as_str())
            .bind(job.id.as_uuid())
            .bind(job.queue_name.as_str())
            .bind(&job.payload)
            .bind(job.priority)
            .bind(attempt_to_db(job.max_attempts, "max_attempts")?)
            .bind(job.enqueued_at)
            .bind(job.available_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                map_sqlx_error(
                    format!("failed to enqueue job on queue '{}'", job.queue_name),
                    error,
                )
            })?;

        row.into_job()
    }

    async fn claim_next(
        &self,
        queue_name: &QueueName,
        worker_id: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> AppResult<Option<ClaimedJob>> {
        let row = sqlx::query_as::<_, ClaimedJobRow>(
            r#"
            WITH candidate_job AS (
                SELECT id
                FROM background_jobs
                WHERE queue_name = $1
                  AND (
                        (state = 'queued' AND available_at <= $2)
                        OR (
                            state = 'active'
                            AND locked_until <= $2
                            AND attempt < max_attempts
                        )
                      )
                ORDER BY priority DESC, available_at ASC, sequence ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE background_jobs jobs
            SET
                attempt = CASE
                    WHEN jobs.state = 'active' THEN jobs.attempt + 1
                    ELSE jobs.attempt
                END,
                last_error = CASE
                    WHEN jobs.state = 'active' THEN $5
                    ELSE jobs.last_error
                END,
                state = 'active',
                lock_token = gen_random_uuid()::TEXT,
                locked_by = $3,
                locked_until = $4,
                updated_at = $2
            FROM candidate_job
            WHERE jobs.id = candidate_job.id
            RETURNING
                jobs.id,
                jobs.queue_name,
                jobs.payload,
                jobs.priority,
                jobs.state,
                jobs.attempt,
                jobs.max_attempts,
                jobs.last_error,
                jobs.enqueued_at,
                jobs.available_at,
                jobs.updated_at,
                jobs.finished_at,
                jobs.lock_token,
                jobs.locked_by
            "#,
        )
        .bind(queue_name.as_str())
        .bind(now)
        .bind(worker_id)
        .bind(locked_until)
        .bind(EXPIRED_LOCK_ERROR)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            map_sqlx_error(
                format!("failed to claim job on queue '{queue_name}' for worker '{worker_id}'"),
                error,
            )
        })?;

        row.map(|row| {
            Ok(ClaimedJob {
                job: row.job.into_job()?,
                lock_token: row.lock_token,
                worker_id: row.locked_by,
            })
        })
        .transpose()
    }

    async fn fail_expired_locks(
        &self,
        queue_name: &QueueName,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Job>> {
        let query = format!(
            r#"
            UPDATE background_jobs
            SET
                state = 'failed',
                last_error = $3,
                lock_token = NULL,
                locked_by = NULL,
                locked_until = NULL,
                updated_at = $2,
                finished_at = $2
            WHERE queue_name = $1
              AND state = 'active'
              AND locked_until <= $2
              AND attempt >= max_attempts
            RETURNING {JOB_COLUMNS}
            "#
        );

        sqlx::query_as::<_, JobRow>(query.as_str())
            .bind(queue_name.as_str())
            .bind(now)
            .bind(EXPIRED_LOCK_ERROR)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                map_sqlx_error(
                    format!("failed to fail expired job locks on queue '{queue_name}'"),
                    error,
                )
            })?
            .into_iter()
            .map(JobRow::into_job)
            .collect()
    }

    async fn extend_lock(
        &self,
        job_id: JobId,
        lock_token: &str,
        locked_until: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE background_jobs
            SET locked_until = $3
            WHERE id = $1
              AND lock_token = $2
              AND state = 'active'
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(lock_token)
        .bind(locked_until)
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(format!("failed to extend lock for job '{job_id}'"), error))?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(
        &self,
        job_id: JobId,
        lock_token: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Job> {
        let query = format!(
            r#"
            UPDATE background_jobs
            SET
                state = 'completed',
                lock_token = NULL,
                locked_by = NULL,
                locked_until = NULL,
                updated_at = $3,
                finished_at = $3
            WHERE id = $1
              AND lock_token = $2
              AND state = 'active'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(query.as_str())
            .bind(job_id.as_uuid())
            .bind(lock_token)
            .bind(now)
            .fetch_optional(&self.pool)
            .await;

        fenced_job(job_id, "complete", row)
    }

    async fn retry(
        &self,
        job_id: JobId,
        lock_token: &str,
        next_attempt: u32,
        available_at: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Job> {
        let query = format!(
            r#"
            UPDATE background_jobs
            SET
                state = 'queued',
                attempt = $3,
                available_at = $4,
                last_error = $5,
                lock_token = NULL,
                locked_by = NULL,
                locked_until = NULL,
                updated_at = $6
            WHERE id = $1
              AND lock_token = $2
              AND state = 'active'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(query.as_str())
            .bind(job_id.as_uuid())
            .bind(lock_token)
            .bind(attempt_to_db(next_attempt, "attempt")?)
            .bind(available_at)
            .bind(error_message)
            .bind(now)
            .fetch_optional(&self.pool)
            .await;

        fenced_job(job_id, "retry", row)
    }

    async fn fail(
        &self,
        job_id: JobId,
        lock_token: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Job> {
        let query = format!(
            r#"
            UPDATE background_jobs
            SET
                state = 'failed',
                last_error = $3,
                lock_token = NULL,
                locked_by = NULL,
                locked_until = NULL,
                updated_at = $4,
                finished_at = $4
            WHERE id = $1
              AND lock_token = $2
              AND state = 'active'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(query.as_str())
            .bind(job_id.as_uuid())
            .bind(lock_token)
            .bind(error_message)
            .bind(now)
            .fetch_optional(&self.pool)
            .await;

        fenced_job(job_id, "fail", row)
    }

    async fn find_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM background_jobs
            WHERE id = $1
            "#
        );

        sqlx::query_as::<_, JobRow>(query.as_str())
            .bind(job_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| map_sqlx_error(format!("failed to load job '{job_id}'"), error))?
            .map(JobRow::into_job)
            .transpose()
    }

    async fn queue_stats(&self, queue_name: &QueueName) -> AppResult<QueueStats> {
        let rows = sqlx::query_as::<_, StateCountRow>(
            r#"
            SELECT state, COUNT(*) AS job_count
            FROM background_jobs
            WHERE queue_name = $1
            GROUP BY state
            "#,
        )
        .bind(queue_name.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            map_sqlx_error(format!("failed to load stats for queue '{queue_name}'"), error)
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let count = u64::try_from(row.job_count).unwrap_or_default();
            match JobState::parse(row.state.as_str())? {
                JobState::Queued => stats.queued = count,
                JobState::Active => stats.active = count,
                JobState::Completed => stats.completed = count,
                JobState::Failed => stats.failed = count,
            }
        }

        Ok(stats)
    }
}
