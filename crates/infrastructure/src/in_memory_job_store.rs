use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inspectra_application::{ClaimedJob, EXPIRED_LOCK_ERROR, JobStore, NewJob, QueueStats};
use inspectra_core::{AppError, AppResult};
use inspectra_domain::{Job, JobId, JobState, QueueName};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct JobEntry {
    job: Job,
    sequence: u64,
    lock_token: Option<String>,
    locked_until: Option<DateTime<Utc>>,
}

impl JobEntry {
    fn is_claimable(&self, queue_name: &QueueName, now: DateTime<Utc>) -> bool {
        if &self.job.queue_name != queue_name {
            return false;
        }

        match self.job.state {
            JobState::Queued => self.job.available_at <= now,
            JobState::Active => {
                self.lock_expired(now) && self.job.attempt < self.job.max_attempts
            }
            JobState::Completed | JobState::Failed => false,
        }
    }

    fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.job.state == JobState::Active && self.locked_until.is_some_and(|until| until <= now)
    }

    fn clear_lock(&mut self) {
        self.lock_token = None;
        self.locked_until = None;
    }
}

#[derive(Debug, Default)]
struct JobTable {
    entries: HashMap<JobId, JobEntry>,
    next_sequence: u64,
}

/// In-memory job store for single-process runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    table: RwLock<JobTable>,
}

impl InMemoryJobStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned_entry<'a>(
    table: &'a mut JobTable,
    job_id: JobId,
    lock_token: &str,
) -> AppResult<&'a mut JobEntry> {
    let entry = table
        .entries
        .get_mut(&job_id)
        .ok_or_else(|| AppError::NotFound(format!("job '{job_id}' does not exist")))?;

    if entry.job.state != JobState::Active || entry.lock_token.as_deref() != Some(lock_token) {
        return Err(AppError::Conflict(format!(
            "job '{job_id}' is not currently locked with the provided token"
        )));
    }

    Ok(entry)
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> AppResult<Job> {
        let mut table = self.table.write().await;

        if table.entries.contains_key(&job.id) {
            return Err(AppError::Conflict(format!("job '{}' already exists", job.id)));
        }

        let stored = Job {
            id: job.id,
            queue_name: job.queue_name,
            payload: job.payload,
            priority: job.priority,
            state: JobState::Queued,
            attempt: 1,
            max_attempts: job.max_attempts,
            last_error: None,
            enqueued_at: job.enqueued_at,
            available_at: job.available_at,
            updated_at: job.enqueued_at,
            finished_at: None,
        };

        let sequence = table.next_sequence;
        table.next_sequence += 1;
        table.entries.insert(
            stored.id,
            JobEntry {
                job: stored.clone(),
                sequence,
                lock_token: None,
                locked_until: None,
            },
        );

        Ok(stored)
    }

    async fn claim_next(
        &self,
        queue_name: &QueueName,
        worker_id: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> AppResult<Option<ClaimedJob>> {
        let mut table = self.table.write().await;

        let Some(entry) = table
            .entries
            .values_mut()
            .filter(|entry| entry.is_claimable(queue_name, now))
            .min_by_key(|entry| {
                (
                    Reverse(entry.job.priority),
                    entry.job.available_at,
                    entry.sequence,
                )
            })
        else {
            return Ok(None);
        };

        let lock_token = uuid::Uuid::new_v4().to_string();
        if entry.job.state == JobState::Active {
            entry.job.attempt += 1;
            entry.job.last_error = Some(EXPIRED_LOCK_ERROR.to_owned());
        }
        entry.job.state = JobState::Active;
        entry.job.updated_at = now;
        entry.lock_token = Some(lock_token.clone());
        entry.locked_until = Some(locked_until);

        Ok(Some(ClaimedJob {
            job: entry.job.clone(),
            lock_token,
            worker_id: worker_id.to_owned(),
        }))
    }

    async fn fail_expired_locks(
        &self,
        queue_name: &QueueName,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Job>> {
        let mut table = self.table.write().await;
        let mut failed = Vec::new();

        for entry in table.entries.values_mut().filter(|entry| {
            &entry.job.queue_name == queue_name
                && entry.lock_expired(now)
                && entry.job.attempt >= entry.job.max_attempts
        }) {
            entry.job.state = JobState::Failed;
            entry.job.last_error = Some(EXPIRED_LOCK_ERROR.to_owned());
            entry.job.updated_at = now;
            entry.job.finished_at = Some(now);
            entry.clear_lock();
            failed.push(entry.job.clone());
        }

        Ok(failed)
    }

    async fn extend_lock(
        &self,
        job_id: JobId,
        lock_token: &str,
        locked_until: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut table = self.table.write().await;

        match owned_entry(&mut table, job_id, lock_token) {
            Ok(entry) => {
                entry.locked_until = Some(locked_until);
                Ok(true)
            }
            Err(AppError::Conflict(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn complete(
        &self,
        job_id: JobId,
        lock_token: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Job> {
        let mut table = self.table.write().await;
        let entry = owned_entry(&mut table, job_id, lock_token)?;

        entry.job.state = JobState::Completed;
        entry.job.updated_at = now;
        entry.job.finished_at = Some(now);
        entry.clear_lock();

        Ok(entry.job.clone())
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
        let mut table = self.table.write().await;
        let entry = owned_entry(&mut table, job_id, lock_token)?;

        entry.job.state = JobState::Queued;
        entry.job.attempt = next_attempt;
        entry.job.available_at = available_at;
        entry.job.last_error = Some(error_message.to_owned());
        entry.job.updated_at = now;
        entry.clear_lock();

        Ok(entry.job.clone())
    }

    async fn fail(
        &self,
        job_id: JobId,
        lock_token: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Job> {
        let mut table = self.table.write().await;
        let entry = owned_entry(&mut table, job_id, lock_token)?;

        entry.job.state = JobState::Failed;
        entry.job.last_error = Some(error_message.to_owned());
        entry.job.updated_at = now;
        entry.job.finished_at = Some(now);
        entry.clear_lock();

        Ok(entry.job.clone())
    }

    async fn find_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        let table = self.table.read().await;
        Ok(table.entries.get(&job_id).map(|entry| entry.job.clone()))
    }

    async fn queue_stats(&self, queue_name: &QueueName) -> AppResult<QueueStats> {
        let table = self.table.read().await;
        let mut stats = QueueStats::default();

        for entry in table
            .entries
            .values()
            .filter(|entry| &entry.job.queue_name == queue_name)
        {
            match entry.job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}
