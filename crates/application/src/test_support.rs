use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use inspectra_core::{AppError, AppResult};
use inspectra_domain::{
    ClaimDecision, HolderId, Job, JobId, JobState, Lease, LeasePolicy, QueueName,
    RenewalDecision, TaskId, decide_claim, decide_renewal,
};
use tokio::sync::Mutex;

use crate::claim_ports::LeaseStore;
use crate::clock::Clock;
use crate::job_ports::{
    ClaimedJob, EXPIRED_LOCK_ERROR, JobFailureReporter, JobStore, NewJob, QueueStats,
};

pub(crate) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .unwrap_or_else(|| unreachable!())
}

pub(crate) fn task(value: &str) -> TaskId {
    TaskId::new(value).unwrap_or_else(|_| unreachable!())
}

pub(crate) fn holder(value: &str) -> HolderId {
    HolderId::new(value).unwrap_or_else(|_| unreachable!())
}

/// Clock moved by hand.
pub(crate) struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    pub(crate) fn advance_seconds(&self, seconds: i64) {
        if let Ok(mut now) = self.now.lock() {
            *now += TimeDelta::seconds(seconds);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| start_time())
    }
}

/// Clock that follows tokio's (possibly paused) virtual time.
pub(crate) struct TokioClock {
    base: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub(crate) fn new() -> Self {
        Self {
            base: start_time(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        self.base + TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::zero())
    }
}

/// Lease store that applies the domain claim rules under one lock.
#[derive(Default)]
pub(crate) struct FakeLeaseStore {
    leases: Mutex<HashMap<TaskId, Lease>>,
    unavailable: AtomicBool,
    renew_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl FakeLeaseStore {
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub(crate) async fn stored(&self, task_id: &TaskId) -> Option<Lease> {
        self.leases.lock().await.get(task_id).cloned()
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("lease store offline".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for FakeLeaseStore {
    async fn try_acquire(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<ClaimDecision> {
        self.check_available()?;
        let mut leases = self.leases.lock().await;
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
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut leases = self.leases.lock().await;
        let decision = decide_renewal(leases.get(task_id), holder_id, now, policy);
        if let RenewalDecision::Renew(lease) = &decision {
            leases.insert(task_id.clone(), lease.clone());
        }
        Ok(decision)
    }

    async fn release(&self, task_id: &TaskId, holder_id: &HolderId) -> AppResult<bool> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut leases = self.leases.lock().await;
        if leases
            .get(task_id)
            .is_some_and(|lease| lease.is_held_by(holder_id))
        {
            leases.remove(task_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn find_active(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Lease>> {
        self.check_available()?;
        Ok(self
            .leases
            .lock()
            .await
            .get(task_id)
            .filter(|lease| lease.is_active_at(now))
            .cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        self.check_available()?;
        let mut leases = self.leases.lock().await;
        let before = leases.len();
        leases.retain(|_, lease| lease.is_active_at(now));
        Ok(u64::try_from(before - leases.len()).unwrap_or(u64::MAX))
    }
}

struct StoredJob {
    job: Job,
    sequence: u64,
    lock_token: Option<String>,
    locked_until: Option<DateTime<Utc>>,
}

/// Job store that keeps every job in one locked vector.
#[derive(Default)]
pub(crate) struct FakeJobStore {
    jobs: Mutex<Vec<StoredJob>>,
    next_sequence: AtomicU64,
    unavailable: AtomicBool,
}

impl FakeJobStore {
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("job store offline".to_owned()));
        }
        Ok(())
    }

    fn lock_expired(stored: &StoredJob, now: DateTime<Utc>) -> bool {
        stored.job.state == JobState::Active
            && stored.locked_until.is_some_and(|until| until <= now)
    }

    async fn fenced<R>(
        &self,
        job_id: JobId,
        lock_token: &str,
        update: impl FnOnce(&mut StoredJob) -> R,
    ) -> AppResult<R> {
        let mut jobs = self.jobs.lock().await;
        let stored = jobs
            .iter_mut()
            .find(|stored| stored.job.id == job_id)
            .ok_or_else(|| AppError::NotFound(format!("job '{job_id}' does not exist")))?;

        if stored.job.state != JobState::Active || stored.lock_token.as_deref() != Some(lock_token)
        {
            return Err(AppError::Conflict(format!(
                "job '{job_id}' is no longer owned by this worker"
            )));
        }

        Ok(update(stored))
    }
}

#[async_trait]
impl JobStore for FakeJobStore {
    async fn enqueue(&self, job: NewJob) -> AppResult<Job> {
        self.check_available()?;
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
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().await.push(StoredJob {
            job: stored.clone(),
            sequence,
            lock_token: None,
            locked_until: None,
        });
        Ok(stored)
    }

    async fn claim_next(
        &self,
        queue_name: &QueueName,
        worker_id: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> AppResult<Option<ClaimedJob>> {
        self.check_available()?;
        let mut jobs = self.jobs.lock().await;
        let next = jobs
            .iter_mut()
            .filter(|stored| &stored.job.queue_name == queue_name)
            .filter(|stored| match stored.job.state {
                JobState::Queued => stored.job.available_at <= now,
                JobState::Active => {
                    Self::lock_expired(stored, now)
                        && stored.job.attempt < stored.job.max_attempts
                }
                JobState::Completed | JobState::Failed => false,
            })
            .min_by_key(|stored| {
                (
                    std::cmp::Reverse(stored.job.priority),
                    stored.job.available_at,
                    stored.sequence,
                )
            });

        let Some(stored) = next else {
            return Ok(None);
        };

        let lock_token = uuid::Uuid::new_v4().to_string();
        if stored.job.state == JobState::Active {
            stored.job.attempt += 1;
            stored.job.last_error = Some(EXPIRED_LOCK_ERROR.to_owned());
        }
        stored.job.state = JobState::Active;
        stored.job.updated_at = now;
        stored.lock_token = Some(lock_token.clone());
        stored.locked_until = Some(locked_until);

        Ok(Some(ClaimedJob {
            job: stored.job.clone(),
            lock_token,
            worker_id: worker_id.to_owned(),
        }))
    }

    async fn fail_expired_locks(
        &self,
        queue_name: &QueueName,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Job>> {
        self.check_available()?;
        let mut jobs = self.jobs.lock().await;
        let mut failed = Vec::new();
        for stored in jobs.iter_mut().filter(|stored| {
            &stored.job.queue_name == queue_name
                && Self::lock_expired(stored, now)
                && stored.job.attempt >= stored.job.max_attempts
        }) {
            stored.job.state = JobState::Failed;
            stored.job.last_error = Some(EXPIRED_LOCK_ERROR.to_owned());
            stored.job.updated_at = now;
            stored.job.finished_at = Some(now);
            stored.lock_token = None;
            stored.locked_until = None;
            failed.push(stored.job.clone());
        }
        Ok(failed)
    }

    async fn extend_lock(
        &self,
        job_id: JobId,
        lock_token: &str,
        locked_until: DateTime<Utc>,
    ) -> AppResult<bool> {
        match self
            .fenced(job_id, lock_token, |stored| {
                stored.locked_until = Some(locked_until);
            })
            .await
        {
            Ok(()) => Ok(true),
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
        self.fenced(job_id, lock_token, |stored| {
            stored.job.state = JobState::Completed;
            stored.job.updated_at = now;
            stored.job.finished_at = Some(now);
            stored.lock_token = None;
            stored.locked_until = None;
            stored.job.clone()
        })
        .await
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
        self.fenced(job_id, lock_token, |stored| {
            stored.job.state = JobState::Queued;
            stored.job.attempt = next_attempt;
            stored.job.available_at = available_at;
            stored.job.last_error = Some(error_message.to_owned());
            stored.job.updated_at = now;
            stored.lock_token = None;
            stored.locked_until = None;
            stored.job.clone()
        })
        .await
    }

    async fn fail(
        &self,
        job_id: JobId,
        lock_token: &str,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Job> {
        self.fenced(job_id, lock_token, |stored| {
            stored.job.state = JobState::Failed;
            stored.job.last_error = Some(error_message.to_owned());
            stored.job.updated_at = now;
            stored.job.finished_at = Some(now);
            stored.lock_token = None;
            stored.locked_until = None;
            stored.job.clone()
        })
        .await
    }

    async fn find_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        self.check_available()?;
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .find(|stored| stored.job.id == job_id)
            .map(|stored| stored.job.clone()))
    }

    async fn queue_stats(&self, queue_name: &QueueName) -> AppResult<QueueStats> {
        self.check_available()?;
        let jobs = self.jobs.lock().await;
        let mut stats = QueueStats::default();
        for stored in jobs.iter().filter(|stored| &stored.job.queue_name == queue_name) {
            match stored.job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

/// Failure reporter that remembers every reported job.
#[derive(Default)]
pub(crate) struct RecordingReporter {
    failed: Mutex<Vec<Job>>,
}

impl RecordingReporter {
    pub(crate) async fn failed(&self) -> Vec<Job> {
        self.failed.lock().await.clone()
    }
}

#[async_trait]
impl JobFailureReporter for RecordingReporter {
    async fn report_failed(&self, job: &Job) {
        self.failed.lock().await.push(job.clone());
    }
}
