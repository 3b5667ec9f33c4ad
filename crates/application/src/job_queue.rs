use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use inspectra_core::{AppError, AppResult};
use inspectra_domain::{Job, JobId, QueueName, RetryPolicy};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use crate::clock::Clock;
use crate::job_ports::{JobStore, NewJob, QueueStats};

const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_LOCK_SECONDS: u32 = 120;

/// Worker and retry settings declared for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    concurrency: usize,
    retry_policy: RetryPolicy,
    poll_interval: Duration,
    lock_seconds: u32,
}

impl QueueSettings {
    /// Creates settings with the given worker concurrency.
    pub fn new(concurrency: usize) -> AppResult<Self> {
        if concurrency == 0 {
            return Err(AppError::Validation(
                "queue concurrency must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            concurrency,
            ..Self::default()
        })
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Replaces the idle poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> AppResult<Self> {
        if poll_interval.is_zero() {
            return Err(AppError::Validation(
                "queue poll interval must be greater than zero".to_owned(),
            ));
        }

        self.poll_interval = poll_interval;
        Ok(self)
    }

    /// Replaces the claim lock duration.
    pub fn with_lock_seconds(mut self, lock_seconds: u32) -> AppResult<Self> {
        if lock_seconds == 0 {
            return Err(AppError::Validation(
                "queue lock seconds must be greater than zero".to_owned(),
            ));
        }

        self.lock_seconds = lock_seconds;
        Ok(self)
    }

    /// Returns the maximum number of jobs processed in parallel.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the idle poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the claim lock duration in seconds.
    #[must_use]
    pub fn lock_seconds(&self) -> u32 {
        self.lock_seconds
    }

    /// Returns the claim lock duration.
    #[must_use]
    pub fn lock_duration(&self) -> TimeDelta {
        TimeDelta::seconds(i64::from(self.lock_seconds))
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_policy: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            lock_seconds: DEFAULT_LOCK_SECONDS,
        }
    }
}

/// Per-job enqueue overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Higher values are claimed first.
    pub priority: i16,
    /// Overrides the queue retry ceiling.
    pub max_attempts: Option<u32>,
    /// Delays the first claim.
    pub delay: Option<Duration>,
}

/// Producer handle for one named queue.
pub struct JobQueue {
    name: QueueName,
    settings: QueueSettings,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
}

impl JobQueue {
    /// Creates a queue handle.
    #[must_use]
    pub fn new(
        name: QueueName,
        settings: QueueSettings,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            settings,
            store,
            clock,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Returns the queue name.
    #[must_use]
    pub fn name(&self) -> &QueueName {
        &self.name
    }

    /// Returns the declared settings.
    #[must_use]
    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Persists one job with default options.
    pub async fn enqueue(&self, payload: Value) -> AppResult<JobId> {
        self.enqueue_with(payload, EnqueueOptions::default()).await
    }

    /// Persists one job. Returns once the store has accepted it.
    pub async fn enqueue_with(&self, payload: Value, options: EnqueueOptions) -> AppResult<JobId> {
        let max_attempts = options
            .max_attempts
            .unwrap_or_else(|| self.settings.retry_policy.max_attempts());
        if max_attempts == 0 {
            return Err(AppError::Validation(
                "max_attempts must be greater than zero".to_owned(),
            ));
        }

        let enqueued_at = self.clock.now();
        let delay = options
            .delay
            .map(TimeDelta::from_std)
            .transpose()
            .map_err(|error| AppError::Validation(format!("invalid enqueue delay: {error}")))?
            .unwrap_or(TimeDelta::zero());
        let available_at = enqueued_at.checked_add_signed(delay).ok_or_else(|| {
            AppError::Validation("enqueue delay is out of the supported time range".to_owned())
        })?;

        let job = self
            .store
            .enqueue(NewJob {
                id: JobId::new(),
                queue_name: self.name.clone(),
                payload,
                priority: options.priority,
                max_attempts,
                enqueued_at,
                available_at,
            })
            .await?;

        debug!(
            queue = %self.name,
            job_id = %job.id,
            priority = job.priority,
            "job enqueued"
        );
        self.wake.notify_one();

        Ok(job.id)
    }

    /// Returns one job of this queue.
    pub async fn find_job(&self, job_id: JobId) -> AppResult<Option<Job>> {
        let job = self.store.find_job(job_id).await?;
        Ok(job.filter(|job| job.queue_name == self.name))
    }

    /// Returns per-state counts for this queue.
    pub async fn stats(&self) -> AppResult<QueueStats> {
        self.store.queue_stats(&self.name).await
    }

    pub(crate) fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub(crate) fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}
