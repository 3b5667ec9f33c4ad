use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use inspectra_domain::{FailureDisposition, Job, JobHandlerError, JobId, QueueName};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::job_ports::{ClaimedJob, JobFailureReporter, JobHandler, JobStore};
use crate::job_queue::{JobQueue, QueueSettings};

const MIN_LOCK_HEARTBEAT: Duration = Duration::from_millis(500);

/// Bounded set of consumers for one queue.
///
/// At most `concurrency` handlers run at once. Shutdown stops claiming and
/// waits for every in-flight job to reach a completion write.
pub struct WorkerPool {
    queue_name: QueueName,
    handler: Arc<dyn JobHandler>,
    cancel: CancellationToken,
    run: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn start(
        queue: &JobQueue,
        handler: Arc<dyn JobHandler>,
        reporter: Arc<dyn JobFailureReporter>,
        worker_id: String,
        cancel: CancellationToken,
    ) -> Self {
        let worker = Arc::new(QueueWorker {
            queue_name: queue.name().clone(),
            settings: queue.settings().clone(),
            store: queue.store(),
            clock: queue.clock(),
            handler: handler.clone(),
            reporter,
            worker_id,
            wake: queue.wake_handle(),
        });

        info!(
            queue = %worker.queue_name,
            worker_id = %worker.worker_id,
            concurrency = worker.settings.concurrency(),
            "worker pool started"
        );

        let run = tokio::spawn(worker.run(cancel.clone()));

        Self {
            queue_name: queue.name().clone(),
            handler,
            cancel,
            run: Mutex::new(Some(run)),
        }
    }

    /// Returns the consumed queue.
    #[must_use]
    pub fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    /// Returns whether the pool still claims jobs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub(crate) fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }

    /// Stops claiming and waits until in-flight jobs are settled.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let run = self.run.lock().await.take();
        if let Some(run) = run
            && let Err(error) = run.await
        {
            error!(queue = %self.queue_name, error = %error, "worker pool ended abnormally");
        }
    }
}

struct QueueWorker {
    queue_name: QueueName,
    settings: QueueSettings,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn JobHandler>,
    reporter: Arc<dyn JobFailureReporter>,
    worker_id: String,
    wake: Arc<Notify>,
}

impl QueueWorker {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.settings.concurrency()));
        let mut in_flight = JoinSet::new();
        let mut next_sweep = Instant::now();

        loop {
            while let Some(finished) = in_flight.try_join_next() {
                if let Err(error) = finished {
                    error!(queue = %self.queue_name, error = %error, "job task ended abnormally");
                }
            }

            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let now = self.clock.now();
            if Instant::now() >= next_sweep {
                self.fail_expired_locks(now).await;
                next_sweep = Instant::now() + self.settings.poll_interval();
            }

            let Some(locked_until) = now.checked_add_signed(self.settings.lock_duration()) else {
                drop(permit);
                error!(queue = %self.queue_name, now = %now, "job lock deadline out of range");
                if !self.idle(&cancel).await {
                    break;
                }
                continue;
            };
            match self
                .store
                .claim_next(&self.queue_name, &self.worker_id, now, locked_until)
                .await
            {
                Ok(Some(claimed)) => {
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        worker.process(claimed).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if !self.idle(&cancel).await {
                        break;
                    }
                }
                Err(error) => {
                    drop(permit);
                    warn!(
                        queue = %self.queue_name,
                        worker_id = %self.worker_id,
                        error = %error,
                        "failed to claim job"
                    );
                    if !self.idle(&cancel).await {
                        break;
                    }
                }
            }
        }

        let draining = in_flight.len();
        if draining > 0 {
            info!(queue = %self.queue_name, in_flight = draining, "draining in-flight jobs");
        }
        while let Some(finished) = in_flight.join_next().await {
            if let Err(error) = finished {
                error!(queue = %self.queue_name, error = %error, "job task ended abnormally");
            }
        }

        info!(queue = %self.queue_name, worker_id = %self.worker_id, "worker pool stopped");
    }

    async fn idle(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = self.wake.notified() => true,
            () = tokio::time::sleep(self.settings.poll_interval()) => true,
        }
    }

    async fn fail_expired_locks(&self, now: DateTime<Utc>) {
        match self.store.fail_expired_locks(&self.queue_name, now).await {
            Ok(failed) => {
                for job in failed {
                    warn!(
                        queue = %self.queue_name,
                        job_id = %job.id,
                        attempt = job.attempt,
                        "job lock expired on its final attempt"
                    );
                    self.reporter.report_failed(&job).await;
                }
            }
            Err(error) => warn!(
                queue = %self.queue_name,
                error = %error,
                "failed to sweep expired job locks"
            ),
        }
    }

    async fn process(&self, claimed: ClaimedJob) {
        let ClaimedJob {
            job, lock_token, ..
        } = claimed;

        debug!(
            queue = %self.queue_name,
            job_id = %job.id,
            attempt = job.attempt,
            "job claimed"
        );

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(
            LockHeartbeat {
                store: self.store.clone(),
                clock: self.clock.clone(),
                settings: self.settings.clone(),
                job_id: job.id,
                lock_token: lock_token.clone(),
            }
            .run(heartbeat_stop.clone()),
        );

        let handler = self.handler.clone();
        let handled_job = job.clone();
        let outcome = match tokio::spawn(async move { handler.handle(&handled_job).await }).await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(JobHandlerError::retryable(format!(
                "job handler panicked: {join_error}"
            ))),
        };

        heartbeat_stop.cancel();
        if let Err(error) = heartbeat.await {
            warn!(job_id = %job.id, error = %error, "job lock heartbeat ended abnormally");
        }

        match outcome {
            Ok(()) => self.complete(&job, &lock_token).await,
            Err(handler_error) => self.settle_failure(&job, &lock_token, &handler_error).await,
        }
    }

    async fn complete(&self, job: &Job, lock_token: &str) {
        match self.store.complete(job.id, lock_token, self.clock.now()).await {
            Ok(_) => info!(
                queue = %self.queue_name,
                job_id = %job.id,
                attempt = job.attempt,
                "job completed"
            ),
            Err(error) => warn!(
                queue = %self.queue_name,
                job_id = %job.id,
                error = %error,
                "failed to mark job completed"
            ),
        }
    }

    async fn settle_failure(&self, job: &Job, lock_token: &str, handler_error: &JobHandlerError) {
        let now = self.clock.now();

        match job.failure_disposition(handler_error, self.settings.retry_policy(), now) {
            FailureDisposition::Retry {
                next_attempt,
                available_at,
            } => match self
                .store
                .retry(
                    job.id,
                    lock_token,
                    next_attempt,
                    available_at,
                    handler_error.message(),
                    now,
                )
                .await
            {
                Ok(_) => warn!(
                    queue = %self.queue_name,
                    job_id = %job.id,
                    attempt = job.attempt,
                    next_attempt,
                    available_at = %available_at,
                    error = %handler_error,
                    "job attempt failed; retry scheduled"
                ),
                Err(error) => warn!(
                    queue = %self.queue_name,
                    job_id = %job.id,
                    error = %error,
                    "failed to schedule job retry"
                ),
            },
            FailureDisposition::Fail => {
                match self
                    .store
                    .fail(job.id, lock_token, handler_error.message(), now)
                    .await
                {
                    Ok(failed) => self.reporter.report_failed(&failed).await,
                    Err(error) => warn!(
                        queue = %self.queue_name,
                        job_id = %job.id,
                        error = %error,
                        "failed to mark job failed"
                    ),
                }
            }
        }
    }
}

struct LockHeartbeat {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    settings: QueueSettings,
    job_id: JobId,
    lock_token: String,
}

impl LockHeartbeat {
    async fn run(self, stop: CancellationToken) {
        let period = (Duration::from_secs(u64::from(self.settings.lock_seconds())) / 2)
            .max(MIN_LOCK_HEARTBEAT);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = self.clock.now();
            let Some(locked_until) = now.checked_add_signed(self.settings.lock_duration()) else {
                warn!(job_id = %self.job_id, now = %now, "job lock deadline out of range");
                continue;
            };
            match self
                .store
                .extend_lock(self.job_id, &self.lock_token, locked_until)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(job_id = %self.job_id, "job lock lost while handler was running");
                    break;
                }
                Err(error) => warn!(
                    job_id = %self.job_id,
                    error = %error,
                    "failed to extend job lock"
                ),
            }
        }
    }
}
