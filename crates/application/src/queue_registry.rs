use std::collections::HashMap;
use std::sync::Arc;

use inspectra_core::{AppError, AppResult};
use inspectra_domain::QueueName;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::Clock;
use crate::failure_reporter::TracingJobFailureReporter;
use crate::job_ports::{JobFailureReporter, JobHandler, JobStore};
use crate::job_queue::{JobQueue, QueueSettings};
use crate::worker_pool::WorkerPool;

/// Owner of every queue handle and worker pool in one process.
///
/// Queues must be declared before use. The registry is built once at
/// startup and passed explicitly to API handlers and the worker runtime.
pub struct QueueRegistry {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn JobFailureReporter>,
    worker_id: String,
    declared: HashMap<QueueName, QueueSettings>,
    queues: Mutex<HashMap<QueueName, Arc<JobQueue>>>,
    workers: Mutex<HashMap<QueueName, Arc<WorkerPool>>>,
    shutdown: CancellationToken,
}

impl QueueRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            reporter: Arc::new(TracingJobFailureReporter),
            worker_id: format!("worker-{}", std::process::id()),
            declared: HashMap::new(),
            queues: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replaces the terminal failure reporter.
    #[must_use]
    pub fn with_failure_reporter(mut self, reporter: Arc<dyn JobFailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replaces the worker identity recorded on claimed jobs.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Declares one queue with its worker settings.
    #[must_use]
    pub fn declare_queue(mut self, queue_name: QueueName, settings: QueueSettings) -> Self {
        self.declared.insert(queue_name, settings);
        self
    }

    /// Returns the declared queue names in stable order.
    #[must_use]
    pub fn declared_queues(&self) -> Vec<QueueName> {
        let mut names: Vec<QueueName> = self.declared.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the queue handle, creating it on first use.
    pub async fn queue(&self, queue_name: &QueueName) -> AppResult<Arc<JobQueue>> {
        let settings = self.declared.get(queue_name).ok_or_else(|| {
            AppError::NotFound(format!("queue '{queue_name}' is not declared"))
        })?;

        let mut queues = self.queues.lock().await;
        let queue = queues.entry(queue_name.clone()).or_insert_with(|| {
            Arc::new(JobQueue::new(
                queue_name.clone(),
                settings.clone(),
                self.store.clone(),
                self.clock.clone(),
            ))
        });

        Ok(queue.clone())
    }

    /// Starts the worker pool for one queue.
    ///
    /// Calling again with the same handler instance returns the running
    /// pool. A different handler for the same queue is a configuration
    /// error.
    pub async fn create_worker(
        &self,
        queue_name: &QueueName,
        handler: Arc<dyn JobHandler>,
    ) -> AppResult<Arc<WorkerPool>> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::Conflict(
                "queue registry is shutting down".to_owned(),
            ));
        }

        let queue = self.queue(queue_name).await?;
        let mut workers = self.workers.lock().await;

        if let Some(existing) = workers.get(queue_name) {
            if Arc::ptr_eq(existing.handler(), &handler) {
                return Ok(existing.clone());
            }

            return Err(AppError::Conflict(format!(
                "queue '{queue_name}' already has a different handler"
            )));
        }

        let pool = Arc::new(WorkerPool::start(
            queue.as_ref(),
            handler,
            self.reporter.clone(),
            self.worker_id.clone(),
            self.shutdown.child_token(),
        ));
        workers.insert(queue_name.clone(), pool.clone());

        Ok(pool)
    }

    /// Stops claiming on every pool and waits for in-flight jobs.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let pools: Vec<Arc<WorkerPool>> = self.workers.lock().await.values().cloned().collect();
        for pool in pools {
            pool.shutdown().await;
        }

        info!(worker_id = %self.worker_id, "queue registry shut down");
    }
}
