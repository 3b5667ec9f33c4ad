//! Application services and ports for task claims and background jobs.

#![forbid(unsafe_code)]

mod claim_coordinator;
mod claim_ports;
mod claim_session;
mod clock;
mod failure_reporter;
mod job_ports;
mod job_queue;
mod lease_compaction;
mod queue_registry;
mod worker_pool;

#[cfg(test)]
mod test_support;

pub use claim_coordinator::ClaimCoordinator;
pub use claim_ports::LeaseStore;
pub use claim_session::ClaimSession;
pub use clock::{Clock, SystemClock};
pub use failure_reporter::TracingJobFailureReporter;
pub use job_ports::{
    ClaimedJob, EXPIRED_LOCK_ERROR, JobFailureReporter, JobHandler, JobStore, NewJob, QueueStats,
};
pub use job_queue::{EnqueueOptions, JobQueue, QueueSettings};
pub use lease_compaction::run_lease_compaction;
pub use queue_registry::QueueRegistry;
pub use worker_pool::WorkerPool;
