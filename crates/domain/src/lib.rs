//! Domain entities and invariants for task claims and background jobs.

#![forbid(unsafe_code)]

mod claim_session;
mod job;
mod lease;

pub use claim_session::ClaimSessionState;
pub use job::{
    FailureDisposition, Job, JobHandlerError, JobId, JobState, QueueName, REPORT_QUEUE_NAME,
    RetryPolicy, SYNC_QUEUE_NAME,
};
pub use lease::{
    AcquireOutcome, ClaimDecision, DEFAULT_LEASE_SECONDS, HolderId, Lease, LeasePolicy,
    RenewOutcome, RenewalDecision, TaskId, decide_claim, decide_renewal,
};
