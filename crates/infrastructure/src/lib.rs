//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_job_handlers;
mod in_memory_job_store;
mod in_memory_lease_store;
mod postgres_error;
mod postgres_job_store;
mod postgres_lease_store;
mod redis_lease_store;

pub use http_job_handlers::{CalendarSyncJobHandler, ReportRenderJobHandler};
pub use in_memory_job_store::InMemoryJobStore;
pub use in_memory_lease_store::InMemoryLeaseStore;
pub use postgres_job_store::PostgresJobStore;
pub use postgres_lease_store::PostgresLeaseStore;
pub use redis_lease_store::RedisLeaseStore;
