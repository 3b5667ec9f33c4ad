use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use inspectra_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Queue that carries third-party calendar and energy-rating sync jobs.
pub const SYNC_QUEUE_NAME: &str = "sync-queue";

/// Queue that carries PDF/report generation jobs.
pub const REPORT_QUEUE_NAME: &str = "report-queue";

const MAX_QUEUE_NAME_LENGTH: usize = 64;

/// Unique identifier for a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random job identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a job identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Parses a job identifier from its string form.
    pub fn parse(value: &str) -> AppResult<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid job id '{value}': {error}")))
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Validated queue name such as `sync-queue`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Creates a queue name made of lowercase ASCII letters, digits, `-` and `_`.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();

        if value.is_empty() || value.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(AppError::Validation(format!(
                "queue name must be between 1 and {MAX_QUEUE_NAME_LENGTH} characters"
            )));
        }

        if !value
            .chars()
            .all(|character| matches!(character, 'a'..='z' | '0'..='9' | '-' | '_'))
        {
            return Err(AppError::Validation(format!(
                "queue name '{value}' may only contain lowercase letters, digits, '-' and '_'"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the queue name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Lifecycle state of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker.
    Queued,
    /// Claimed by exactly one worker.
    Active,
    /// Handler succeeded.
    Completed,
    /// Retry budget exhausted or permanent failure.
    Failed,
}

impl JobState {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "queued" => Ok(Self::Queued),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!("unknown job state '{value}'"))),
        }
    }

    /// Returns whether no further transition is allowed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only transitions, plus `active -> queued` for retries.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Failed)
                | (Self::Active, Self::Queued)
        )
    }
}

/// Retry ceiling and backoff applied to failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Creates a policy with the default backoff and `max_attempts` ceiling.
    pub fn new(max_attempts: u32) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::Validation(
                "max_attempts must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            max_attempts,
            ..Self::default()
        })
    }

    /// Overrides exponential backoff bounds. A zero base disables backoff.
    #[must_use]
    pub fn with_backoff(mut self, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        self.base_backoff_ms = base_backoff_ms;
        self.max_backoff_ms = max_backoff_ms.max(base_backoff_ms);
        self
    }

    /// Returns the retry ceiling.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before `next_attempt` becomes claimable.
    #[must_use]
    pub fn backoff_for(&self, next_attempt: u32) -> Duration {
        if self.base_backoff_ms == 0 {
            return Duration::ZERO;
        }

        let exponent = next_attempt.saturating_sub(2).min(32);
        let raw = self
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(exponent));

        Duration::from_millis(raw.min(self.max_backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

/// Persisted background job record.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Stable job identifier.
    pub id: JobId,
    /// Owning queue.
    pub queue_name: QueueName,
    /// Opaque task-specific payload.
    pub payload: Value,
    /// Higher values are claimed first.
    pub priority: i16,
    /// Current lifecycle state.
    pub state: JobState,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Retry ceiling captured at enqueue time.
    pub max_attempts: u32,
    /// Latest handler failure message.
    pub last_error: Option<String>,
    /// Enqueue timestamp.
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub available_at: DateTime<Utc>,
    /// Latest mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Terminal transition timestamp.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Decides what happens to an active job after its handler failed.
    ///
    /// The retry ceiling is the lower of the job's own `max_attempts` and the
    /// consuming queue's policy. A backoff that leaves the representable time
    /// range fails the job.
    #[must_use]
    pub fn failure_disposition(
        &self,
        error: &JobHandlerError,
        retry_policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        let ceiling = self.max_attempts.min(retry_policy.max_attempts());
        if !error.is_retryable() || self.attempt >= ceiling {
            return FailureDisposition::Fail;
        }

        let next_attempt = self.attempt.saturating_add(1);
        let backoff = retry_policy.backoff_for(next_attempt);
        let Some(available_at) = TimeDelta::from_std(backoff)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
        else {
            return FailureDisposition::Fail;
        };

        FailureDisposition::Retry {
            next_attempt,
            available_at,
        }
    }
}

/// Outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Requeue with the incremented attempt.
    Retry {
        /// Attempt number for the next execution.
        next_attempt: u32,
        /// Earliest time the retry may be claimed.
        available_at: DateTime<Utc>,
    },
    /// Mark failed terminally.
    Fail,
}

/// Error returned by a job handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandlerError {
    message: String,
    retryable: bool,
}

impl JobHandlerError {
    /// Failure that may succeed on a later attempt.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Failure that will not succeed on retry, such as a malformed payload.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Returns whether the retry budget applies.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for JobHandlerError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.message.as_str())
    }
}

impl std::error::Error for JobHandlerError {}
