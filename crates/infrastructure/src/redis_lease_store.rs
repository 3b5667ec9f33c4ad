//! Redis-backed task lease store.
//!
//! Each lease is one hash (`holder_id`, `acquired_at_ms`, `renewed_at_ms`,
//! `expires_at_ms`) whose key TTL equals the lease duration. Every mutation is
//! a Lua script so the compare-and-write runs atomically on the server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inspectra_application::LeaseStore;
use inspectra_core::{AppError, AppResult};
use inspectra_domain::{ClaimDecision, HolderId, Lease, LeasePolicy, RenewalDecision, TaskId};
use redis::Script;

const ACQUIRE_LEASE_SCRIPT: &str = r#"
local now = tonumber(ARGV[2])
local current = redis.call('HMGET', KEYS[1], 'holder_id', 'acquired_at_ms', 'expires_at_ms')
local holder = current[1]

if holder and tonumber(current[3]) > now then
  if holder ~= ARGV[1] then
    return {0, holder, tonumber(current[2]), -1, tonumber(current[3])}
  end

  redis.call('HSET', KEYS[1], 'renewed_at_ms', ARGV[2], 'expires_at_ms', ARGV[4])
  redis.call('PEXPIRE', KEYS[1], ARGV[3])
  return {1, holder, tonumber(current[2]), now, tonumber(ARGV[4])}
end

redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], 'holder_id', ARGV[1], 'acquired_at_ms', ARGV[2], 'expires_at_ms', ARGV[4])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return {1, ARGV[1], now, -1, tonumber(ARGV[4])}
"#;

const RENEW_LEASE_SCRIPT: &str = r#"
local now = tonumber(ARGV[2])
local current = redis.call('HMGET', KEYS[1], 'holder_id', 'acquired_at_ms', 'expires_at_ms')
local holder = current[1]

if not holder or tonumber(current[3]) <= now then
  return {0, '', 0, -1, 0}
end

if holder ~= ARGV[1] then
  return {0, holder, tonumber(current[2]), -1, tonumber(current[3])}
end

redis.call('HSET', KEYS[1], 'renewed_at_ms', ARGV[2], 'expires_at_ms', ARGV[4])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return {1, holder, tonumber(current[2]), now, tonumber(ARGV[4])}
"#;

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'holder_id') == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

type ScriptReply = (i64, String, i64, i64, i64);

/// Redis implementation of the task lease store.
#[derive(Clone)]
pub struct RedisLeaseStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisLeaseStore {
    /// Creates one lease store adapter.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, task_id: &TaskId) -> String {
        format!("{}:{}", self.key_prefix, task_id.as_str())
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Unavailable(format!("failed to connect to redis: {error}")))
    }

    async fn run_write_script(
        &self,
        source: &str,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<ScriptReply> {
        let lease_ms = i64::from(policy.lease_seconds()) * 1_000;
        let expires_at_ms = policy.expires_at(now).timestamp_millis();
        let mut connection = self.connection().await?;

        Script::new(source)
            .key(self.key_for(task_id))
            .arg(holder_id.as_str())
            .arg(now.timestamp_millis())
            .arg(lease_ms)
            .arg(expires_at_ms)
            .invoke_async::<ScriptReply>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!(
                    "failed to update task claim '{task_id}' in redis: {error}"
                ))
            })
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn try_acquire(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<ClaimDecision> {
        let reply = self
            .run_write_script(ACQUIRE_LEASE_SCRIPT, task_id, holder_id, now, policy)
            .await?;
        let (granted, _, _, _, _) = reply;
        let lease = lease_from_reply(task_id, reply)?;

        if granted == 1 {
            return Ok(ClaimDecision::Grant(lease));
        }

        Ok(ClaimDecision::Deny {
            held_by: lease.holder_id().clone(),
        })
    }

    async fn renew(
        &self,
        task_id: &TaskId,
        holder_id: &HolderId,
        now: DateTime<Utc>,
        policy: &LeasePolicy,
    ) -> AppResult<RenewalDecision> {
        let reply = self
            .run_write_script(RENEW_LEASE_SCRIPT, task_id, holder_id, now, policy)
            .await?;
        let (renewed, holder, _, _, _) = &reply;

        if *renewed == 1 {
            return Ok(RenewalDecision::Renew(lease_from_reply(task_id, reply)?));
        }

        if holder.is_empty() {
            return Ok(RenewalDecision::Lost { held_by: None });
        }

        Ok(RenewalDecision::Lost {
            held_by: Some(HolderId::new(holder.as_str())?),
        })
    }

    async fn release(&self, task_id: &TaskId, holder_id: &HolderId) -> AppResult<bool> {
        let mut connection = self.connection().await?;

        let deleted = Script::new(RELEASE_LEASE_SCRIPT)
            .key(self.key_for(task_id))
            .arg(holder_id.as_str())
            .invoke_async::<i64>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!(
                    "failed to release task claim '{task_id}' in redis: {error}"
                ))
            })?;

        Ok(deleted > 0)
    }

    async fn find_active(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Lease>> {
        let mut connection = self.connection().await?;

        let (holder, acquired_at_ms, renewed_at_ms, expires_at_ms): (
            Option<String>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
        ) = redis::cmd("HMGET")
            .arg(self.key_for(task_id))
            .arg("holder_id")
            .arg("acquired_at_ms")
            .arg("renewed_at_ms")
            .arg("expires_at_ms")
            .query_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Unavailable(format!(
                    "failed to read task claim '{task_id}' from redis: {error}"
                ))
            })?;

        let (Some(holder), Some(acquired_at_ms), Some(expires_at_ms)) =
            (holder, acquired_at_ms, expires_at_ms)
        else {
            return Ok(None);
        };

        let lease = lease_from_reply(
            task_id,
            (
                1,
                holder,
                acquired_at_ms,
                renewed_at_ms.unwrap_or(-1),
                expires_at_ms,
            ),
        )?;

        Ok(lease.is_active_at(now).then_some(lease))
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> AppResult<u64> {
        Ok(0)
    }
}

fn lease_from_reply(task_id: &TaskId, reply: ScriptReply) -> AppResult<Lease> {
    let (_, holder, acquired_at_ms, renewed_at_ms, expires_at_ms) = reply;

    let renewed_at = if renewed_at_ms < 0 {
        None
    } else {
        Some(timestamp_from_millis(renewed_at_ms)?)
    };

    Ok(Lease::from_parts(
        task_id.clone(),
        HolderId::new(holder)?,
        timestamp_from_millis(acquired_at_ms)?,
        renewed_at,
        timestamp_from_millis(expires_at_ms)?,
    ))
}

fn timestamp_from_millis(value: i64) -> AppResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| {
        AppError::Internal(format!("invalid task claim timestamp '{value}' in redis"))
    })
}
