//! Per-entity advisory locks.
//!
//! A lease must be released explicitly. The Redis lease also expires after
//! its TTL so a crashed worker cannot wedge an entity forever; a live run
//! keeps it alive by renewing every [`EntityLock::renew_interval`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::models::EntityKind;
use crate::pipeline::error::PipelineError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug)]
pub struct LockLease {
    pub kind: EntityKind,
    pub entity_id: Uuid,
    token: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockLease {
    pub fn token(&self) -> Uuid {
        self.token
    }
}

#[async_trait]
pub trait EntityLock: Send + Sync {
    /// Waits up to the configured timeout, then fails with `EntityBusy`.
    async fn acquire(&self, kind: EntityKind, entity_id: Uuid) -> Result<LockLease, PipelineError>;

    /// Extends the lease held under `token`. `Ok(false)` means it was lost.
    async fn renew(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        token: Uuid,
    ) -> Result<bool, PipelineError>;

    async fn release(&self, lease: LockLease) -> Result<(), PipelineError>;

    /// How often a held lease must be renewed; `None` when it never expires.
    fn renew_interval(&self) -> Option<Duration>;
}

// ──── In-process ────────────────────────────────────────────────────────────

/// Locks scoped to this process; correct only with a single API replica.
pub struct InProcessLocks {
    wait: Duration,
    entries: Mutex<HashMap<(EntityKind, Uuid), Arc<tokio::sync::Mutex<()>>>>,
}

impl InProcessLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, kind: EntityKind, entity_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .entry((kind, entity_id))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl EntityLock for InProcessLocks {
    async fn acquire(&self, kind: EntityKind, entity_id: Uuid) -> Result<LockLease, PipelineError> {
        let mutex = self.entry(kind, entity_id);
        let guard = tokio::time::timeout(self.wait, mutex.lock_owned())
            .await
            .map_err(|_| PipelineError::EntityBusy { kind, entity_id })?;
        Ok(LockLease {
            kind,
            entity_id,
            token: Uuid::new_v4(),
            guard: Some(guard),
        })
    }

    async fn renew(&self, _: EntityKind, _: Uuid, _: Uuid) -> Result<bool, PipelineError> {
        Ok(true)
    }

    fn renew_interval(&self) -> Option<Duration> {
        None
    }

    async fn release(&self, mut lease: LockLease) -> Result<(), PipelineError> {
        drop(lease.guard.take());
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let key = (lease.kind, lease.entity_id);
        // Only the map holds it: nobody is waiting.
        if entries.get(&key).is_some_and(|m| Arc::strong_count(m) == 1) {
            entries.remove(&key);
        }
        Ok(())
    }
}

// ──── Redis ─────────────────────────────────────────────────────────────────

/// `SET NX PX` lease with a compare-and-delete release.
pub struct RedisLocks {
    client: redis::Client,
    ttl: Duration,
    wait: Duration,
}

impl RedisLocks {
    pub fn new(client: redis::Client, ttl: Duration, wait: Duration) -> Self {
        Self { client, ttl, wait }
    }

    fn key(kind: EntityKind, entity_id: Uuid) -> String {
        format!("hireflow:lock:{kind}:{entity_id}")
    }
}

fn lock_error(e: redis::RedisError) -> PipelineError {
    PipelineError::Lock(e.to_string())
}

#[async_trait]
impl EntityLock for RedisLocks {
    async fn acquire(&self, kind: EntityKind, entity_id: Uuid) -> Result<LockLease, PipelineError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(lock_error)?;
        let key = Self::key(kind, entity_id);
        let token = Uuid::new_v4();
        let deadline = tokio::time::Instant::now() + self.wait;

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(token.to_string())
                .arg("NX")
                .arg("PX")
                .arg(self.ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await
                .map_err(lock_error)?;

            if acquired.is_some() {
                return Ok(LockLease {
                    kind,
                    entity_id,
                    token,
                    guard: None,
                });
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Err(PipelineError::EntityBusy { kind, entity_id });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn renew(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        token: Uuid,
    ) -> Result<bool, PipelineError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(lock_error)?;
        let extended: i64 = redis::Script::new(RENEW_SCRIPT)
            .key(Self::key(kind, entity_id))
            .arg(token.to_string())
            .arg(self.ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(lock_error)?;
        Ok(extended == 1)
    }

    /// A third of the TTL, so two renewals can fail before the lease lapses.
    fn renew_interval(&self) -> Option<Duration> {
        Some((self.ttl / 3).max(POLL_INTERVAL))
    }

    async fn release(&self, lease: LockLease) -> Result<(), PipelineError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(lock_error)?;
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(Self::key(lease.kind, lease.entity_id))
            .arg(lease.token.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(lock_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_waits_then_is_busy() {
        let locks = InProcessLocks::new(Duration::from_millis(20));
        let id = Uuid::from_u128(1);
        let lease = locks.acquire(EntityKind::Job, id).await.unwrap();

        let err = locks.acquire(EntityKind::Job, id).await.unwrap_err();
        assert!(matches!(err, PipelineError::EntityBusy { .. }));

        locks.release(lease).await.unwrap();
        let again = locks.acquire(EntityKind::Job, id).await.unwrap();
        locks.release(again).await.unwrap();
    }

    #[tokio::test]
    async fn test_kinds_do_not_share_locks() {
        let locks = InProcessLocks::new(Duration::from_millis(20));
        let id = Uuid::from_u128(1);
        let job = locks.acquire(EntityKind::Job, id).await.unwrap();
        let candidate = locks.acquire(EntityKind::Candidate, id).await.unwrap();
        locks.release(job).await.unwrap();
        locks.release(candidate).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_prunes_idle_entries() {
        let locks = InProcessLocks::new(Duration::from_millis(20));
        let lease = locks.acquire(EntityKind::Job, Uuid::from_u128(5)).await.unwrap();
        locks.release(lease).await.unwrap();
        assert!(locks.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_process_leases_need_no_renewal() {
        let locks = InProcessLocks::new(Duration::from_millis(20));
        let lease = locks.acquire(EntityKind::Job, Uuid::from_u128(3)).await.unwrap();
        assert_eq!(locks.renew_interval(), None);
        assert!(locks
            .renew(lease.kind, lease.entity_id, lease.token())
            .await
            .unwrap());
        locks.release(lease).await.unwrap();
    }

    #[test]
    fn test_redis_renews_at_a_third_of_the_ttl() {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let locks = RedisLocks::new(client, Duration::from_secs(300), Duration::from_secs(10));
        assert_eq!(locks.renew_interval(), Some(Duration::from_secs(100)));
    }

    #[test]
    fn test_redis_key_format() {
        assert_eq!(
            RedisLocks::key(EntityKind::Candidate, Uuid::nil()),
            format!("hireflow:lock:candidate:{}", Uuid::nil())
        );
    }
}
