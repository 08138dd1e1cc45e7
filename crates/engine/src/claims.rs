//! Send claims: short-lived per-notification locks held while a push is in flight.
//!
//! Overlapping scans (or a scan racing the on-create path) can both see the same
//! record as undelivered. Before sending, the executor takes a claim on the
//! notification id; whoever fails to take it skips the record. Claims expire on
//! their own, so a crashed dispatcher never blocks a record for longer than the
//! TTL.
//!
//! The Redis implementation uses `SET NX EX` for an atomic check-and-set.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

#[async_trait]
pub trait SendClaims: Send + Sync {
    /// Returns `true` if the caller now holds the claim.
    async fn try_claim(&self, notification_id: Uuid) -> anyhow::Result<bool>;

    /// Give up a claim early so the next scan can retry immediately.
    async fn release(&self, notification_id: Uuid) -> anyhow::Result<()>;
}

/// Claims that always succeed. Used when no Redis is configured; the
/// conditional delivery mark remains the only overlap guard.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClaims;

#[async_trait]
impl SendClaims for NoClaims {
    async fn try_claim(&self, _notification_id: Uuid) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn release(&self, _notification_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Redis-backed send claims.
#[derive(Clone)]
pub struct RedisSendClaims {
    redis: ConnectionManager,
    ttl: Duration,
}

impl RedisSendClaims {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self { redis, ttl }
    }

    fn key(notification_id: Uuid) -> String {
        format!("notification:send_claim:{}", notification_id)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl SendClaims for RedisSendClaims {
    async fn try_claim(&self, notification_id: Uuid) -> anyhow::Result<bool> {
        let mut redis = self.redis.clone();
        let key = Self::key(notification_id);

        // SET key "1" NX EX ttl
        // Some("OK") when the key was set, None when another dispatcher holds it.
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs())
            .query_async(&mut redis)
            .await?;

        let claimed = result.is_some();
        if !claimed {
            tracing::debug!(
                notification_id = %notification_id,
                "Send claim held elsewhere"
            );
        }

        Ok(claimed)
    }

    async fn release(&self, notification_id: Uuid) -> anyhow::Result<()> {
        let mut redis = self.redis.clone();
        redis.del::<_, ()>(Self::key(notification_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_key_format() {
        let id = Uuid::nil();
        assert_eq!(
            RedisSendClaims::key(id),
            "notification:send_claim:00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn test_no_claims_always_granted() {
        let claims = NoClaims;
        let id = Uuid::new_v4();
        assert!(claims.try_claim(id).await.unwrap());
        assert!(claims.try_claim(id).await.unwrap());
        claims.release(id).await.unwrap();
    }
}
