//! The fast tier fronting Postgres/SQLite for rate limiting, budget
//! counters, and session/tag lookups (spec §6). Grounded on the
//! connection-manager + `AsyncCommands` style used by the stream
//! consumer this module's idempotency marker also borrows from.

pub mod keys;

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::Result;

/// Abstracts over a live Redis connection and the no-op fallback used
/// when `REDIS_URL` is unset (spec §6: the gateway must still function,
/// degraded, with every check falling through to the database).
#[async_trait::async_trait]
pub trait CacheTier: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>>;
    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomically increment a counter by `amount`, creating it with the
    /// given TTL if absent. Used for rate-limit windows and budget spend.
    async fn incr_by(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64>;

    /// Atomically increment a `Decimal`-valued counter stored as a
    /// float-compatible string (spec §9: cache stores floats, the
    /// ledger is the source of truth in `Decimal`).
    async fn incr_by_decimal(&self, key: &str, amount: Decimal, ttl: Duration) -> Result<Decimal>;

    /// `SETNX key value PX ttl_ms`; returns `true` if this call set the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisCacheTier {
    conn: ConnectionManager,
}

impl RedisCacheTier {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl CacheTier for RedisCacheTier {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let new_value: i64 = conn.incr(key, amount).await?;
        if new_value == amount {
            let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        }
        Ok(new_value)
    }

    async fn incr_by_decimal(&self, key: &str, amount: Decimal, ttl: Duration) -> Result<Decimal> {
        let mut conn = self.conn.clone();
        let amount_f64: f64 = amount.try_into().unwrap_or(0.0);
        let new_value: f64 = conn.incr(key, amount_f64).await?;
        if (new_value - amount_f64).abs() < f64::EPSILON {
            let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        }
        Decimal::try_from(new_value)
            .map_err(|e| crate::domain::GatewayError::internal(format!("decimal overflow from cache: {}", e)))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: bool = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<_, Option<String>>(&mut conn)
            .await?
            .is_some();
        Ok(set)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

/// Fallback used when no Redis endpoint is configured. Every call is a
/// harmless no-op; callers that need a strict accounting source (budget
/// evaluation) fall back to the database directly rather than trust this.
#[derive(Clone, Default)]
pub struct NoopCacheTier;

#[async_trait::async_trait]
impl CacheTier for NoopCacheTier {
    async fn get_string(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set_string(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn incr_by(&self, _key: &str, amount: i64, _ttl: Duration) -> Result<i64> {
        warn!("cache tier disabled; rate limit counter not persisted across calls");
        Ok(amount)
    }

    async fn incr_by_decimal(&self, _key: &str, amount: Decimal, _ttl: Duration) -> Result<Decimal> {
        Ok(amount)
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool> {
        Ok(true)
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}
