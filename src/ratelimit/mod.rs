//! Tenant-keyed fixed-window rate limiting over the cache tier
//! (spec §4.1 step 3, §4.3). A one-minute window is addressed by its
//! start-of-minute timestamp so the counter self-expires. The
//! per-tenant limit itself is cached in-process with a 60-second TTL
//! (spec §4.3), the same `RwLock<HashMap<_, Cached*>>` shape
//! `auth::AuthCache` uses in front of the API-key repository, so a hot
//! tenant doesn't cost a tenant-row fetch on every request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::cache::{keys, CacheTier};
use crate::domain::{GatewayError, Result};
use crate::storage::TenantRepository;

const WINDOW: Duration = Duration::from_secs(60);
const LIMIT_CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedLimit {
    limit_per_min: i64,
    expires_at: Instant,
}

pub struct RateLimiter {
    cache: Arc<dyn CacheTier>,
    tenants: Arc<dyn TenantRepository>,
    default_limit_per_min: i64,
    limits: RwLock<HashMap<i64, CachedLimit>>,
}

impl RateLimiter {
    pub fn new(tenants: Arc<dyn TenantRepository>, cache: Arc<dyn CacheTier>, default_limit_per_min: i64) -> Self {
        Self {
            cache,
            tenants,
            default_limit_per_min,
            limits: RwLock::new(HashMap::new()),
        }
    }

    /// Fast no-DB path on a warm limit cache: resolve the tenant's
    /// configured limit (DB read only on a cache miss), then probe the
    /// cache-tier window counter. `0` on the tenant means unlimited.
    pub async fn check(&self, tenant_id: i64) -> Result<()> {
        let limit = self.limit_for(tenant_id).await?;
        if limit == 0 {
            return Ok(());
        }

        let window_start_minute = Utc::now().timestamp() / 60;
        let key = keys::rate_limit(tenant_id, window_start_minute);
        let count = self.cache.incr_by(&key, 1, WINDOW).await?;

        if count > limit {
            return Err(GatewayError::RateLimited);
        }
        Ok(())
    }

    async fn limit_for(&self, tenant_id: i64) -> Result<i64> {
        {
            let limits = self.limits.read().await;
            if let Some(cached) = limits.get(&tenant_id) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.limit_per_min);
                }
            }
        }

        let tenant = self.tenants.get(tenant_id).await?;
        let limit_per_min = tenant
            .and_then(|t| t.rate_limit_per_min)
            .unwrap_or(self.default_limit_per_min);

        let mut limits = self.limits.write().await;
        limits.insert(
            tenant_id,
            CachedLimit {
                limit_per_min,
                expires_at: Instant::now() + LIMIT_CACHE_TTL,
            },
        );
        Ok(limit_per_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCacheTier;
    use crate::domain::Tenant;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    struct FakeTenantRepo {
        tenants: Vec<Tenant>,
    }

    #[async_trait]
    impl TenantRepository for FakeTenantRepo {
        async fn get(&self, id: i64) -> Result<Option<Tenant>> {
            Ok(self.tenants.iter().find(|t| t.id == id).cloned())
        }

        async fn get_by_name(&self, name: &str) -> Result<Option<Tenant>> {
            Ok(self.tenants.iter().find(|t| t.name == name).cloned())
        }
    }

    fn tenant(id: i64, rate_limit_per_min: Option<i64>) -> Tenant {
        Tenant {
            id,
            name: format!("tenant-{}", id),
            rate_limit_per_min,
            default_session_budget_usd: None,
        }
    }

    #[tokio::test]
    async fn unlimited_tenant_always_passes() {
        let tenants = Arc::new(FakeTenantRepo { tenants: vec![tenant(1, Some(0))] });
        let limiter = RateLimiter::new(tenants, Arc::new(NoopCacheTier), 10);
        for _ in 0..100 {
            limiter.check(1).await.unwrap();
        }
    }

    #[tokio::test]
    async fn falls_back_to_default_when_tenant_has_no_configured_limit() {
        let tenants = Arc::new(FakeTenantRepo { tenants: vec![tenant(1, None)] });
        let limiter = RateLimiter::new(tenants, Arc::new(NoopCacheTier), 1);
        // documents the degraded-mode limitation: without a real cache
        // tier each call sees a fresh counter and never trips the limit.
        limiter.check(1).await.unwrap();
        limiter.check(1).await.unwrap();
    }

    #[tokio::test]
    async fn tenant_limit_is_cached_after_the_first_lookup() {
        let tenants = Arc::new(FakeTenantRepo { tenants: vec![tenant(1, Some(5))] });
        let limiter = RateLimiter::new(tenants.clone(), Arc::new(NoopCacheTier), 10);

        let first = limiter.limit_for(1).await.unwrap();
        assert_eq!(first, 5);

        // A limit change in the backing store is not observed until the
        // 60s TTL expires; the cached value still wins.
        {
            let mut limits = limiter.limits.write().await;
            limits.get_mut(&1).unwrap().expires_at = Instant::now() + Duration::from_secs(60);
        }
        let _ = Decimal::ZERO; // silence unused import if cfg trims it
        assert_eq!(limiter.limit_for(1).await.unwrap(), 5);
    }
}
