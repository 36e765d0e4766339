//! Liveness/readiness checks wired to the actual database pool and cache
//! tier, grounded on this crate's original health-checker shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::CacheTier;
use crate::storage::DatabasePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub check_duration_ms: u64,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            check_duration_ms: 0,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            check_duration_ms: 0,
        }
    }
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> ComponentHealth;
    fn is_critical(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
}

impl SystemHealth {
    fn determine_status(components: &[ComponentHealth], critical: &[String]) -> HealthStatus {
        let mut degraded = false;
        for component in components {
            match component.status {
                HealthStatus::Unhealthy if critical.contains(&component.name) => {
                    return HealthStatus::Unhealthy;
                }
                HealthStatus::Unhealthy | HealthStatus::Degraded => degraded = true,
                HealthStatus::Healthy => {}
            }
        }
        if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

pub struct HealthChecker {
    checks: Vec<Arc<dyn HealthCheck>>,
    critical: Vec<String>,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            critical: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn register(mut self, check: Arc<dyn HealthCheck>) -> Self {
        if check.is_critical() {
            self.critical.push(check.name().to_string());
        }
        self.checks.push(check);
        self
    }

    pub async fn check_health(&self) -> SystemHealth {
        let futures = self.checks.iter().map(|check| async move {
            let start = Instant::now();
            let mut result = check.check().await;
            result.check_duration_ms = start.elapsed().as_millis() as u64;
            result
        });
        let components = futures::future::join_all(futures).await;
        let status = SystemHealth::determine_status(&components, &self.critical);

        SystemHealth {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            components,
        }
    }

    pub async fn check_readiness(&self) -> HealthStatus {
        match self.check_health().await.status {
            HealthStatus::Healthy | HealthStatus::Degraded => HealthStatus::Healthy,
            HealthStatus::Unhealthy => HealthStatus::Unhealthy,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DatabaseHealthCheck {
    pool: DatabasePool,
}

impl DatabaseHealthCheck {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthCheck for DatabaseHealthCheck {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> ComponentHealth {
        match self.pool.health_check().await {
            Ok(()) => ComponentHealth::healthy("database"),
            Err(e) => ComponentHealth::unhealthy("database", e.to_string()),
        }
    }

    fn is_critical(&self) -> bool {
        true
    }
}

pub struct CacheHealthCheck {
    cache: Arc<dyn CacheTier>,
}

impl CacheHealthCheck {
    pub fn new(cache: Arc<dyn CacheTier>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HealthCheck for CacheHealthCheck {
    fn name(&self) -> &str {
        "cache"
    }

    async fn check(&self) -> ComponentHealth {
        match self.cache.get_string("health:probe").await {
            Ok(_) => ComponentHealth::healthy("cache"),
            Err(e) => ComponentHealth::unhealthy("cache", e.to_string()),
        }
    }

    // Degrades, rather than fails the deployment: the cache tier already
    // falls back to a no-op implementation when Redis is absent.
    fn is_critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysHealthy;

    #[async_trait]
    impl HealthCheck for AlwaysHealthy {
        fn name(&self) -> &str {
            "stub"
        }
        async fn check(&self) -> ComponentHealth {
            ComponentHealth::healthy("stub")
        }
    }

    struct AlwaysUnhealthy;

    #[async_trait]
    impl HealthCheck for AlwaysUnhealthy {
        fn name(&self) -> &str {
            "stub-critical"
        }
        async fn check(&self) -> ComponentHealth {
            ComponentHealth::unhealthy("stub-critical", "down")
        }
        fn is_critical(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn empty_checker_is_healthy() {
        let checker = HealthChecker::new();
        assert_eq!(checker.check_health().await.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn critical_failure_marks_system_unhealthy() {
        let checker = HealthChecker::new().register(Arc::new(AlwaysUnhealthy));
        assert_eq!(checker.check_health().await.status, HealthStatus::Unhealthy);
        assert_eq!(checker.check_readiness().await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn healthy_and_unhealthy_mix_without_criticality_is_degraded() {
        struct NonCriticalUnhealthy;
        #[async_trait]
        impl HealthCheck for NonCriticalUnhealthy {
            fn name(&self) -> &str {
                "noncritical"
            }
            async fn check(&self) -> ComponentHealth {
                ComponentHealth::unhealthy("noncritical", "degraded path")
            }
        }

        let checker = HealthChecker::new()
            .register(Arc::new(AlwaysHealthy))
            .register(Arc::new(NonCriticalUnhealthy));
        assert_eq!(checker.check_health().await.status, HealthStatus::Degraded);
        assert_eq!(checker.check_readiness().await, HealthStatus::Healthy);
    }
}
