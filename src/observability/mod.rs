pub mod config;
pub mod health;
pub mod metrics;
pub mod tracing;

pub use config::ObservabilityConfig;
pub use health::{CacheHealthCheck, ComponentHealth, DatabaseHealthCheck, HealthCheck, HealthChecker, HealthStatus, SystemHealth};
pub use metrics::init_metrics;
pub use tracing::{init_tracing, CorrelationId};
