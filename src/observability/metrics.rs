//! Prometheus exporter install plus the metric names this crate emits.
//!
//! Uses the `metrics` facade (not the `prometheus` crate directly) so call
//! sites stay `metrics::counter!`/`histogram!` macros; `metrics-exporter-prometheus`
//! installs the recorder and serves `/metrics` on its own listener.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use super::config::MetricsConfig;
use crate::domain::{GatewayError, Result};

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "gateway_http_requests_total";
    pub const HTTP_REQUEST_DURATION: &str = "gateway_http_request_duration_ms";
    pub const ADMISSION_DENIED_TOTAL: &str = "gateway_admission_denied_total";
    pub const LEDGER_COST_USD_TOTAL: &str = "gateway_ledger_cost_usd_total";
    pub const RATE_LIMIT_REJECTED_TOTAL: &str = "gateway_rate_limit_rejected_total";
    pub const CACHE_HIT_TOTAL: &str = "gateway_cache_hit_total";
    pub const CACHE_MISS_TOTAL: &str = "gateway_cache_miss_total";
    pub const PROVIDER_REQUEST_DURATION: &str = "gateway_provider_request_duration_ms";
    pub const LEDGER_WORKER_LAG: &str = "gateway_ledger_worker_lag_messages";
}

/// Install the Prometheus recorder on its own listener. Idempotent at the
/// process level is not guaranteed by the exporter crate, so call this once.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        tracing::info!("metrics collection disabled");
        return Ok(());
    }

    let addr: SocketAddr = config
        .prometheus_addr
        .parse()
        .map_err(|e| GatewayError::config(format!("invalid prometheus address: {}", e)))?;

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| GatewayError::internal(format!("failed to configure histogram buckets: {}", e)))?;

    builder
        .install()
        .map_err(|e| GatewayError::internal(format!("failed to install prometheus exporter: {}", e)))?;

    tracing::info!(addr = %addr, "prometheus exporter installed");
    metrics::counter!("gateway_build_info", 1, "version" => env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparseable_bind_address() {
        let config = MetricsConfig {
            prometheus_addr: "not-an-address".to_string(),
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).is_err());
    }

    #[test]
    fn disabled_config_is_a_noop() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).is_ok());
    }
}
