//! Structured logging init: env-filter plus a chosen output format.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};
use uuid::Uuid;

use super::config::{TracingConfig, TracingFormat};

/// Per-request correlation id, set as a span field at the top of the
/// admission pipeline so every log line downstream carries it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract a correlation id from an inbound request, or mint one.
pub fn correlation_id_from_headers(headers: &axum::http::HeaderMap) -> CorrelationId {
    headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| CorrelationId::from_string(s.to_string()))
        .unwrap_or_default()
}

pub fn init_tracing(config: &TracingConfig) -> Result<(), String> {
    if !config.enabled {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| format!("failed to build env filter: {}", e))?;

    macro_rules! init_with {
        ($layer:expr) => {
            Registry::default()
                .with(env_filter)
                .with($layer)
                .try_init()
                .map_err(|e| format!("failed to initialize tracing: {}", e))
        };
    }

    match config.format {
        TracingFormat::Json => init_with!(fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(config.include_thread)
            .with_file(config.include_location)
            .with_line_number(config.include_location)),
        TracingFormat::Pretty => init_with!(fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(config.include_thread)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_ansi(config.ansi)),
        TracingFormat::Compact => init_with!(fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_ids(config.include_thread)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_ansi(config.ansi)),
        TracingFormat::Text => init_with!(fmt::layer()
            .with_target(true)
            .with_thread_ids(config.include_thread)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_ansi(config.ansi)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_generation_is_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn correlation_id_from_headers_falls_back_to_generated() {
        use axum::http::HeaderMap;
        let headers = HeaderMap::new();
        let id = correlation_id_from_headers(&headers);
        assert!(!id.as_str().is_empty());
    }

    #[test]
    fn correlation_id_from_headers_reads_existing() {
        use axum::http::{HeaderMap, HeaderValue};
        let mut headers = HeaderMap::new();
        headers.insert("x-correlation-id", HeaderValue::from_static("corr-123"));
        let id = correlation_id_from_headers(&headers);
        assert_eq!(id.as_str(), "corr-123");
    }
}
