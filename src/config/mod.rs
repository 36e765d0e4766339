//! Configuration loading: TOML file overlaid with `GATEWAY_`-prefixed
//! environment variables, via `figment` (spec §6's enumerated options).

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::{Validate, ValidationError};

use crate::domain::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseSection,
    #[serde(default)]
    pub redis: RedisSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub budgets: BudgetSection,
    #[serde(default)]
    pub providers: ProviderSection,
    #[serde(default = "default_admin_api_key")]
    pub admin_api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseSection {
    #[validate(length(min = 1, message = "database.url must not be empty"))]
    pub url: String,
    #[serde(default = "default_pool_size")]
    #[validate(range(min = 1, max = 500))]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSection {
    /// Absent `url` degrades every cache-tier op to a no-op (spec §6).
    pub url: Option<String>,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self { url: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HttpSection {
    #[serde(default = "default_bind")]
    #[validate(length(min = 1))]
    pub bind: String,
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BudgetSection {
    #[serde(default = "default_budget_usd")]
    pub default_budget_usd: Decimal,
    #[serde(default = "default_periods")]
    #[validate(length(min = 1, message = "at least one budget period is required"))]
    pub periods: Vec<String>,
    #[serde(default = "default_rate_limit")]
    #[validate(range(min = 0, message = "max_reqs_per_min must be >= 0 (0 means unlimited)"))]
    pub max_reqs_per_min: i64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            default_budget_usd: default_budget_usd(),
            periods: default_periods(),
            max_reqs_per_min: default_rate_limit(),
        }
    }
}

/// Per-provider API keys and optional base-URL overrides, parsed and
/// validated with `url::Url` so a malformed override fails fast at
/// startup instead of at the first dispatched call.
#[derive(Debug, Clone, Serialize, Deserialize, Default, Validate)]
pub struct ProviderSection {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    #[validate(custom(function = "validate_base_url"))]
    pub openai_base_url: Option<String>,
    #[validate(custom(function = "validate_base_url"))]
    pub anthropic_base_url: Option<String>,
    #[validate(custom(function = "validate_base_url"))]
    pub google_base_url: Option<String>,
}

fn validate_base_url(value: &str) -> std::result::Result<(), ValidationError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid provider base_url"))
}

fn default_pool_size() -> u32 {
    10
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_budget_usd() -> Decimal {
    Decimal::new(10000, 2) // $100.00
}

fn default_periods() -> Vec<String> {
    vec!["daily".to_string(), "monthly".to_string()]
}

fn default_rate_limit() -> i64 {
    600
}

fn default_admin_api_key() -> String {
    String::new()
}

impl AppConfig {
    /// Loads `path` (if present) overlaid with `GATEWAY_*` env vars;
    /// nested keys use `__` as the separator (e.g. `GATEWAY_HTTP__PORT`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GATEWAY_").split("__"));

        let config: AppConfig = figment
            .extract()
            .map_err(|e| crate::domain::GatewayError::config(format!("invalid configuration: {}", e)))?;

        config.validate_all()?;
        Ok(config)
    }

    /// Cascades `Validate::validate()` across each section the way a
    /// field-level `#[validate]` would, surfacing every violation in one
    /// pass rather than failing on the first section.
    fn validate_all(&self) -> Result<()> {
        self.database
            .validate()
            .map_err(|e| crate::domain::GatewayError::config(format!("invalid database config: {}", e)))?;
        self.http
            .validate()
            .map_err(|e| crate::domain::GatewayError::config(format!("invalid http config: {}", e)))?;
        self.budgets
            .validate()
            .map_err(|e| crate::domain::GatewayError::config(format!("invalid budgets config: {}", e)))?;
        self.providers
            .validate()
            .map_err(|e| crate::domain::GatewayError::config(format!("invalid providers config: {}", e)))?;
        Ok(())
    }

    pub fn default_sqlite() -> Self {
        Self {
            database: DatabaseSection {
                url: "sqlite://ratewarden.db".to_string(),
                max_connections: default_pool_size(),
            },
            redis: RedisSection::default(),
            http: HttpSection::default(),
            logging: LoggingSection::default(),
            budgets: BudgetSection::default(),
            providers: ProviderSection::default(),
            admin_api_key: default_admin_api_key(),
            // ProviderSection::default() leaves every base_url at None,
            // which validate() accepts (it only checks Some values).
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_budget_defaults() {
        let config = AppConfig::default_sqlite();
        assert_eq!(config.budgets.periods, vec!["daily", "monthly"]);
        assert_eq!(config.budgets.max_reqs_per_min, 600);
    }

    #[test]
    fn env_override_wins_over_missing_file() {
        std::env::set_var("GATEWAY_HTTP__PORT", "9999");
        let config = AppConfig::load("does-not-exist.toml").unwrap();
        assert_eq!(config.http.port, 9999);
        std::env::remove_var("GATEWAY_HTTP__PORT");
    }

    #[test]
    fn default_config_passes_validation() {
        AppConfig::default_sqlite().validate_all().unwrap();
    }

    #[test]
    fn malformed_provider_base_url_is_rejected() {
        let mut config = AppConfig::default_sqlite();
        config.providers.openai_base_url = Some("not-a-url".to_string());
        assert!(config.validate_all().is_err());
    }

    #[test]
    fn empty_database_url_is_rejected() {
        let mut config = AppConfig::default_sqlite();
        config.database.url = String::new();
        assert!(config.validate_all().is_err());
    }
}
