//! Model → provider routing and the thin capability interface each
//! upstream provider implements (spec §6). Request/response translation
//! is intentionally shallow: the core only needs `model`, token usage,
//! and a pass-through body.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::domain::{GatewayError, Provider, Result};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Parses a configured override, falling back to `default` when absent.
/// A malformed override fails at client construction rather than at the
/// first dispatched call.
fn resolve_base_url(override_url: Option<&str>, default: &str) -> Result<Url> {
    match override_url {
        Some(raw) => Url::parse(raw).map_err(|e| GatewayError::config(format!("invalid provider base_url {:?}: {}", raw, e))),
        None => Ok(Url::parse(default).expect("default provider base url is always valid")),
    }
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub response_time_ms: u64,
}

/// A capability every upstream implements: translate and forward the
/// two request shapes the core admits, and report liveness.
#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    async fn chat_completion(&self, body: &Value, api_key_override: Option<&str>) -> Result<ProviderResponse>;
    async fn responses(&self, body: &Value, api_key_override: Option<&str>) -> Result<ProviderResponse>;
    async fn health_check(&self) -> ProviderHealth;
}

pub struct OpenAiClient {
    http: reqwest::Client,
    default_key: Option<String>,
    base_url: Url,
}

pub struct AnthropicClient {
    http: reqwest::Client,
    default_key: Option<String>,
    base_url: Url,
}

pub struct GoogleClient {
    http: reqwest::Client,
    default_key: Option<String>,
    base_url: Url,
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client config is static and always valid")
}

impl OpenAiClient {
    pub fn new(default_key: Option<String>, timeout: Duration, base_url_override: Option<&str>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(timeout),
            default_key,
            base_url: resolve_base_url(base_url_override, DEFAULT_OPENAI_BASE_URL)?,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        self.base_url.join(path).map(|u| u.to_string()).unwrap_or_else(|_| format!("{}{}", self.base_url, path))
    }
}

#[async_trait::async_trait]
impl ProviderClient for OpenAiClient {
    async fn chat_completion(&self, body: &Value, api_key_override: Option<&str>) -> Result<ProviderResponse> {
        let key = api_key_override
            .or(self.default_key.as_deref())
            .ok_or_else(|| GatewayError::config("no OpenAI API key configured"))?;

        let response = self
            .http
            .post(self.endpoint("/v1/chat/completions"))
            .bearer_auth(key)
            .json(body)
            .send()
            .await?;
        translate(response).await
    }

    async fn responses(&self, body: &Value, api_key_override: Option<&str>) -> Result<ProviderResponse> {
        let key = api_key_override
            .or(self.default_key.as_deref())
            .ok_or_else(|| GatewayError::config("no OpenAI API key configured"))?;

        let response = self
            .http
            .post(self.endpoint("/v1/responses"))
            .bearer_auth(key)
            .json(body)
            .send()
            .await?;
        translate(response).await
    }

    async fn health_check(&self) -> ProviderHealth {
        health_check_get(&self.http, &self.endpoint("/v1/models")).await
    }
}

impl AnthropicClient {
    pub fn new(default_key: Option<String>, timeout: Duration, base_url_override: Option<&str>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(timeout),
            default_key,
            base_url: resolve_base_url(base_url_override, DEFAULT_ANTHROPIC_BASE_URL)?,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        self.base_url.join(path).map(|u| u.to_string()).unwrap_or_else(|_| format!("{}{}", self.base_url, path))
    }
}

#[async_trait::async_trait]
impl ProviderClient for AnthropicClient {
    async fn chat_completion(&self, body: &Value, api_key_override: Option<&str>) -> Result<ProviderResponse> {
        let key = api_key_override
            .or(self.default_key.as_deref())
            .ok_or_else(|| GatewayError::config("no Anthropic API key configured"))?;

        let response = self
            .http
            .post(self.endpoint("/v1/messages"))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(body)
            .send()
            .await?;
        translate(response).await
    }

    async fn responses(&self, body: &Value, api_key_override: Option<&str>) -> Result<ProviderResponse> {
        self.chat_completion(body, api_key_override).await
    }

    async fn health_check(&self) -> ProviderHealth {
        health_check_get(&self.http, &self.endpoint("/v1/models")).await
    }
}

impl GoogleClient {
    pub fn new(default_key: Option<String>, timeout: Duration, base_url_override: Option<&str>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(timeout),
            default_key,
            base_url: resolve_base_url(base_url_override, DEFAULT_GOOGLE_BASE_URL)?,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        self.base_url.join(path).map(|u| u.to_string()).unwrap_or_else(|_| format!("{}{}", self.base_url, path))
    }
}

#[async_trait::async_trait]
impl ProviderClient for GoogleClient {
    async fn chat_completion(&self, body: &Value, api_key_override: Option<&str>) -> Result<ProviderResponse> {
        let key = api_key_override
            .or(self.default_key.as_deref())
            .ok_or_else(|| GatewayError::config("no Google API key configured"))?;

        let model = body.get("model").and_then(|m| m.as_str()).unwrap_or("gemini-2.5-pro");
        let url = format!("{}?key={}", self.endpoint(&format!("/v1beta/models/{}:generateContent", model)), key);

        let response = self.http.post(url).json(body).send().await?;
        translate(response).await
    }

    async fn responses(&self, body: &Value, api_key_override: Option<&str>) -> Result<ProviderResponse> {
        self.chat_completion(body, api_key_override).await
    }

    async fn health_check(&self) -> ProviderHealth {
        health_check_get(&self.http, &self.endpoint("/v1beta/models")).await
    }
}

async fn translate(response: reqwest::Response) -> Result<ProviderResponse> {
    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    Ok(ProviderResponse { status, body })
}

async fn health_check_get(client: &reqwest::Client, url: &str) -> ProviderHealth {
    let start = std::time::Instant::now();
    match client.get(url).send().await {
        Ok(resp) => ProviderHealth {
            healthy: resp.status().is_success() || resp.status().as_u16() == 401,
            response_time_ms: start.elapsed().as_millis() as u64,
        },
        Err(_) => ProviderHealth {
            healthy: false,
            response_time_ms: start.elapsed().as_millis() as u64,
        },
    }
}

/// Selects the provider client for a `ModelPricing.provider` tag and
/// dispatches the per-provider key override from request headers.
pub struct ProviderRouter {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl ProviderRouter {
    pub fn new(clients: HashMap<Provider, Arc<dyn ProviderClient>>) -> Self {
        Self { clients }
    }

    pub fn client_for(&self, provider: &Provider) -> Result<Arc<dyn ProviderClient>> {
        self.clients
            .get(provider)
            .cloned()
            .ok_or_else(|| GatewayError::NoProviderForModel(provider.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubClient;

    #[async_trait::async_trait]
    impl ProviderClient for StubClient {
        async fn chat_completion(&self, _body: &Value, _api_key_override: Option<&str>) -> Result<ProviderResponse> {
            Ok(ProviderResponse { status: 200, body: Value::Null })
        }

        async fn responses(&self, _body: &Value, _api_key_override: Option<&str>) -> Result<ProviderResponse> {
            Ok(ProviderResponse { status: 200, body: Value::Null })
        }

        async fn health_check(&self) -> ProviderHealth {
            ProviderHealth { healthy: true, response_time_ms: 0 }
        }
    }

    #[test]
    fn routes_to_the_registered_client() {
        let mut clients: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
        clients.insert(Provider::OpenAI, Arc::new(StubClient));
        let router = ProviderRouter::new(clients);

        assert!(router.client_for(&Provider::OpenAI).is_ok());
    }

    #[test]
    fn unregistered_provider_is_a_clear_error() {
        let router = ProviderRouter::new(HashMap::new());
        let err = router.client_for(&Provider::Anthropic).unwrap_err();
        assert!(matches!(err, GatewayError::NoProviderForModel(_)));
    }

    #[tokio::test]
    async fn openai_client_rejects_when_no_key_is_configured() {
        let client = OpenAiClient::new(None, Duration::from_secs(5), None).unwrap();
        let err = client.chat_completion(&Value::Null, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn malformed_base_url_override_is_rejected_at_construction() {
        let err = OpenAiClient::new(None, Duration::from_secs(5), Some("not a url")).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn base_url_override_replaces_the_default_host() {
        let client = OpenAiClient::new(None, Duration::from_secs(5), Some("http://localhost:9999")).unwrap();
        assert_eq!(client.endpoint("/v1/chat/completions"), "http://localhost:9999/v1/chat/completions");
    }
}
