//! HTTP handlers: thin adapters from axum extractors to `AdmissionPipeline`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::admission::IncomingRequest;
use crate::domain::GatewayError;
use crate::observability::tracing::correlation_id_from_headers;

use super::AppState;

/// Tag names come from a client-controlled header; this charset mirrors
/// what `TagResolver` actually stores (spec §3) so a garbled header is
/// rejected here rather than failing the "unknown tag" path one hop later.
static TAG_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.:-]{1,255}$").unwrap());

/// Wraps `GatewayError` so it can be returned directly from a handler.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "error": {
                "message": self.0.to_string(),
                "type": error_type(&self.0),
            }
        });
        (status, Json(body)).into_response()
    }
}

fn error_type(e: &GatewayError) -> &'static str {
    match e {
        GatewayError::Unauthenticated => "authentication_error",
        GatewayError::TagValidationError(_) => "invalid_request_error",
        GatewayError::RateLimited => "rate_limit_error",
        GatewayError::BudgetExceeded { .. }
        | GatewayError::TagBudgetExceeded { .. }
        | GatewayError::SessionBudgetExceeded => "budget_exceeded_error",
        GatewayError::PolicyDenied => "policy_denied_error",
        GatewayError::NoProviderForModel(_) => "invalid_request_error",
        GatewayError::ProviderError { .. } => "provider_error",
        GatewayError::ServiceUnavailable(_) => "service_unavailable_error",
        GatewayError::Validation(_) => "invalid_request_error",
        _ => "internal_error",
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn tag_names(headers: &HeaderMap) -> Result<Vec<String>, GatewayError> {
    let Some(csv) = header_str(headers, "x-budget-tags") else {
        return Ok(Vec::new());
    };

    let names: Vec<String> = csv.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    let invalid: Vec<&str> = names.iter().map(String::as_str).filter(|n| !TAG_NAME_PATTERN.is_match(n)).collect();
    if !invalid.is_empty() {
        return Err(GatewayError::TagValidationError(invalid.join(", ")));
    }
    Ok(names)
}

fn provider_key_override(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-openai-key")
        .or_else(|| header_str(headers, "x-anthropic-key"))
        .or_else(|| header_str(headers, "x-google-api-key"))
        .map(|s| s.to_string())
}

fn build_request(route: &str, headers: &HeaderMap, body: Value) -> Result<IncomingRequest, GatewayError> {
    Ok(IncomingRequest {
        authorization: header_str(headers, "authorization").map(|s| s.to_string()),
        route: route.to_string(),
        tag_names: tag_names(headers)?,
        session_id: header_str(headers, "x-session-id").map(|s| s.to_string()),
        session_name: header_str(headers, "x-session-name").map(|s| s.to_string()),
        session_path: header_str(headers, "x-session-path").map(|s| s.to_string()),
        provider_key_override: provider_key_override(headers),
        body,
    })
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_id_from_headers(&headers);
    let span = tracing::info_span!("chat_completions", correlation_id = %correlation_id);
    let _enter = span.enter();

    let request = build_request("chat_completions", &headers, body)?;
    let response = state.admission.handle(request).await?;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    Ok((status, Json(response.body)).into_response())
}

pub async fn responses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_id_from_headers(&headers);
    let span = tracing::info_span!("responses", correlation_id = %correlation_id);
    let _enter = span.enter();

    let request = build_request("responses", &headers, body)?;
    let response = state.admission.handle(request).await?;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    Ok((status, Json(response.body)).into_response())
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.check_health().await;
    let status = match health.status {
        crate::observability::HealthStatus::Healthy | crate::observability::HealthStatus::Degraded => {
            StatusCode::OK
        }
        crate::observability::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_tags(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-budget-tags", value.parse().unwrap());
        headers
    }

    #[test]
    fn parses_a_clean_comma_separated_tag_list() {
        let names = tag_names(&headers_with_tags("eng, ml,infra")).unwrap();
        assert_eq!(names, vec!["eng", "ml", "infra"]);
    }

    #[test]
    fn rejects_tag_names_outside_the_allowed_charset() {
        let err = tag_names(&headers_with_tags("eng, drop table;")).unwrap_err();
        assert!(matches!(err, GatewayError::TagValidationError(_)));
    }

    #[test]
    fn missing_header_resolves_to_an_empty_list() {
        let names = tag_names(&HeaderMap::new()).unwrap();
        assert!(names.is_empty());
    }
}
