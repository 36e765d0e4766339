//! Orchestrates the eight admission phases in spec §4.1 for a single
//! proxied call. This is the one module every other core component is
//! wired into; it holds no state of its own beyond its collaborators.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Timelike, Utc};
use serde_json::Value;

use crate::auth::{self, AuthCache};
use crate::budget::BudgetEvaluator;
use crate::domain::{BudgetDecision, GatewayError, Provider, Result};
use crate::ledger::{LedgerWriter, UsageOutcome};
use crate::policy::{PeriodUsage, PolicyEngine, PolicyRequest};
use crate::provider::{ProviderResponse, ProviderRouter};
use crate::ratelimit::RateLimiter;
use crate::session::SessionTracker;
use crate::storage::{PricingRepository, TenantRepository};
use crate::tags::TagResolver;

pub struct IncomingRequest {
    pub authorization: Option<String>,
    pub route: String,
    pub tag_names: Vec<String>,
    pub session_id: Option<String>,
    pub session_name: Option<String>,
    pub session_path: Option<String>,
    pub provider_key_override: Option<String>,
    pub body: Value,
}

pub struct AdmissionPipeline {
    auth_cache: Arc<AuthCache>,
    tenants: Arc<dyn TenantRepository>,
    tags: Arc<TagResolver>,
    sessions: Arc<SessionTracker>,
    budgets: Arc<BudgetEvaluator>,
    rate_limiter: Arc<RateLimiter>,
    policy: Arc<dyn PolicyEngine>,
    router: Arc<ProviderRouter>,
    pricing: Arc<dyn PricingRepository>,
    ledger: Arc<LedgerWriter>,
}

impl AdmissionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auth_cache: Arc<AuthCache>,
        tenants: Arc<dyn TenantRepository>,
        tags: Arc<TagResolver>,
        sessions: Arc<SessionTracker>,
        budgets: Arc<BudgetEvaluator>,
        rate_limiter: Arc<RateLimiter>,
        policy: Arc<dyn PolicyEngine>,
        router: Arc<ProviderRouter>,
        pricing: Arc<dyn PricingRepository>,
        ledger: Arc<LedgerWriter>,
    ) -> Self {
        Self {
            auth_cache,
            tenants,
            tags,
            sessions,
            budgets,
            rate_limiter,
            policy,
            router,
            pricing,
            ledger,
        }
    }

    pub async fn handle(&self, request: IncomingRequest) -> Result<ProviderResponse> {
        // Authentication resolves identity from the cached API-key hash
        // without a tenant-row fetch; the rate probe runs right after it
        // off that identity alone, so an adversarial flood never reaches
        // the tenant-row DB read below (spec §4.1: rate limit first).
        let ctx = auth::authenticate(request.authorization.as_deref(), &self.auth_cache).await?;

        self.rate_limiter.check(ctx.tenant_id).await?;

        let tenant = self
            .tenants
            .get(ctx.tenant_id)
            .await?
            .ok_or(GatewayError::Unauthenticated)?;

        let resolved_tags = self.tags.resolve(tenant.id, &request.tag_names).await?;

        let session = if let Some(session_id) = &request.session_id {
            let mut tag_rows = Vec::new();
            for t in &resolved_tags {
                if let Ok(Some(tag)) = self.tags_repo_lookup(t.id).await {
                    tag_rows.push(tag);
                }
            }
            Some(
                self.sessions
                    .get_or_create(
                        session_id,
                        tenant.id,
                        request.session_name.clone(),
                        request.session_path.clone(),
                        &tag_rows,
                        tenant.default_session_budget_usd,
                    )
                    .await?,
            )
        } else {
            None
        };

        let now = Utc::now();
        let decision = self
            .budgets
            .evaluate(tenant.id, &resolved_tags, session.as_ref(), now)
            .await?;

        if let BudgetDecision::SessionExceeded = &decision {
            if let Some(mut session) = session.clone() {
                let _ = self.sessions.mark_exceeded(&mut session).await;
            }
        }
        if let Some(err) = Option::<GatewayError>::from(decision) {
            return Err(err);
        }

        let policy_request = PolicyRequest {
            tenant_id: tenant.id,
            route: request.route.clone(),
            hour_of_day: now.hour(),
            period_budgets: Vec::<PeriodUsage>::new(),
        };
        let policy_decision = self.policy.evaluate(&policy_request).await?;
        if !policy_decision.allow {
            return Err(GatewayError::PolicyDenied);
        }

        let model = request
            .body
            .get("model")
            .and_then(|m| m.as_str())
            .ok_or_else(|| GatewayError::NoProviderForModel("<missing>".to_string()))?
            .to_string();

        let pricing = self
            .pricing
            .active_for_model(None, &model, now)
            .await?
            .ok_or_else(|| GatewayError::NoProviderForModel(model.clone()))?;

        let provider = Provider::parse(&pricing.provider);
        let client = self.router.client_for(&provider)?;

        let started = Instant::now();
        let response = match request.route.as_str() {
            "responses" => {
                client
                    .responses(&request.body, request.provider_key_override.as_deref())
                    .await?
            }
            _ => {
                client
                    .chat_completion(&request.body, request.provider_key_override.as_deref())
                    .await?
            }
        };
        let latency_ms = started.elapsed().as_millis() as i64;

        // Phase 8 runs unconditionally; accounting itself is gated on a
        // clean 200 with no embedded `error` field.
        if response.status == 200 && response.body.get("error").is_none() {
            let (prompt_tokens, cached_tokens, completion_tokens, total_tokens) = extract_usage(&response.body);
            let outcome = UsageOutcome {
                provider: provider.as_str().to_string(),
                model,
                prompt_tokens,
                cached_tokens,
                completion_tokens,
                total_tokens,
                latency_ms,
                status: "success".to_string(),
            };

            if let Err(e) = self
                .ledger
                .record(
                    tenant.id,
                    ctx.api_key_id,
                    &request.route,
                    request.session_id.as_deref(),
                    &resolved_tags,
                    outcome,
                )
                .await
            {
                tracing::error!(error = %e, "ledger write failed after successful upstream call");
            }
        }

        Ok(response)
    }

    async fn tags_repo_lookup(&self, tag_id: i64) -> Result<Option<crate::domain::Tag>> {
        // Thin indirection so the session's attached-tags lookup goes
        // through the same resolver path tests exercise.
        self.tags.tag_by_id(tag_id).await
    }
}

/// Returns `(prompt_tokens, cached_tokens, completion_tokens, total_tokens)`.
/// OpenAI-shaped responses carry no aggregate field, so total is synthesized
/// from prompt + completion; Google's `usageMetadata.totalTokenCount` is
/// authoritative where present and drives tiered-pricing suffix selection
/// (spec §4.4 step 4).
fn extract_usage(body: &Value) -> (i64, i64, i64, i64) {
    if let Some(usage) = body.get("usage") {
        let prompt = usage.get("prompt_tokens").and_then(|v| v.as_i64()).unwrap_or(0);
        let completion = usage.get("completion_tokens").and_then(|v| v.as_i64()).unwrap_or(0);
        let cached = usage
            .get("prompt_tokens_details")
            .and_then(|d| d.get("cached_tokens"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let total = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .unwrap_or(prompt + completion);
        return (prompt, cached, completion, total);
    }

    if let Some(usage) = body.get("usageMetadata") {
        let prompt = usage.get("promptTokenCount").and_then(|v| v.as_i64()).unwrap_or(0);
        let completion = usage.get("candidatesTokenCount").and_then(|v| v.as_i64()).unwrap_or(0);
        let total = usage
            .get("totalTokenCount")
            .and_then(|v| v.as_i64())
            .unwrap_or(prompt + completion);
        return (prompt, 0, completion, total);
    }

    (0, 0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_usage_metadata_reports_its_own_total() {
        let body = serde_json::json!({
            "usageMetadata": {
                "promptTokenCount": 200_000,
                "candidatesTokenCount": 30_000,
                "totalTokenCount": 230_000,
            }
        });
        assert_eq!(extract_usage(&body), (200_000, 0, 30_000, 230_000));
    }

    #[test]
    fn openai_usage_synthesizes_total_from_prompt_and_completion() {
        let body = serde_json::json!({
            "usage": {
                "prompt_tokens": 100,
                "completion_tokens": 50,
                "prompt_tokens_details": { "cached_tokens": 20 },
            }
        });
        assert_eq!(extract_usage(&body), (100, 20, 50, 150));
    }

    #[test]
    fn missing_usage_defaults_to_zero() {
        assert_eq!(extract_usage(&serde_json::json!({})), (0, 0, 0, 0));
    }
}
