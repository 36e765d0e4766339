//! The admission pipeline's policy hook. Rule *evaluation* is delegated
//! to an external engine; this module only shapes the request payload
//! sent to it and interprets the boolean `allow` it returns (spec §1,
//! §4.1 step 6).

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{GatewayError, Result};

/// What the policy hook is evaluated against: tenant identity, the
/// route being called, and the wall-clock hour, alongside the period
/// budgets and current usage the evaluator already gathered.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyRequest {
    pub tenant_id: i64,
    pub route: String,
    pub hour_of_day: u32,
    pub period_budgets: Vec<PeriodUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodUsage {
    pub period: String,
    pub budget_usd: Decimal,
    pub spent_usd: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[async_trait::async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(&self, request: &PolicyRequest) -> Result<PolicyDecision>;
}

/// Used when no external rule engine is configured; every request passes.
#[derive(Default)]
pub struct AllowAllPolicy;

#[async_trait::async_trait]
impl PolicyEngine for AllowAllPolicy {
    async fn evaluate(&self, _request: &PolicyRequest) -> Result<PolicyDecision> {
        Ok(PolicyDecision {
            allow: true,
            reason: None,
        })
    }
}

/// Calls an external HTTP rule engine; a non-2xx or unreachable engine
/// fails closed (deny), since the policy hook exists to enforce, unlike
/// the tag-budget walk which fails open.
pub struct HttpPolicyEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPolicyEngine {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait]
impl PolicyEngine for HttpPolicyEngine {
    async fn evaluate(&self, request: &PolicyRequest) -> Result<PolicyDecision> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::ServiceUnavailable(format!("policy engine unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Ok(PolicyDecision {
                allow: false,
                reason: Some(format!("policy engine returned {}", response.status())),
            });
        }

        let decision: PolicyDecision = response.json().await?;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_never_denies() {
        let engine = AllowAllPolicy;
        let request = PolicyRequest {
            tenant_id: 1,
            route: "chat-completion".into(),
            hour_of_day: 12,
            period_budgets: vec![],
        };
        let decision = engine.evaluate(&request).await.unwrap();
        assert!(decision.allow);
    }
}
