use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded, priced call through the proxy (spec §3, §4.7). Written
/// once by the admission pipeline's post-response phase and never
/// mutated afterwards; per-tag attribution lives in [`RequestTag`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageLedger {
    pub id: Uuid,
    pub tenant_id: i64,
    pub api_key_id: i64,
    pub session_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub cached_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: Decimal,
    pub status: String,
    pub latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A tag's attributed share of a [`UsageLedger`] row's cost, weighted
/// per the tag's `TagBudget.weight` at attribution time (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestTag {
    pub usage_ledger_id: Uuid,
    pub tag_id: i64,
    pub weight: Decimal,
    pub attributed_cost_usd: Decimal,
}

impl UsageLedger {
    pub fn succeeded(&self) -> bool {
        self.status == "success"
    }
}
