use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The durable-stream wire shape emitted by [`super::LedgerWriter`] and
/// consumed by [`super::LedgerWorker`] (spec §6). Flat by design so it
/// can be written as a Redis stream entry's field map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub usage_ledger_id: Uuid,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub tenant_id: i64,
    pub api_key_id: i64,
    pub route: String,
    pub provider: String,
    pub model: String,
    pub session_id: Option<String>,
    /// 6-decimal fixed-point string, per spec §9.
    pub usd: String,
    pub prompt_tokens: i64,
    pub cached_tokens: i64,
    pub completion_tokens: i64,
    pub latency_ms: i64,
    pub status: String,
    #[serde(default)]
    pub tags: Vec<EventTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTag {
    pub id: i64,
    pub name: String,
    pub weight: Decimal,
    pub attributed_cost_usd: Decimal,
}
