use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A client-declared conversation bucket, identified by an opaque
/// `sessionId` string supplied in request headers (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub session_id: String,
    pub tenant_id: i64,
    pub name: Option<String>,
    pub path: Option<String>,
    pub effective_budget_usd: Decimal,
    pub current_cost_usd: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    BudgetExceeded,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::BudgetExceeded => "budget_exceeded",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }
}

impl Session {
    pub fn is_budget_exceeded(&self) -> bool {
        self.status == SessionStatus::BudgetExceeded.as_str()
    }
}
