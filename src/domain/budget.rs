use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The temporal shape of a [`Budget`] or [`TagBudget`], per spec §3/§4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    /// Rolling UTC day; window computed by the evaluator.
    Daily,
    /// Rolling UTC month; window computed by the evaluator.
    Monthly,
    /// Explicit `[start, end]`, end snapped to 23:59:59.999 UTC.
    Custom,
}

impl BudgetPeriod {
    pub fn as_str(&self) -> &str {
        match self {
            BudgetPeriod::Daily => "daily",
            BudgetPeriod::Monthly => "monthly",
            BudgetPeriod::Custom => "custom",
        }
    }
}

/// A monetary ceiling for `(tenant, period)`. At most one active budget
/// per `(tenant, period)` exists for the recurring kinds (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Budget {
    pub id: i64,
    pub tenant_id: i64,
    pub period: String,
    pub amount_usd: Decimal,
    pub custom_start: Option<DateTime<Utc>>,
    pub custom_end: Option<DateTime<Utc>>,
    pub active: bool,
}

/// A resolved `(amount, start, end)` window for one budget period,
/// as read through the budget cache (spec §4.2 step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetWindow {
    pub amount_usd: Decimal,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BudgetWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// The outcome of evaluating one applicable period or tag budget.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetDecision {
    Allow,
    TenantExceeded { period: String },
    TagExceeded { tag: String, period: String },
    SessionExceeded,
}
