use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A logical billing + policy unit. Created by admin (out of scope);
/// the core only consumes the resulting entity.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: i64,
    pub name: String,

    /// `None` means "use the configured default rate limit"; `Some(0)` means unlimited.
    pub rate_limit_per_min: Option<i64>,

    /// Default session budget applied when no tag on the session carries one.
    pub default_session_budget_usd: Option<Decimal>,
}
