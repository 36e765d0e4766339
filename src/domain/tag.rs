use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A hierarchical cost-attribution label scoped to a tenant (spec §3).
/// `path` and `level` are materialised and kept consistent with the
/// parent chain by [`crate::tags::TagResolver`]; cyclic parents are
/// rejected at write time rather than modelled as runtime pointers
/// (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub path: String,
    pub level: i32,
    pub active: bool,
    pub session_budget_usd: Option<Decimal>,
}

/// Inheritance mode for a [`TagBudget`]. `Lenient` (the default) also
/// blocks on an ancestor's breach; `Strict` blocks only on the tag's
/// own budget. Decided per spec §9's Open Question as a per-row
/// configuration knob, not a single global default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InheritanceMode {
    Strict,
    Lenient,
}

impl Default for InheritanceMode {
    fn default() -> Self {
        InheritanceMode::Lenient
    }
}

/// A monetary ceiling scoped to a tag, with a weight multiplier applied
/// to charges attributed through it (spec §3, §9).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TagBudget {
    pub id: i64,
    pub tag_id: i64,
    pub period: String,
    pub amount_usd: Decimal,
    pub weight: Decimal,
    pub inheritance_mode: String,
    pub custom_start: Option<chrono::DateTime<chrono::Utc>>,
    pub custom_end: Option<chrono::DateTime<chrono::Utc>>,
    /// Opaque JSON consumed by alerting; not interpreted by the evaluator.
    pub alert_thresholds: serde_json::Value,
    pub active: bool,
}

impl TagBudget {
    pub fn mode(&self) -> InheritanceMode {
        if self.inheritance_mode.eq_ignore_ascii_case("strict") {
            InheritanceMode::Strict
        } else {
            InheritanceMode::Lenient
        }
    }
}

/// A resolved tag attribution carried through admission: `{id, name, weight}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedTag {
    pub id: i64,
    pub name: String,
    pub weight: Decimal,
}
