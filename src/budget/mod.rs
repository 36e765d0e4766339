//! Aggregate budget evaluation across temporal periods and orthogonal
//! dimensions — tenant, tag hierarchy, session (spec §4.2).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::cache::{keys, CacheTier};
use crate::domain::{
    Budget, BudgetDecision, BudgetWindow, GatewayError, InheritanceMode, ResolvedTag, Result,
    Session,
};
use crate::storage::{BudgetRepository, TagRepository};
use crate::tags::TagResolver;

const DEFAULT_PERIODS: [&str; 2] = ["daily", "monthly"];

pub struct BudgetEvaluator {
    budgets: Arc<dyn BudgetRepository>,
    tags: Arc<dyn TagRepository>,
    resolver: Arc<TagResolver>,
    cache: Arc<dyn CacheTier>,
    default_budget_usd: Decimal,
}

impl BudgetEvaluator {
    pub fn new(
        budgets: Arc<dyn BudgetRepository>,
        tags: Arc<dyn TagRepository>,
        resolver: Arc<TagResolver>,
        cache: Arc<dyn CacheTier>,
        default_budget_usd: Decimal,
    ) -> Self {
        Self {
            budgets,
            tags,
            resolver,
            cache,
            default_budget_usd,
        }
    }

    /// Evaluate every applicable tenant-period, tag-hierarchy, and
    /// session budget. Returns `Allow` or the first violated scope.
    pub async fn evaluate(
        &self,
        tenant_id: i64,
        resolved_tags: &[ResolvedTag],
        session: Option<&Session>,
        now: DateTime<Utc>,
    ) -> Result<BudgetDecision> {
        if let Some(decision) = self.evaluate_tenant(tenant_id, now).await? {
            return Ok(decision);
        }

        if let Some(decision) = self.evaluate_tags(tenant_id, resolved_tags, now).await {
            return Ok(decision);
        }

        if let Some(session) = session {
            if session.current_cost_usd >= session.effective_budget_usd
                && session.effective_budget_usd > Decimal::ZERO
            {
                return Ok(BudgetDecision::SessionExceeded);
            }
        }

        Ok(BudgetDecision::Allow)
    }

    async fn evaluate_tenant(
        &self,
        tenant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<BudgetDecision>> {
        let budgets = self.budgets.active_for_tenant(tenant_id).await?;

        for period in DEFAULT_PERIODS {
            let window = self
                .resolve_window(tenant_id, period, &budgets, now)
                .await?;
            let Some(window) = window else { continue };
            if !window.contains(now) {
                continue;
            }

            let period_key = period_key(period, now);
            let key = keys::ledger(tenant_id, &period_key);
            let spent = self.read_counter(&key).await;

            if spent >= window.amount_usd {
                return Ok(Some(BudgetDecision::TenantExceeded {
                    period: period.to_string(),
                }));
            }
        }

        Ok(None)
    }

    async fn resolve_window(
        &self,
        tenant_id: i64,
        period: &str,
        budgets: &[Budget],
        now: DateTime<Utc>,
    ) -> Result<Option<BudgetWindow>> {
        let cache_key = keys::budget(tenant_id, period);
        if let Some(cached) = self.cache.get_string(&cache_key).await? {
            if let Ok(window) = serde_json::from_str::<BudgetWindow>(&cached) {
                return Ok(Some(window));
            }
        }

        let row = budgets.iter().find(|b| b.period == period);
        let window = match row {
            Some(row) => match row.period.as_str() {
                "custom" => {
                    let (Some(start), Some(end)) = (row.custom_start, row.custom_end) else {
                        return Ok(None);
                    };
                    BudgetWindow {
                        amount_usd: row.amount_usd,
                        start,
                        end,
                    }
                }
                _ => {
                    let (start, end) = recurring_window(period, now);
                    BudgetWindow {
                        amount_usd: row.amount_usd,
                        start,
                        end,
                    }
                }
            },
            None => {
                let (start, end) = recurring_window(period, now);
                BudgetWindow {
                    amount_usd: self.default_budget_usd,
                    start,
                    end,
                }
            }
        };

        let ttl = (window.end - window.start)
            .to_std()
            .unwrap_or(Duration::from_secs(86_400));
        if let Ok(json) = serde_json::to_string(&window) {
            let _ = self.cache.set_string(&cache_key, &json, ttl).await;
        }

        Ok(Some(window))
    }

    /// Walk each resolved tag to the root; a tag-period budget whose
    /// ledger counter has met-or-exceeded its amount blocks the request,
    /// except a `STRICT` ancestor breach does not block a `LENIENT`
    /// descendant's own check below the ancestor (spec §4.2 step 5).
    async fn evaluate_tags(
        &self,
        tenant_id: i64,
        resolved_tags: &[ResolvedTag],
        now: DateTime<Utc>,
    ) -> Option<BudgetDecision> {
        for resolved in resolved_tags {
            let Ok(Some(tag)) = self.tags.get(resolved.id).await else {
                continue;
            };

            let chain = self.resolver.ancestors(&tag).await.unwrap_or_default();
            let mut walk = vec![tag.clone()];
            walk.extend(chain);

            for (depth, node) in walk.iter().enumerate() {
                let budgets = match self.budgets.active_for_tag(node.id).await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, tag_id = node.id, "tag budget read failed, fail-open");
                        continue;
                    }
                };

                for tag_budget in &budgets {
                    if depth > 0 && tag_budget.mode() == InheritanceMode::Strict {
                        // A STRICT tag's own budget only blocks itself;
                        // it is never evaluated as an ancestor breach.
                        continue;
                    }

                    let period_key = period_key(&tag_budget.period, now);
                    let key = keys::ledger_tag(tenant_id, node.id, &period_key);
                    let spent = self.read_counter(&key).await;

                    if spent >= tag_budget.amount_usd {
                        return Some(BudgetDecision::TagExceeded {
                            tag: node.name.clone(),
                            period: tag_budget.period.clone(),
                        });
                    }
                }
            }
        }
        None
    }

    async fn read_counter(&self, key: &str) -> Decimal {
        match self.cache.get_string(key).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }
}

fn period_key(period: &str, at: DateTime<Utc>) -> String {
    match period {
        "daily" => at.format("%Y-%m-%d").to_string(),
        "monthly" => at.format("%Y-%m").to_string(),
        other => other.to_string(),
    }
}

fn recurring_window(period: &str, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    match period {
        "daily" => {
            let start = now.date_naive().and_hms_opt(0, 0, 0).unwrap();
            let end = now.date_naive().and_hms_milli_opt(23, 59, 59, 999).unwrap();
            (
                Utc.from_utc_datetime(&start),
                Utc.from_utc_datetime(&end),
            )
        }
        "monthly" => {
            let year = now.year();
            let month = now.month();
            let start = chrono::NaiveDate::from_ymd_opt(year, month, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            let (next_year, next_month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
            let end = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1)
                .unwrap()
                .and_hms_milli_opt(0, 0, 0, 0)
                .unwrap()
                - chrono::Duration::milliseconds(1);
            (
                Utc.from_utc_datetime(&start),
                Utc.from_utc_datetime(&end),
            )
        }
        _ => (now, now),
    }
}

impl From<BudgetDecision> for Option<GatewayError> {
    fn from(decision: BudgetDecision) -> Self {
        match decision {
            BudgetDecision::Allow => None,
            BudgetDecision::TenantExceeded { period } => Some(GatewayError::BudgetExceeded { period }),
            BudgetDecision::TagExceeded { tag, period } => {
                Some(GatewayError::TagBudgetExceeded { tag, period })
            }
            BudgetDecision::SessionExceeded => Some(GatewayError::SessionBudgetExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Session, Tag};
    use std::collections::HashMap;
    use std::str::FromStr;
    use tokio::sync::Mutex as AsyncMutex;

    struct InMemoryCache {
        values: AsyncMutex<HashMap<String, String>>,
    }

    impl InMemoryCache {
        fn new() -> Self {
            Self {
                values: AsyncMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CacheTier for InMemoryCache {
        async fn get_string(&self, key: &str) -> Result<Option<String>> {
            Ok(self.values.lock().await.get(key).cloned())
        }

        async fn set_string(&self, key: &str, value: &str, _ttl: Duration) -> Result<()> {
            self.values.lock().await.insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn incr_by(&self, _key: &str, amount: i64, _ttl: Duration) -> Result<i64> {
            Ok(amount)
        }

        async fn incr_by_decimal(&self, _key: &str, amount: Decimal, _ttl: Duration) -> Result<Decimal> {
            Ok(amount)
        }

        async fn set_if_absent(&self, key: &str, value: &str, _ttl: Duration) -> Result<bool> {
            let mut values = self.values.lock().await;
            if values.contains_key(key) {
                return Ok(false);
            }
            values.insert(key.to_string(), value.to_string());
            Ok(true)
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.values.lock().await.remove(key);
            Ok(())
        }
    }

    struct FakeBudgetRepo {
        tenant: Vec<Budget>,
        tag: Vec<TagBudget>,
    }

    #[async_trait::async_trait]
    impl crate::storage::BudgetRepository for FakeBudgetRepo {
        async fn active_for_tenant(&self, _tenant_id: i64) -> Result<Vec<Budget>> {
            Ok(self.tenant.clone())
        }

        async fn active_for_tag(&self, tag_id: i64) -> Result<Vec<TagBudget>> {
            Ok(self.tag.iter().filter(|b| b.tag_id == tag_id).cloned().collect())
        }
    }

    struct FakeTagRepo {
        tags: Vec<Tag>,
    }

    #[async_trait::async_trait]
    impl crate::storage::TagRepository for FakeTagRepo {
        async fn get_by_name(&self, _tenant_id: i64, name: &str) -> Result<Option<Tag>> {
            Ok(self.tags.iter().find(|t| t.name == name).cloned())
        }

        async fn get(&self, id: i64) -> Result<Option<Tag>> {
            Ok(self.tags.iter().find(|t| t.id == id).cloned())
        }

        async fn ancestors(&self, tag: &Tag) -> Result<Vec<Tag>> {
            let mut chain = Vec::new();
            let mut current = tag.parent_id;
            while let Some(id) = current {
                let Some(parent) = self.tags.iter().find(|t| t.id == id) else { break };
                chain.push(parent.clone());
                current = parent.parent_id;
            }
            Ok(chain)
        }

        async fn list_active_for_tenant(&self, tenant_id: i64) -> Result<Vec<Tag>> {
            Ok(self
                .tags
                .iter()
                .filter(|t| t.tenant_id == tenant_id && t.active)
                .cloned()
                .collect())
        }
    }

    fn evaluator(budgets: FakeBudgetRepo, tags: FakeTagRepo) -> BudgetEvaluator {
        let tags = Arc::new(tags);
        let budgets = Arc::new(budgets);
        let resolver = Arc::new(TagResolver::new(tags.clone(), budgets.clone(), Arc::new(InMemoryCache::new())));
        BudgetEvaluator::new(
            budgets,
            tags,
            resolver,
            Arc::new(InMemoryCache::new()),
            Decimal::from_str("100").unwrap(),
        )
    }

    #[tokio::test]
    async fn allows_when_nothing_spent() {
        let eval = evaluator(
            FakeBudgetRepo { tenant: vec![], tag: vec![] },
            FakeTagRepo { tags: vec![] },
        );
        let decision = eval.evaluate(1, &[], None, Utc::now()).await.unwrap();
        assert_eq!(decision, BudgetDecision::Allow);
    }

    #[tokio::test]
    async fn tenant_budget_blocks_once_spend_meets_ceiling() {
        let budgets = FakeBudgetRepo {
            tenant: vec![Budget {
                id: 1,
                tenant_id: 1,
                period: "daily".to_string(),
                amount_usd: Decimal::from_str("10").unwrap(),
                custom_start: None,
                custom_end: None,
                active: true,
            }],
            tag: vec![],
        };
        let eval = evaluator(budgets, FakeTagRepo { tags: vec![] });

        let now = Utc::now();
        let period_key = now.format("%Y-%m-%d").to_string();
        let key = keys::ledger(1, &period_key);
        eval.cache
            .set_string(&key, "10", Duration::from_secs(60))
            .await
            .unwrap();

        let decision = eval.evaluate(1, &[], None, now).await.unwrap();
        assert_eq!(decision, BudgetDecision::TenantExceeded { period: "daily".to_string() });
    }

    #[tokio::test]
    async fn session_budget_blocks_when_cost_meets_effective_ceiling() {
        let eval = evaluator(
            FakeBudgetRepo { tenant: vec![], tag: vec![] },
            FakeTagRepo { tags: vec![] },
        );
        let now = Utc::now();
        let session = Session {
            session_id: "sess-1".to_string(),
            tenant_id: 1,
            name: None,
            path: None,
            effective_budget_usd: Decimal::from_str("5").unwrap(),
            current_cost_usd: Decimal::from_str("5").unwrap(),
            status: "active".to_string(),
            created_at: now,
            last_active_at: now,
        };
        let decision = eval.evaluate(1, &[], Some(&session), Utc::now()).await.unwrap();
        assert_eq!(decision, BudgetDecision::SessionExceeded);
    }
}
