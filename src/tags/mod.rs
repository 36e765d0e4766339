//! Name-set → validated tag IDs with weights, and the ancestor walk
//! budget evaluation needs for inheritance (spec §4.5).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::warn;

use crate::cache::{keys, CacheTier};
use crate::domain::{GatewayError, ResolvedTag, Result, Tag};
use crate::storage::{BudgetRepository, TagRepository};

const TAGSET_TTL: Duration = Duration::from_secs(120);
const TENANT_TAGS_TTL: Duration = Duration::from_secs(300);

pub struct TagResolver {
    repo: Arc<dyn TagRepository>,
    budgets: Arc<dyn BudgetRepository>,
    cache: Arc<dyn CacheTier>,
}

impl TagResolver {
    pub fn new(repo: Arc<dyn TagRepository>, budgets: Arc<dyn BudgetRepository>, cache: Arc<dyn CacheTier>) -> Self {
        Self { repo, budgets, cache }
    }

    /// The active `TagBudget.weight` for a tag, or `1.0` when the tag
    /// carries no budget row (spec §3's stated default).
    async fn weight_for(&self, tag_id: i64) -> Decimal {
        match self.budgets.active_for_tag(tag_id).await {
            Ok(budgets) => budgets.first().map(|b| b.weight).unwrap_or(Decimal::ONE),
            Err(e) => {
                warn!(error = %e, tag_id, "tag budget weight lookup failed, defaulting to 1.0");
                Decimal::ONE
            }
        }
    }

    /// Resolve a client-supplied comma-separated tag list to validated
    /// `{id, name, weight}` triples, or `TagValidationError` naming every
    /// tag unknown to this tenant.
    pub async fn resolve(&self, tenant_id: i64, names: &[String]) -> Result<Vec<ResolvedTag>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut sorted = names.to_vec();
        sorted.sort();
        let csv = sorted.join(",");
        let tagset_key = keys::tagset(tenant_id, &csv);

        if let Some(cached) = self.cache.get_string(&tagset_key).await? {
            if let Ok(resolved) = serde_json::from_str::<Vec<ResolvedTag>>(&cached) {
                return Ok(resolved);
            }
        }

        let active_tags = self.active_tenant_tags(tenant_id).await?;
        let by_name: std::collections::HashMap<&str, &Tag> =
            active_tags.iter().map(|t| (t.name.as_str(), t)).collect();

        let requested: HashSet<&str> = names.iter().map(|s| s.as_str()).collect();
        let missing: Vec<&str> = requested
            .iter()
            .filter(|n| !by_name.contains_key(*n))
            .copied()
            .collect();

        if !missing.is_empty() {
            return Err(GatewayError::TagValidationError(missing.join(", ")));
        }

        let matched: Vec<&Tag> = names.iter().filter_map(|n| by_name.get(n.as_str())).copied().collect();
        let mut resolved = Vec::with_capacity(matched.len());
        for t in matched {
            resolved.push(ResolvedTag {
                id: t.id,
                name: t.name.clone(),
                weight: self.weight_for(t.id).await,
            });
        }

        if let Ok(json) = serde_json::to_string(&resolved) {
            let _ = self.cache.set_string(&tagset_key, &json, TAGSET_TTL).await;
        }

        Ok(resolved)
    }

    async fn active_tenant_tags(&self, tenant_id: i64) -> Result<Vec<Tag>> {
        let key = keys::tags_tenant(tenant_id);
        if let Some(cached) = self.cache.get_string(&key).await? {
            if let Ok(tags) = serde_json::from_str::<Vec<Tag>>(&cached) {
                return Ok(tags);
            }
        }

        let tags = self.repo.list_active_for_tenant(tenant_id).await?;

        if let Ok(json) = serde_json::to_string(&tags) {
            let _ = self.cache.set_string(&key, &json, TENANT_TAGS_TTL).await;
        }
        Ok(tags)
    }

    /// Walk a tag's ancestor chain to the root, nearest first, used by
    /// the budget evaluator's inheritance walk.
    pub async fn ancestors(&self, tag: &Tag) -> Result<Vec<Tag>> {
        match self.repo.ancestors(tag).await {
            Ok(chain) => Ok(chain),
            Err(e) => {
                warn!(error = %e, tag_id = tag.id, "tag ancestor walk failed, fail-open");
                Ok(Vec::new())
            }
        }
    }

    pub async fn tag_by_id(&self, id: i64) -> Result<Option<Tag>> {
        self.repo.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCacheTier;
    use async_trait::async_trait;

    struct FakeTagRepo {
        tags: Vec<Tag>,
    }

    #[async_trait]
    impl TagRepository for FakeTagRepo {
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

    struct FakeBudgetRepo {
        tag_budgets: Vec<crate::domain::TagBudget>,
    }

    #[async_trait]
    impl BudgetRepository for FakeBudgetRepo {
        async fn active_for_tenant(&self, _tenant_id: i64) -> Result<Vec<crate::domain::Budget>> {
            Ok(Vec::new())
        }

        async fn active_for_tag(&self, tag_id: i64) -> Result<Vec<crate::domain::TagBudget>> {
            Ok(self.tag_budgets.iter().filter(|b| b.tag_id == tag_id).cloned().collect())
        }
    }

    fn no_budgets() -> Arc<FakeBudgetRepo> {
        Arc::new(FakeBudgetRepo { tag_budgets: vec![] })
    }

    fn tag(id: i64, name: &str, parent_id: Option<i64>) -> Tag {
        Tag {
            id,
            tenant_id: 1,
            name: name.to_string(),
            parent_id,
            path: name.to_string(),
            level: 0,
            active: true,
            session_budget_usd: None,
        }
    }

    #[tokio::test]
    async fn resolves_known_tags_to_ids() {
        let repo = Arc::new(FakeTagRepo {
            tags: vec![tag(1, "eng", None), tag(2, "ml", Some(1))],
        });
        let resolver = TagResolver::new(repo, no_budgets(), Arc::new(NoopCacheTier));

        let resolved = resolver
            .resolve(1, &["eng".to_string(), "ml".to_string()])
            .await
            .unwrap();

        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().any(|t| t.id == 1 && t.name == "eng"));
        assert!(resolved.iter().any(|t| t.id == 2 && t.name == "ml"));
    }

    #[tokio::test]
    async fn rejects_unknown_tag_names() {
        let repo = Arc::new(FakeTagRepo {
            tags: vec![tag(1, "eng", None)],
        });
        let resolver = TagResolver::new(repo, no_budgets(), Arc::new(NoopCacheTier));

        let err = resolver
            .resolve(1, &["eng".to_string(), "nonexistent".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::TagValidationError(_)));
    }

    #[tokio::test]
    async fn ancestors_walk_to_root_nearest_first() {
        let repo = Arc::new(FakeTagRepo {
            tags: vec![tag(1, "org", None), tag(2, "eng", Some(1)), tag(3, "ml", Some(2))],
        });
        let resolver = TagResolver::new(repo, no_budgets(), Arc::new(NoopCacheTier));

        let leaf = resolver.tag_by_id(3).await.unwrap().unwrap();
        let chain = resolver.ancestors(&leaf).await.unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name, "eng");
        assert_eq!(chain[1].name, "org");
    }

    #[tokio::test]
    async fn resolved_weight_comes_from_the_active_tag_budget() {
        let repo = Arc::new(FakeTagRepo {
            tags: vec![tag(1, "eng", None), tag(2, "ml", None)],
        });
        let budgets = Arc::new(FakeBudgetRepo {
            tag_budgets: vec![crate::domain::TagBudget {
                id: 1,
                tag_id: 2,
                period: "monthly".to_string(),
                amount_usd: Decimal::from(1000),
                weight: Decimal::new(15, 1), // 1.5
                inheritance_mode: "LENIENT".to_string(),
                custom_start: None,
                custom_end: None,
                alert_thresholds: serde_json::Value::Null,
                active: true,
            }],
        });
        let resolver = TagResolver::new(repo, budgets, Arc::new(NoopCacheTier));

        let resolved = resolver
            .resolve(1, &["eng".to_string(), "ml".to_string()])
            .await
            .unwrap();

        let eng = resolved.iter().find(|t| t.name == "eng").unwrap();
        let ml = resolved.iter().find(|t| t.name == "ml").unwrap();
        assert_eq!(eng.weight, Decimal::ONE);
        assert_eq!(ml.weight, Decimal::new(15, 1));
    }

    #[tokio::test]
    async fn empty_name_list_resolves_to_empty_without_a_repo_call() {
        let repo = Arc::new(FakeTagRepo { tags: vec![] });
        let resolver = TagResolver::new(repo, no_budgets(), Arc::new(NoopCacheTier));
        let resolved = resolver.resolve(1, &[]).await.unwrap();
        assert!(resolved.is_empty());
    }
}
