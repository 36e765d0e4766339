use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::domain::{
    ApiKeyHash, Budget, ModelPricing, RequestTag, Session, Tag, TagBudget, Tenant, UsageLedger,
};
use crate::domain::Result;

// Runtime-checked `sqlx::query`/`query_as` are used throughout instead of
// the `query!`/`query_as!` macros: those require a live `DATABASE_URL` or
// a committed `.sqlx` offline cache at compile time, neither of which
// this workspace carries.

#[async_trait::async_trait]
pub trait TenantRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Tenant>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Tenant>>;
}

#[async_trait::async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyHash>>;
    async fn touch_last_used(&self, id: i64, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BudgetRepository: Send + Sync {
    async fn active_for_tenant(&self, tenant_id: i64) -> Result<Vec<Budget>>;
    async fn active_for_tag(&self, tag_id: i64) -> Result<Vec<TagBudget>>;
}

#[async_trait::async_trait]
pub trait TagRepository: Send + Sync {
    async fn get_by_name(&self, tenant_id: i64, name: &str) -> Result<Option<Tag>>;
    async fn get(&self, id: i64) -> Result<Option<Tag>>;
    async fn ancestors(&self, tag: &Tag) -> Result<Vec<Tag>>;
    async fn list_active_for_tenant(&self, tenant_id: i64) -> Result<Vec<Tag>>;
}

#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;
    async fn upsert(&self, session: &Session) -> Result<()>;
    async fn add_cost(&self, session_id: &str, delta: Decimal) -> Result<()>;
}

#[async_trait::async_trait]
pub trait PricingRepository: Send + Sync {
    /// `provider` narrows the search when the caller already knows it
    /// (e.g. a re-price lookup); admission looks up by model alone and
    /// reads `ModelPricing.provider` off the result to route the call.
    async fn active_for_model(
        &self,
        provider: Option<&str>,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ModelPricing>>;
}

#[async_trait::async_trait]
pub trait UsageLedgerRepository: Send + Sync {
    async fn insert(&self, entry: &UsageLedger, tags: &[RequestTag]) -> Result<()>;
    async fn spent_since(
        &self,
        tenant_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Decimal>;
    async fn tag_spent_since(&self, tag_id: i64, since: DateTime<Utc>) -> Result<Decimal>;
}

#[derive(Clone)]
pub struct SqliteTenantRepository {
    pool: Pool<Sqlite>,
}

impl SqliteTenantRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TenantRepository for SqliteTenantRepository {
    async fn get(&self, id: i64) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, rate_limit_per_min, default_session_budget_usd FROM tenants WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, rate_limit_per_min, default_session_budget_usd FROM tenants WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }
}

#[derive(Clone)]
pub struct SqliteApiKeyRepository {
    pool: Pool<Sqlite>,
}

impl SqliteApiKeyRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ApiKeyRepository for SqliteApiKeyRepository {
    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyHash>> {
        let hash = sqlx::query_as::<_, ApiKeyHash>(
            r#"SELECT id, tenant_id, prefix, salt, secret_hash, active, last_used_at
               FROM api_key_hashes WHERE prefix = ?"#,
        )
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    async fn touch_last_used(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_key_hashes SET last_used_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SqliteBudgetRepository {
    pool: Pool<Sqlite>,
}

impl SqliteBudgetRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BudgetRepository for SqliteBudgetRepository {
    async fn active_for_tenant(&self, tenant_id: i64) -> Result<Vec<Budget>> {
        let budgets = sqlx::query_as::<_, Budget>(
            r#"SELECT id, tenant_id, period, amount_usd, custom_start, custom_end, active
               FROM budgets WHERE tenant_id = ? AND active = 1"#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(budgets)
    }

    async fn active_for_tag(&self, tag_id: i64) -> Result<Vec<TagBudget>> {
        let budgets = sqlx::query_as::<_, TagBudget>(
            r#"SELECT id, tag_id, period, amount_usd, weight, inheritance_mode,
                      custom_start, custom_end, alert_thresholds, active
               FROM tag_budgets WHERE tag_id = ? AND active = 1"#,
        )
        .bind(tag_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(budgets)
    }
}

#[derive(Clone)]
pub struct SqliteTagRepository {
    pool: Pool<Sqlite>,
}

impl SqliteTagRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TagRepository for SqliteTagRepository {
    async fn get_by_name(&self, tenant_id: i64, name: &str) -> Result<Option<Tag>> {
        let tag = sqlx::query_as::<_, Tag>(
            r#"SELECT id, tenant_id, name, parent_id, path, level, active, session_budget_usd
               FROM tags WHERE tenant_id = ? AND name = ?"#,
        )
        .bind(tenant_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tag)
    }

    async fn get(&self, id: i64) -> Result<Option<Tag>> {
        let tag = sqlx::query_as::<_, Tag>(
            r#"SELECT id, tenant_id, name, parent_id, path, level, active, session_budget_usd
               FROM tags WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tag)
    }

    /// Walk `parent_id` up to the root, nearest ancestor first.
    async fn ancestors(&self, tag: &Tag) -> Result<Vec<Tag>> {
        let mut chain = Vec::new();
        let mut current = tag.parent_id;
        while let Some(parent_id) = current {
            match self.get(parent_id).await? {
                Some(parent) => {
                    current = parent.parent_id;
                    chain.push(parent);
                }
                None => break,
            }
        }
        Ok(chain)
    }

    async fn list_active_for_tenant(&self, tenant_id: i64) -> Result<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>(
            r#"SELECT id, tenant_id, name, parent_id, path, level, active, session_budget_usd
               FROM tags WHERE tenant_id = ? AND active = 1"#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }
}

#[derive(Clone)]
pub struct SqliteSessionRepository {
    pool: Pool<Sqlite>,
}

impl SqliteSessionRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"SELECT session_id, tenant_id, name, path, effective_budget_usd,
                      current_cost_usd, status, created_at, last_active_at
               FROM sessions WHERE session_id = ?"#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn upsert(&self, session: &Session) -> Result<()> {
        info!("Upserting session: {}", session.session_id);
        sqlx::query(
            r#"INSERT INTO sessions
                (session_id, tenant_id, name, path, effective_budget_usd,
                 current_cost_usd, status, created_at, last_active_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(session_id) DO UPDATE SET
                 status = excluded.status,
                 last_active_at = excluded.last_active_at"#,
        )
        .bind(&session.session_id)
        .bind(session.tenant_id)
        .bind(&session.name)
        .bind(&session.path)
        .bind(session.effective_budget_usd)
        .bind(session.current_cost_usd)
        .bind(&session.status)
        .bind(session.created_at)
        .bind(session.last_active_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_cost(&self, session_id: &str, delta: Decimal) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET current_cost_usd = current_cost_usd + ?, last_active_at = ? WHERE session_id = ?",
        )
        .bind(delta)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SqlitePricingRepository {
    pool: Pool<Sqlite>,
}

impl SqlitePricingRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PricingRepository for SqlitePricingRepository {
    async fn active_for_model(
        &self,
        provider: Option<&str>,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ModelPricing>> {
        let pricing = match provider {
            Some(provider) => {
                sqlx::query_as::<_, ModelPricing>(
                    r#"SELECT id, model, provider, version_tag, input_price_per_million,
                              cached_input_price_per_million, output_price_per_million,
                              effective_from, effective_to
                       FROM model_pricing
                       WHERE model = ? AND provider = ? AND effective_from <= ?
                         AND (effective_to IS NULL OR effective_to >= ?)
                       ORDER BY effective_from DESC LIMIT 1"#,
                )
                .bind(model)
                .bind(provider)
                .bind(at)
                .bind(at)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ModelPricing>(
                    r#"SELECT id, model, provider, version_tag, input_price_per_million,
                              cached_input_price_per_million, output_price_per_million,
                              effective_from, effective_to
                       FROM model_pricing
                       WHERE model = ? AND effective_from <= ?
                         AND (effective_to IS NULL OR effective_to >= ?)
                       ORDER BY effective_from DESC LIMIT 1"#,
                )
                .bind(model)
                .bind(at)
                .bind(at)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(pricing)
    }
}

#[derive(Clone)]
pub struct SqliteUsageLedgerRepository {
    pool: Pool<Sqlite>,
}

impl SqliteUsageLedgerRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UsageLedgerRepository for SqliteUsageLedgerRepository {
    async fn insert(&self, entry: &UsageLedger, tags: &[RequestTag]) -> Result<()> {
        info!("Recording usage ledger entry: id={}", entry.id);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO usage_ledger
                (id, tenant_id, api_key_id, session_id, provider, model,
                 input_tokens, cached_tokens, output_tokens, cost_usd, status,
                 latency_ms, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(entry.api_key_id)
        .bind(&entry.session_id)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(entry.input_tokens)
        .bind(entry.cached_tokens)
        .bind(entry.output_tokens)
        .bind(entry.cost_usd)
        .bind(&entry.status)
        .bind(entry.latency_ms)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        for tag in tags {
            sqlx::query(
                r#"INSERT INTO request_tags (usage_ledger_id, tag_id, weight, attributed_cost_usd)
                   VALUES (?, ?, ?, ?)"#,
            )
            .bind(tag.usage_ledger_id)
            .bind(tag.tag_id)
            .bind(tag.weight)
            .bind(tag.attributed_cost_usd)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn spent_since(&self, tenant_id: i64, since: DateTime<Utc>) -> Result<Decimal> {
        let row: Option<(Decimal,)> = sqlx::query_as(
            "SELECT COALESCE(SUM(cost_usd), 0) FROM usage_ledger WHERE tenant_id = ? AND created_at >= ?",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(sum,)| sum).unwrap_or(Decimal::ZERO))
    }

    async fn tag_spent_since(&self, tag_id: i64, since: DateTime<Utc>) -> Result<Decimal> {
        let row: Option<(Decimal,)> = sqlx::query_as(
            r#"SELECT COALESCE(SUM(rt.attributed_cost_usd), 0)
               FROM request_tags rt
               JOIN usage_ledger ul ON ul.id = rt.usage_ledger_id
               WHERE rt.tag_id = ? AND ul.created_at >= ?"#,
        )
        .bind(tag_id)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(sum,)| sum).unwrap_or(Decimal::ZERO))
    }
}
