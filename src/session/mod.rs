//! Get-or-create session resolution, effective-budget computation, and
//! atomic cost increment (spec §4.5).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;

use crate::cache::{keys, CacheTier};
use crate::domain::{Result, Session, SessionStatus, Tag};
use crate::storage::SessionRepository;

const SESSION_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct SessionTracker {
    repo: Arc<dyn SessionRepository>,
    cache: Arc<dyn CacheTier>,
}

impl SessionTracker {
    pub fn new(repo: Arc<dyn SessionRepository>, cache: Arc<dyn CacheTier>) -> Self {
        Self { repo, cache }
    }

    /// Resolve or create the session for `session_id`, computing its
    /// effective budget from the lowest `session_budget_usd` among
    /// `tags`, falling back to `tenant_default_budget`. The effective
    /// budget is recomputed against the tags passed on *this* call every
    /// time, not just at creation, and written through when it moves —
    /// a tag's session budget can change after the session was first
    /// opened (spec §4.5 step 2).
    pub async fn get_or_create(
        &self,
        session_id: &str,
        tenant_id: i64,
        name: Option<String>,
        path: Option<String>,
        tags: &[Tag],
        tenant_default_budget: Option<Decimal>,
    ) -> Result<Session> {
        let effective_budget = tags
            .iter()
            .filter_map(|t| t.session_budget_usd)
            .min()
            .or(tenant_default_budget)
            .unwrap_or(Decimal::ZERO);

        if let Some(mut session) = self.lookup(session_id).await? {
            if session.effective_budget_usd != effective_budget {
                session.effective_budget_usd = effective_budget;
                self.repo.upsert(&session).await?;
                self.prime_cache(&session).await;
            }
            return Ok(session);
        }

        let now = Utc::now();
        let session = Session {
            session_id: session_id.to_string(),
            tenant_id,
            name,
            path,
            effective_budget_usd: effective_budget,
            current_cost_usd: Decimal::ZERO,
            status: SessionStatus::Active.as_str().to_string(),
            created_at: now,
            last_active_at: now,
        };

        self.repo.upsert(&session).await?;
        self.prime_cache(&session).await;
        Ok(session)
    }

    async fn lookup(&self, session_id: &str) -> Result<Option<Session>> {
        let key = keys::session(session_id);
        if let Some(cached) = self.cache.get_string(&key).await? {
            if let Ok(mut session) = serde_json::from_str::<Session>(&cached) {
                session.current_cost_usd = self.current_cost(session_id, session.current_cost_usd).await;
                return Ok(Some(session));
            }
        }

        let session = self.repo.get(session_id).await?;
        if let Some(ref session) = session {
            self.prime_cache(session).await;
        }
        Ok(session)
    }

    async fn current_cost(&self, session_id: &str, db_fallback: Decimal) -> Decimal {
        let key = keys::session_cost(session_id);
        match self.cache.get_string(&key).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(db_fallback),
            _ => db_fallback,
        }
    }

    async fn prime_cache(&self, session: &Session) {
        let key = keys::session(&session.session_id);
        if let Ok(json) = serde_json::to_string(session) {
            let _ = self.cache.set_string(&key, &json, SESSION_CACHE_TTL).await;
        }
        let cost_key = keys::session_cost(&session.session_id);
        let _ = self
            .cache
            .set_string(&cost_key, &session.current_cost_usd.to_string(), SESSION_CACHE_TTL)
            .await;
    }

    /// Atomically add `delta` to the session's cost counter. The cache
    /// tier is authoritative for admission; the DB write is best-effort.
    pub async fn increment_cost(&self, session_id: &str, delta: Decimal) -> Result<()> {
        let key = keys::session_cost(session_id);
        if let Err(e) = self.cache.incr_by_decimal(&key, delta, SESSION_CACHE_TTL).await {
            warn!(error = %e, session_id, "session cost cache increment failed, falling back to DB");
        }

        if let Err(e) = self.repo.add_cost(session_id, delta).await {
            warn!(error = %e, session_id, "session cost DB write failed");
        }
        Ok(())
    }

    /// Mark a session `budget_exceeded`, write-through to cache and DB.
    pub async fn mark_exceeded(&self, session: &mut Session) -> Result<()> {
        session.status = SessionStatus::BudgetExceeded.as_str().to_string();
        self.repo.upsert(session).await?;
        self.prime_cache(session).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeSessionRepo {
        sessions: Mutex<Vec<Session>>,
    }

    #[async_trait]
    impl SessionRepository for FakeSessionRepo {
        async fn get(&self, session_id: &str) -> Result<Option<Session>> {
            Ok(self.sessions.lock().await.iter().find(|s| s.session_id == session_id).cloned())
        }

        async fn upsert(&self, session: &Session) -> Result<()> {
            let mut sessions = self.sessions.lock().await;
            sessions.retain(|s| s.session_id != session.session_id);
            sessions.push(session.clone());
            Ok(())
        }

        async fn add_cost(&self, session_id: &str, delta: Decimal) -> Result<()> {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.iter_mut().find(|s| s.session_id == session_id) {
                session.current_cost_usd += delta;
            }
            Ok(())
        }
    }

    fn tag_with_budget(id: i64, budget: Option<Decimal>) -> Tag {
        Tag {
            id,
            tenant_id: 1,
            name: format!("tag-{}", id),
            parent_id: None,
            path: format!("tag-{}", id),
            level: 0,
            active: true,
            session_budget_usd: budget,
        }
    }

    #[tokio::test]
    async fn creates_session_with_lowest_tag_budget() {
        let repo = Arc::new(FakeSessionRepo::default());
        let cache = Arc::new(crate::cache::NoopCacheTier);
        let tracker = SessionTracker::new(repo, cache);

        let tags = vec![tag_with_budget(1, Some(dec!(20))), tag_with_budget(2, Some(dec!(5)))];
        let session = tracker
            .get_or_create("sess-1", 1, None, None, &tags, Some(dec!(100)))
            .await
            .unwrap();

        assert_eq!(session.effective_budget_usd, dec!(5));
        assert_eq!(session.current_cost_usd, Decimal::ZERO);
    }

    #[tokio::test]
    async fn falls_back_to_tenant_default_without_tag_budgets() {
        let repo = Arc::new(FakeSessionRepo::default());
        let cache = Arc::new(crate::cache::NoopCacheTier);
        let tracker = SessionTracker::new(repo, cache);

        let session = tracker
            .get_or_create("sess-2", 1, None, None, &[], Some(dec!(50)))
            .await
            .unwrap();

        assert_eq!(session.effective_budget_usd, dec!(50));
    }

    #[tokio::test]
    async fn effective_budget_is_recomputed_on_every_lookup() {
        let repo = Arc::new(FakeSessionRepo::default());
        let cache = Arc::new(crate::cache::NoopCacheTier);
        let tracker = SessionTracker::new(repo.clone(), cache);

        let first_tags = vec![tag_with_budget(1, Some(dec!(20)))];
        let created = tracker
            .get_or_create("sess-4", 1, None, None, &first_tags, None)
            .await
            .unwrap();
        assert_eq!(created.effective_budget_usd, dec!(20));

        let tighter_tags = vec![tag_with_budget(1, Some(dec!(20))), tag_with_budget(2, Some(dec!(3)))];
        let updated = tracker
            .get_or_create("sess-4", 1, None, None, &tighter_tags, None)
            .await
            .unwrap();

        assert_eq!(updated.effective_budget_usd, dec!(3));
        let stored = repo.get("sess-4").await.unwrap().unwrap();
        assert_eq!(stored.effective_budget_usd, dec!(3));
    }

    #[tokio::test]
    async fn repeated_lookup_returns_the_same_session() {
        let repo = Arc::new(FakeSessionRepo::default());
        let cache = Arc::new(crate::cache::NoopCacheTier);
        let tracker = SessionTracker::new(repo, cache);

        let first = tracker.get_or_create("sess-3", 1, None, None, &[], None).await.unwrap();
        let second = tracker.get_or_create("sess-3", 1, None, None, &[], None).await.unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.created_at, second.created_at);
    }
}
