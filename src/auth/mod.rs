//! Bearer-token authentication against the hashed API-key store, with
//! a short-lived in-process cache in front of the database so a hot
//! key doesn't cost a query per request (spec §4.1 step 1).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::domain::{ApiKeyHash, GatewayError, Result};
use crate::storage::ApiKeyRepository;

/// Resolved identity for an authenticated request.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub tenant_id: i64,
    pub api_key_id: i64,
}

struct CachedHash {
    hash: ApiKeyHash,
    expires_at: Instant,
}

/// In-process TTL cache keyed by the 8-char lookup prefix, backed by
/// whichever [`ApiKeyRepository`] the gateway was wired with.
pub struct AuthCache {
    repo: Arc<dyn ApiKeyRepository>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedHash>>,
}

impl AuthCache {
    pub fn new(repo: Arc<dyn ApiKeyRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn lookup(&self, prefix: &str) -> Result<Option<ApiKeyHash>> {
        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(prefix) {
                if cached.expires_at > Instant::now() {
                    return Ok(Some(cached.hash.clone()));
                }
            }
        }

        let hash = self.repo.find_by_prefix(prefix).await?;
        if let Some(ref hash) = hash {
            let mut entries = self.entries.write().await;
            entries.insert(
                prefix.to_string(),
                CachedHash {
                    hash: hash.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
        Ok(hash)
    }

    pub fn invalidate_blocking(&self, prefix: &str) {
        if let Ok(mut entries) = self.entries.try_write() {
            entries.remove(prefix);
        }
    }
}

/// Extract the bearer secret from an `Authorization` header value and
/// resolve it to an [`AuthContext`], fail-closed on any ambiguity.
pub async fn authenticate(
    authorization_header: Option<&str>,
    cache: &AuthCache,
) -> Result<AuthContext> {
    let secret = authorization_header
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(GatewayError::Unauthenticated)?;

    let prefix = crate::domain::api_key::lookup_prefix(secret)?;
    let hash = cache
        .lookup(prefix)
        .await?
        .ok_or(GatewayError::Unauthenticated)?;

    if !hash.verify(secret) {
        return Err(GatewayError::Unauthenticated);
    }

    Ok(AuthContext {
        tenant_id: hash.tenant_id,
        api_key_id: hash.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ApiKey;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::Mutex;

    struct FakeRepo {
        hashes: Mutex<Vec<ApiKeyHash>>,
    }

    #[async_trait]
    impl ApiKeyRepository for FakeRepo {
        async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ApiKeyHash>> {
            let hashes = self.hashes.lock().await;
            Ok(hashes.iter().find(|h| h.prefix == prefix).cloned())
        }

        async fn touch_last_used(&self, _id: i64, _at: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn authenticates_valid_bearer_token() {
        let (key, mut hash) = ApiKey::generate(7);
        hash.id = 1;
        let secret = key.secret.unwrap();
        let repo = Arc::new(FakeRepo {
            hashes: Mutex::new(vec![hash]),
        });
        let cache = AuthCache::new(repo, Duration::from_secs(60));

        let header = format!("Bearer {}", secret);
        let ctx = authenticate(Some(&header), &cache).await.unwrap();
        assert_eq!(ctx.tenant_id, 7);
        assert_eq!(ctx.api_key_id, 1);
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let repo = Arc::new(FakeRepo {
            hashes: Mutex::new(vec![]),
        });
        let cache = AuthCache::new(repo, Duration::from_secs(60));
        let err = authenticate(None, &cache).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
    }

    #[tokio::test]
    async fn rejects_unknown_key() {
        let repo = Arc::new(FakeRepo {
            hashes: Mutex::new(vec![]),
        });
        let cache = AuthCache::new(repo, Duration::from_secs(60));
        let header = "Bearer aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let err = authenticate(Some(header), &cache).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
    }
}
