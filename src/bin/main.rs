use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use ratewarden::admission::AdmissionPipeline;
use ratewarden::api::{build_router, AppState};
use ratewarden::auth::AuthCache;
use ratewarden::budget::BudgetEvaluator;
use ratewarden::cache::{CacheTier, RedisCacheTier};
use ratewarden::config::AppConfig;
use ratewarden::domain::{GatewayError, Provider};
use ratewarden::ledger::{LedgerWorker, LedgerWriter};
use ratewarden::observability::{
    init_metrics, init_tracing, CacheHealthCheck, DatabaseHealthCheck, HealthChecker, ObservabilityConfig,
};
use ratewarden::policy::{AllowAllPolicy, PolicyEngine};
use ratewarden::provider::{AnthropicClient, GoogleClient, OpenAiClient, ProviderClient, ProviderRouter};
use ratewarden::ratelimit::RateLimiter;
use ratewarden::session::SessionTracker;
use ratewarden::storage::{
    DatabaseConfig, DatabasePool, SqliteApiKeyRepository, SqliteBudgetRepository,
    SqlitePricingRepository, SqliteSessionRepository, SqliteTagRepository,
    SqliteTenantRepository, SqliteUsageLedgerRepository,
};
use ratewarden::tags::TagResolver;

#[derive(Parser, Debug)]
#[command(name = "ratewarden", about = "FinOps control plane for LLM APIs")]
struct Args {
    /// Path to the TOML configuration file. Missing is fine; environment
    /// variables and defaults still apply.
    #[arg(long, env = "RATEWARDEN_CONFIG", default_value = "ratewarden.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;

    init_tracing(&ObservabilityConfig::from_logging(&config.logging.level, config.logging.json).tracing)
        .map_err(|e| GatewayError::config(e))?;

    tracing::info!(config_path = %args.config, "starting ratewarden");

    let observability = ObservabilityConfig::default();
    if let Err(e) = init_metrics(&observability.metrics) {
        tracing::warn!(error = %e, "metrics exporter failed to start; continuing without it");
    }

    let db_config = if config.database.url.starts_with("postgres") {
        DatabaseConfig::postgres(config.database.url.clone())
    } else {
        DatabaseConfig::sqlite(config.database.url.clone())
    };
    let db = DatabasePool::new(&db_config).await?;
    db.run_migrations().await?;

    // The cache tier degrades to a no-op without Redis, but the usage ledger
    // streams through Redis directly and has no degraded mode: without it
    // there is nowhere to record spend, so we fail fast at startup instead
    // of accepting traffic we can't account for.
    let redis_url = config.redis.url.as_deref().ok_or_else(|| {
        GatewayError::config("redis.url is required: the usage ledger stream has no degraded mode")
    })?;
    let cache: Arc<dyn CacheTier> = Arc::new(RedisCacheTier::connect(redis_url).await?);

    let pool = db.pool_sqlite().ok_or_else(|| {
        GatewayError::config("postgres runtime wiring is not implemented in this binary yet")
    })?;

    let tenants = Arc::new(SqliteTenantRepository::new(pool.clone()));
    let api_keys = Arc::new(SqliteApiKeyRepository::new(pool.clone()));
    let budgets_repo = Arc::new(SqliteBudgetRepository::new(pool.clone()));
    let tags_repo = Arc::new(SqliteTagRepository::new(pool.clone()));
    let sessions_repo = Arc::new(SqliteSessionRepository::new(pool.clone()));
    let pricing_repo = Arc::new(SqlitePricingRepository::new(pool.clone()));
    let ledger_repo = Arc::new(SqliteUsageLedgerRepository::new(pool.clone()));

    let auth_cache = Arc::new(AuthCache::new(api_keys, Duration::from_secs(30)));
    let tag_resolver = Arc::new(TagResolver::new(tags_repo.clone(), budgets_repo.clone(), cache.clone()));
    let session_tracker = Arc::new(SessionTracker::new(sessions_repo, cache.clone()));
    let budget_evaluator = Arc::new(BudgetEvaluator::new(
        budgets_repo,
        tags_repo,
        tag_resolver.clone(),
        cache.clone(),
        config.budgets.default_budget_usd,
    ));
    let rate_limiter = Arc::new(RateLimiter::new(tenants.clone(), cache.clone(), config.budgets.max_reqs_per_min));

    let policy: Arc<dyn PolicyEngine> = Arc::new(AllowAllPolicy);

    let mut clients: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
    clients.insert(
        Provider::OpenAI,
        Arc::new(OpenAiClient::new(
            config.providers.openai_api_key.clone(),
            Duration::from_secs(30),
            config.providers.openai_base_url.as_deref(),
        )?),
    );
    clients.insert(
        Provider::Anthropic,
        Arc::new(AnthropicClient::new(
            config.providers.anthropic_api_key.clone(),
            Duration::from_secs(30),
            config.providers.anthropic_base_url.as_deref(),
        )?),
    );
    clients.insert(
        Provider::Google,
        Arc::new(GoogleClient::new(
            config.providers.google_api_key.clone(),
            Duration::from_secs(30),
            config.providers.google_base_url.as_deref(),
        )?),
    );
    let router = Arc::new(ProviderRouter::new(clients));

    let redis_client = redis::Client::open(redis_url)?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client.clone()).await?;
    let ledger_writer = Arc::new(LedgerWriter::new(cache.clone(), redis_conn, session_tracker.clone(), pricing_repo.clone()));

    let admission = Arc::new(AdmissionPipeline::new(
        auth_cache,
        tenants,
        tag_resolver,
        session_tracker,
        budget_evaluator,
        rate_limiter,
        policy,
        router,
        pricing_repo,
        ledger_writer,
    ));

    let health = Arc::new(
        HealthChecker::new()
            .register(Arc::new(DatabaseHealthCheck::new(db.clone())))
            .register(Arc::new(CacheHealthCheck::new(cache.clone()))),
    );

    let worker = LedgerWorker::new(redis_client, cache, ledger_repo, "worker-1".to_string());
    tokio::spawn(async move {
        if let Err(e) = worker.run().await {
            tracing::error!(error = %e, "ledger worker exited");
        }
    });

    let state = AppState { admission, health };
    let app = build_router(state);

    let addr = format!("{}:{}", config.http.bind, config.http.port);
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
