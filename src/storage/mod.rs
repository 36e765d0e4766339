pub mod database;
pub mod repository;

pub use database::{DatabaseConfig, DatabasePool, DatabaseType, PoolStats};
pub use repository::{
    ApiKeyRepository, BudgetRepository, PricingRepository, SessionRepository,
    SqliteApiKeyRepository, SqliteBudgetRepository, SqlitePricingRepository,
    SqliteSessionRepository, SqliteTagRepository, SqliteTenantRepository,
    SqliteUsageLedgerRepository, TagRepository, TenantRepository, UsageLedgerRepository,
};
