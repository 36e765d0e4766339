//! Stable Redis key layout shared by every cache-tier consumer (spec §6).

pub fn budget(tenant_id: i64, period: &str) -> String {
    format!("budget:{}:{}", tenant_id, period)
}

pub fn ledger(tenant_id: i64, period_key: &str) -> String {
    format!("ledger:{}:{}", tenant_id, period_key)
}

pub fn ledger_tag(tenant_id: i64, tag_id: i64, period_key: &str) -> String {
    format!("ledger:{}:tag:{}:{}", tenant_id, tag_id, period_key)
}

pub fn rate_limit(tenant_id: i64, window_start_minute: i64) -> String {
    format!("ratelimit:{}:{}", tenant_id, window_start_minute)
}

pub fn session(session_id: &str) -> String {
    format!("session:{}", session_id)
}

pub fn session_cost(session_id: &str) -> String {
    format!("session_cost:{}", session_id)
}

pub fn tags_tenant(tenant_id: i64) -> String {
    format!("tags:tenant:{}", tenant_id)
}

pub fn tagset(tenant_id: i64, sorted_csv: &str) -> String {
    format!("tagset:{}:{}", tenant_id, sorted_csv)
}

pub fn tag_usage_stream(tenant_id: i64) -> String {
    format!("tag_usage_stream:{}", tenant_id)
}

pub fn tag_usage_zset(tenant_id: i64, tag_id: i64, period: &str) -> String {
    format!("tag_usage_zset:{}:{}:{}", tenant_id, tag_id, period)
}

pub fn tag_usage_agg(tenant_id: i64, tag_id: i64, period_key: &str) -> String {
    format!("tag_usage_agg:{}:{}:{}", tenant_id, tag_id, period_key)
}

pub fn tag_usage_rt(tenant_id: i64, tag_id: i64) -> String {
    format!("tag_usage_rt:{}:{}", tenant_id, tag_id)
}

pub fn idempotency(usage_ledger_id: &str, tag_id: i64) -> String {
    format!("tag_usage_event:{}:{}", usage_ledger_id, tag_id)
}
