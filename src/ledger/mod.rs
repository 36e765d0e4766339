//! Post-response accounting (`LedgerWriter`) and the background stream
//! consumer that drains it into the relational ledger (`LedgerWorker`),
//! per spec §4.4 and §4.7.

pub mod events;

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{exponential::ExponentialBackoff, SystemClock};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::streams::StreamReadOptions;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{keys, CacheTier};
use crate::domain::{tiered_variant, GatewayError, RequestTag, ResolvedTag, Result, UsageLedger};
use crate::session::SessionTracker;
use crate::storage::{PricingRepository, UsageLedgerRepository};

use events::{EventTag, UsageEvent};

const STREAM_KEY: &str = "bg_events";
const IDEMPOTENCY_TTL: Duration = Duration::from_millis(86_400_000);
const EVENT_MARKER_TAG_ID: i64 = -1;

pub struct LedgerWriter {
    cache: Arc<dyn CacheTier>,
    redis: ConnectionManager,
    sessions: Arc<SessionTracker>,
    pricing: Arc<dyn PricingRepository>,
}

pub struct UsageOutcome {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub cached_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub latency_ms: i64,
    pub status: String,
}

impl LedgerWriter {
    pub fn new(
        cache: Arc<dyn CacheTier>,
        redis: ConnectionManager,
        sessions: Arc<SessionTracker>,
        pricing: Arc<dyn PricingRepository>,
    ) -> Self {
        Self {
            cache,
            redis,
            sessions,
            pricing,
        }
    }

    /// Compute cost, emit exactly one durable event, then increment every
    /// affected counter. The stream write precedes the counter increments
    /// so a crash in between is safely replayable from the stream.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        tenant_id: i64,
        api_key_id: i64,
        route: &str,
        session_id: Option<&str>,
        tags: &[ResolvedTag],
        outcome: UsageOutcome,
    ) -> Result<()> {
        let now = Utc::now();
        let (model, pricing) = self.resolve_pricing(&outcome.provider, &outcome.model, outcome.total_tokens, now).await?;

        let cost = pricing.cost_for(
            outcome.prompt_tokens as u64,
            outcome.cached_tokens as u64,
            outcome.completion_tokens as u64,
        );

        let usage_ledger_id = Uuid::new_v4();
        let event_tags: Vec<EventTag> = tags
            .iter()
            .map(|t| EventTag {
                id: t.id,
                name: t.name.clone(),
                weight: t.weight,
                attributed_cost_usd: cost * t.weight,
            })
            .collect();

        let event = UsageEvent {
            usage_ledger_id,
            ts: now,
            tenant_id,
            api_key_id,
            route: route.to_string(),
            provider: outcome.provider,
            model,
            session_id: session_id.map(|s| s.to_string()),
            usd: format!("{:.6}", cost),
            prompt_tokens: outcome.prompt_tokens,
            cached_tokens: outcome.cached_tokens,
            completion_tokens: outcome.completion_tokens,
            latency_ms: outcome.latency_ms,
            status: outcome.status,
            tags: event_tags,
        };

        self.emit(&event).await?;
        self.increment_counters(&event, cost).await;

        if let Some(session_id) = session_id {
            self.sessions.increment_cost(session_id, cost).await?;
        }

        Ok(())
    }

    /// Try the long-context suffix variant first when the call crosses
    /// the token threshold; fall back to the base model id when no
    /// tiered price row exists for it (spec §4.4 step 4, §8 scenario 5).
    async fn resolve_pricing(
        &self,
        provider: &str,
        base_model: &str,
        total_tokens: i64,
        at: chrono::DateTime<Utc>,
    ) -> Result<(String, crate::domain::ModelPricing)> {
        if let Some(variant) = tiered_variant(base_model, total_tokens) {
            if let Some(pricing) = self.pricing.active_for_model(Some(provider), &variant, at).await? {
                return Ok((variant, pricing));
            }
        }

        let pricing = self
            .pricing
            .active_for_model(Some(provider), base_model, at)
            .await?
            .ok_or_else(|| GatewayError::NoProviderForModel(base_model.to_string()))?;
        Ok((base_model.to_string(), pricing))
    }

    async fn emit(&self, event: &UsageEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.redis.clone();
        let _: String = conn
            .xadd(STREAM_KEY, "*", &[("payload", payload.as_str())])
            .await?;
        Ok(())
    }

    async fn increment_counters(&self, event: &UsageEvent, cost: Decimal) {
        for period in ["daily", "monthly"] {
            let period_key = period_key(period, event.ts);
            let key = keys::ledger(event.tenant_id, &period_key);
            if let Err(e) = self.cache.incr_by_decimal(&key, cost, Duration::from_secs(period_ttl(period))).await {
                warn!(error = %e, key, "tenant ledger counter increment failed");
            }

            for tag in &event.tags {
                let tag_key = keys::ledger_tag(event.tenant_id, tag.id, &period_key);
                if let Err(e) = self
                    .cache
                    .incr_by_decimal(&tag_key, tag.attributed_cost_usd, Duration::from_secs(period_ttl(period)))
                    .await
                {
                    warn!(error = %e, key = tag_key, "tag ledger counter increment failed");
                }
            }
        }
    }
}

fn period_key(period: &str, at: chrono::DateTime<Utc>) -> String {
    match period {
        "daily" => at.format("%Y-%m-%d").to_string(),
        "monthly" => at.format("%Y-%m").to_string(),
        other => other.to_string(),
    }
}

fn period_ttl(period: &str) -> u64 {
    match period {
        "daily" => 86_400,
        "monthly" => 31 * 86_400,
        _ => 86_400,
    }
}

/// Background consumer draining `bg_events` into the relational ledger
/// and the tag-usage analytics projection. Grounded directly on the
/// `XGROUP CREATE` / `xread_options` / `xack` consumer-group loop this
/// crate's ingestion pipeline already uses for its own event streams.
pub struct LedgerWorker {
    client: redis::Client,
    cache: Arc<dyn CacheTier>,
    repo: Arc<dyn UsageLedgerRepository>,
    consumer_group: String,
    consumer_name: String,
}

impl LedgerWorker {
    pub fn new(
        client: redis::Client,
        cache: Arc<dyn CacheTier>,
        repo: Arc<dyn UsageLedgerRepository>,
        consumer_name: String,
    ) -> Self {
        Self {
            client,
            cache,
            repo,
            consumer_group: "ledger_workers".to_string(),
            consumer_name,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            stream_key = STREAM_KEY,
            consumer_group = %self.consumer_group,
            "starting ledger worker"
        );

        let mut con = self.client.get_async_connection().await?;

        let _: std::result::Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(STREAM_KEY)
            .arg(&self.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut con)
            .await;

        // A DB outage must not drop events: on failure we back off and
        // retry the same unacknowledged messages rather than xack them,
        // so the stream buffers until the database comes back (spec §4.7).
        let mut backoff = ExponentialBackoff::<SystemClock> {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: Some(Duration::from_secs(300)),
            multiplier: 2.0,
            ..Default::default()
        };

        loop {
            match self.consume_once(&mut con).await {
                Ok(()) => backoff.reset(),
                Err(e) => {
                    error!(error = %e, "ledger worker consume loop failed");
                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn consume_once(&self, con: &mut redis::aio::Connection) -> Result<()> {
        let results: Vec<(String, Vec<(String, Vec<(String, String)>)>)> = con
            .xread_options(
                &[STREAM_KEY],
                &[">"],
                &StreamReadOptions::default()
                    .group(&self.consumer_group, &self.consumer_name)
                    .count(10)
                    .block(5000),
            )
            .await?;

        for (_stream, messages) in results {
            for (message_id, fields) in messages {
                if let Err(e) = self.process(&message_id, &fields, con).await {
                    error!(message_id = %message_id, error = %e, "failed to process ledger event");
                }
            }
        }
        Ok(())
    }

    async fn process(
        &self,
        message_id: &str,
        fields: &[(String, String)],
        con: &mut redis::aio::Connection,
    ) -> Result<()> {
        let payload = fields
            .iter()
            .find(|(k, _)| k == "payload")
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| crate::domain::GatewayError::internal("missing payload field on stream entry"))?;

        let event: UsageEvent = serde_json::from_str(payload)?;

        let event_key = keys::idempotency(&event.usage_ledger_id.to_string(), EVENT_MARKER_TAG_ID);
        if !self.cache.set_if_absent(&event_key, "1", IDEMPOTENCY_TTL).await? {
            info!(message_id, usage_ledger_id = %event.usage_ledger_id, "duplicate event discarded by idempotency marker");
            let _: i64 = con.xack(STREAM_KEY, &self.consumer_group, &[message_id]).await?;
            return Ok(());
        }

        let (entry, tags) = to_rows(&event);

        for tag in &event.tags {
            let idem_key = keys::idempotency(&event.usage_ledger_id.to_string(), tag.id);
            let _ = self.cache.set_if_absent(&idem_key, "1", IDEMPOTENCY_TTL).await;
        }

        self.repo.insert(&entry, &tags).await?;
        self.rollup_analytics(&event).await;

        let _: i64 = con.xack(STREAM_KEY, &self.consumer_group, &[message_id]).await?;
        Ok(())
    }

    async fn rollup_analytics(&self, event: &UsageEvent) {
        let stream_key = keys::tag_usage_stream(event.tenant_id);
        for tag in &event.tags {
            for period in ["daily", "monthly"] {
                let period_key = period_key(period, event.ts);
                let zset_key = keys::tag_usage_zset(event.tenant_id, tag.id, period);
                let agg_key = keys::tag_usage_agg(event.tenant_id, tag.id, &period_key);
                let rt_key = keys::tag_usage_rt(event.tenant_id, tag.id);

                let member = serde_json::json!({
                    "usd": tag.attributed_cost_usd,
                    "weight": tag.weight,
                    "ts": event.ts,
                    "sessionId": event.session_id,
                    "model": event.model,
                })
                .to_string();

                if let Err(e) = self.cache.set_string(&zset_key, &member, Duration::from_secs(31 * 86_400)).await {
                    warn!(error = %e, "tag usage zset write failed");
                }
                if let Err(e) = self
                    .cache
                    .incr_by_decimal(&agg_key, tag.attributed_cost_usd, Duration::from_secs(period_ttl(period)))
                    .await
                {
                    warn!(error = %e, "tag usage aggregate counter write failed");
                }
                if let Err(e) = self.cache.set_string(&rt_key, &tag.attributed_cost_usd.to_string(), Duration::from_secs(300)).await {
                    warn!(error = %e, "tag usage realtime counter write failed");
                }
            }
        }

        if let Ok(json) = serde_json::to_string(event) {
            let _ = self.cache.set_string(&stream_key, &json, Duration::from_secs(31 * 86_400)).await;
        }
    }
}

fn to_rows(event: &UsageEvent) -> (UsageLedger, Vec<RequestTag>) {
    let cost_usd: Decimal = event.usd.parse().unwrap_or(Decimal::ZERO);
    let entry = UsageLedger {
        id: event.usage_ledger_id,
        tenant_id: event.tenant_id,
        api_key_id: event.api_key_id,
        session_id: event.session_id.clone(),
        provider: event.provider.clone(),
        model: event.model.clone(),
        input_tokens: event.prompt_tokens,
        cached_tokens: event.cached_tokens,
        output_tokens: event.completion_tokens,
        cost_usd,
        status: event.status.clone(),
        latency_ms: event.latency_ms,
        created_at: event.ts,
    };

    let tags = event
        .tags
        .iter()
        .map(|t| RequestTag {
            usage_ledger_id: event.usage_ledger_id,
            tag_id: t.id,
            weight: t.weight,
            attributed_cost_usd: t.attributed_cost_usd,
        })
        .collect();

    (entry, tags)
}
