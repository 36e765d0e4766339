use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-million-token pricing for one canonical model id, optionally
/// scoped to a provider and a tiered `-low`/`-high` suffix (spec §3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModelPricing {
    pub id: i64,
    pub model: String,
    pub provider: String,
    pub version_tag: Option<String>,
    pub input_price_per_million: Decimal,
    pub cached_input_price_per_million: Option<Decimal>,
    pub output_price_per_million: Decimal,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
}

/// Above this many total tokens in one call, a long-context tier price
/// row applies if the model carries one (spec §4.4 step 4, §8 scenario 5).
pub const LONG_CONTEXT_THRESHOLD_TOKENS: i64 = 128_000;

/// The provider-suffix variant id to try first for a call's total token
/// count, or `None` when the call falls in the base (untiered) range.
pub fn tiered_variant(base_model: &str, total_tokens: i64) -> Option<String> {
    if total_tokens > LONG_CONTEXT_THRESHOLD_TOKENS {
        Some(format!("{base_model}-high"))
    } else {
        None
    }
}

impl ModelPricing {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.effective_from && self.effective_to.map(|end| at <= end).unwrap_or(true)
    }

    /// Cost for the given token counts, in USD, at full `rust_decimal` precision.
    pub fn cost_for(&self, input_tokens: u64, cached_tokens: u64, output_tokens: u64) -> Decimal {
        let million = Decimal::from(1_000_000u64);
        let billable_input = input_tokens.saturating_sub(cached_tokens);
        let cached_price = self
            .cached_input_price_per_million
            .unwrap_or(self.input_price_per_million);

        let input_cost = Decimal::from(billable_input) * self.input_price_per_million / million;
        let cached_cost = Decimal::from(cached_tokens) * cached_price / million;
        let output_cost = Decimal::from(output_tokens) * self.output_price_per_million / million;

        input_cost + cached_cost + output_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pricing() -> ModelPricing {
        ModelPricing {
            id: 1,
            model: "gpt-4o".into(),
            provider: "openai".into(),
            version_tag: None,
            input_price_per_million: dec!(2.50),
            cached_input_price_per_million: Some(dec!(1.25)),
            output_price_per_million: dec!(10.00),
            effective_from: Utc::now(),
            effective_to: None,
        }
    }

    #[test]
    fn cost_for_accounts_for_cached_discount() {
        let p = pricing();
        let cost = p.cost_for(1000, 400, 200);
        // 600 billable input @ 2.50/M + 400 cached @ 1.25/M + 200 output @ 10.00/M
        let expected = dec!(600) * dec!(2.50) / dec!(1_000_000)
            + dec!(400) * dec!(1.25) / dec!(1_000_000)
            + dec!(200) * dec!(10.00) / dec!(1_000_000);
        assert_eq!(cost, expected);
    }

    #[test]
    fn cached_tokens_exceeding_input_never_go_negative() {
        let p = pricing();
        // cached > input should saturate rather than panic or go negative.
        let cost = p.cost_for(10, 500, 0);
        assert!(cost >= Decimal::ZERO);
    }

    #[test]
    fn tiered_variant_applies_only_above_the_long_context_threshold() {
        assert_eq!(tiered_variant("gemini-2.5-pro", 230_000), Some("gemini-2.5-pro-high".to_string()));
        assert_eq!(tiered_variant("gemini-2.5-pro", 4_000), None);
        assert_eq!(tiered_variant("gemini-2.5-pro", LONG_CONTEXT_THRESHOLD_TOKENS), None);
    }

    proptest::proptest! {
        #[test]
        fn cost_for_is_never_negative(
            input in 0u64..10_000_000,
            cached in 0u64..10_000_000,
            output in 0u64..10_000_000,
        ) {
            let p = pricing();
            let cost = p.cost_for(input, cached, output);
            proptest::prop_assert!(cost >= Decimal::ZERO);
        }
    }
}
