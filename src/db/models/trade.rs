use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Num;

use crate::utils::UZIG;

/// Contract action a trade row was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Swap,
    Provide,
    Withdraw,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Swap => "swap",
            TradeAction::Provide => "provide",
            TradeAction::Withdraw => "withdraw",
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "provide" => TradeAction::Provide,
            "withdraw" => TradeAction::Withdraw,
            _ => TradeAction::Swap,
        }
    }
}

/// Trade direction relative to the pool's base token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Buy,
    Sell,
    Provide,
    Withdraw,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
            TradeDirection::Provide => "provide",
            TradeDirection::Withdraw => "withdraw",
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "buy" => TradeDirection::Buy,
            "sell" => TradeDirection::Sell,
            "provide" => TradeDirection::Provide,
            _ => TradeDirection::Withdraw,
        }
    }

    /// Classify a swap against the pool's leg denoms.
    ///
    /// Offering the quote token buys the base; offering the base sells it.
    /// When the offer denom matches neither leg (router multi-hop residue),
    /// fall back to the ask side symmetry.
    pub fn for_swap(
        offer_denom: Option<&str>,
        ask_denom: Option<&str>,
        base_denom: &str,
        quote_denom: &str,
    ) -> Self {
        match offer_denom {
            Some(d) if d == quote_denom => return TradeDirection::Buy,
            Some(d) if d == base_denom => return TradeDirection::Sell,
            _ => {}
        }
        match ask_denom {
            Some(d) if d == base_denom => TradeDirection::Buy,
            Some(d) if d == quote_denom => TradeDirection::Sell,
            _ => TradeDirection::Buy,
        }
    }
}

/// Notional bucket thresholded on the native-unit leg of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Shrimp,
    Shark,
    Whale,
}

// Thresholds in base units: 1_000 ZIG and 10_000 ZIG at 10^6 uzig per ZIG.
const SHRIMP_LIMIT_UZIG: &str = "1000000000";
const SHARK_LIMIT_UZIG: &str = "10000000000";

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Shrimp => "shrimp",
            SizeClass::Shark => "shark",
            SizeClass::Whale => "whale",
        }
    }

    /// Classify by the native-leg amount in base units. Exact integer
    /// comparison so the 1000/10000 ZIG boundaries never drift through
    /// float rounding.
    pub fn classify(native_amount_base: &str) -> Option<Self> {
        let amount = BigUint::from_str_radix(native_amount_base, 10).ok()?;
        let shrimp_limit = BigUint::from_str_radix(SHRIMP_LIMIT_UZIG, 10).ok()?;
        let shark_limit = BigUint::from_str_radix(SHARK_LIMIT_UZIG, 10).ok()?;

        if amount < shrimp_limit {
            Some(SizeClass::Shrimp)
        } else if amount < shark_limit {
            Some(SizeClass::Shark)
        } else {
            Some(SizeClass::Whale)
        }
    }

    /// Pick the native leg out of a trade's offer/return amounts, if any,
    /// and classify it. Pools without a native leg have no class.
    pub fn for_trade(
        offer_denom: Option<&str>,
        offer_amount_base: Option<&str>,
        ask_denom: Option<&str>,
        return_amount_base: Option<&str>,
    ) -> Option<Self> {
        if offer_denom == Some(UZIG) {
            return offer_amount_base.and_then(Self::classify);
        }
        if ask_denom == Some(UZIG) {
            return return_amount_base.and_then(Self::classify);
        }
        None
    }
}

/// A trade pending insertion through the batch sink.
///
/// Amount fields stay decimal strings end-to-end; the natural key
/// (created_at, tx_hash, pool_id, msg_index) makes replays idempotent.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub pool_id: i64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub action: TradeAction,
    pub direction: TradeDirection,
    pub offer_denom: Option<String>,
    pub offer_amount_base: Option<String>,
    pub ask_denom: Option<String>,
    pub ask_amount_base: Option<String>,
    pub return_amount_base: Option<String>,
    pub reserve1_denom: Option<String>,
    pub reserve1_amount: Option<String>,
    pub reserve2_denom: Option<String>,
    pub reserve2_amount: Option<String>,
    pub size_class: Option<SizeClass>,
    pub is_router: bool,
    pub signer: Option<String>,
    pub height: i64,
    pub created_at: DateTime<Utc>,
}

/// Price data that must land exactly once per trade row: a tick, and for
/// swaps a minute-bar increment. The trade flusher applies it only for
/// rows the batch insert actually created, so replaying a height adds
/// nothing to the bar sums or the tick series.
#[derive(Debug, Clone)]
pub struct PriceContribution {
    pub token_id: i64,
    pub pool_id: i64,
    pub price_in_zig: f64,
    /// Native-leg display value; zero for liquidity actions.
    pub volume_zig: f64,
    /// Swaps feed the minute bar; liquidity actions only tick.
    pub counts_in_ohlcv: bool,
}

/// Sink item: the trade row plus its once-only price contribution.
#[derive(Debug, Clone)]
pub struct TradeInsert {
    pub trade: NewTrade,
    pub pricing: Option<PriceContribution>,
}

/// Trade row joined with pool and base-token columns, as the live
/// broadcaster reads it back out of the trades table.
#[derive(Debug, Clone)]
pub struct BroadcastTrade {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub tx_hash: String,
    pub pair_contract: String,
    pub signer: Option<String>,
    pub action: TradeAction,
    pub direction: TradeDirection,
    pub offer_denom: Option<String>,
    pub offer_amount_base: Option<String>,
    pub ask_denom: Option<String>,
    pub ask_amount_base: Option<String>,
    pub return_amount_base: Option<String>,
    pub base_token_id: i64,
    pub base_denom: String,
    pub base_symbol: Option<String>,
    pub base_exponent: i32,
    pub quote_denom: String,
    pub quote_exponent: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_class_thresholds_are_exact() {
        // z < 1000 ZIG
        assert_eq!(SizeClass::classify("999999999"), Some(SizeClass::Shrimp));
        // z == 1000 ZIG exactly
        assert_eq!(SizeClass::classify("1000000000"), Some(SizeClass::Shark));
        // z just below 10000 ZIG
        assert_eq!(SizeClass::classify("9999999999"), Some(SizeClass::Shark));
        // z == 10000 ZIG exactly
        assert_eq!(SizeClass::classify("10000000000"), Some(SizeClass::Whale));
        // tiny swap
        assert_eq!(SizeClass::classify("1000000"), Some(SizeClass::Shrimp));
    }

    #[test]
    fn size_class_requires_native_leg() {
        assert_eq!(
            SizeClass::for_trade(
                Some("uzig"),
                Some("1000000"),
                Some("factory/zig1x/coin"),
                Some("250000"),
            ),
            Some(SizeClass::Shrimp)
        );
        assert_eq!(
            SizeClass::for_trade(
                Some("factory/zig1x/coin"),
                Some("250000"),
                Some("uzig"),
                Some("1000000"),
            ),
            Some(SizeClass::Shrimp)
        );
        assert_eq!(
            SizeClass::for_trade(
                Some("ibc/AAAA"),
                Some("1000000"),
                Some("factory/zig1x/coin"),
                Some("250000"),
            ),
            None
        );
    }

    #[test]
    fn swap_direction_follows_offer_denom() {
        let base = "factory/zig1x/coin";
        let quote = "uzig";
        assert_eq!(
            TradeDirection::for_swap(Some(quote), Some(base), base, quote),
            TradeDirection::Buy
        );
        assert_eq!(
            TradeDirection::for_swap(Some(base), Some(quote), base, quote),
            TradeDirection::Sell
        );
    }

    #[test]
    fn swap_direction_falls_back_to_ask_side() {
        let base = "factory/zig1x/coin";
        let quote = "uzig";
        // Offer denom unknown (multi-hop): ask side decides.
        assert_eq!(
            TradeDirection::for_swap(Some("ibc/OTHER"), Some(base), base, quote),
            TradeDirection::Buy
        );
        assert_eq!(
            TradeDirection::for_swap(None, Some(quote), base, quote),
            TradeDirection::Sell
        );
    }
}
