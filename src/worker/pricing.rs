//! Reserve-based price derivation.
//!
//! Prices are always ZIG per 1 display unit of the base token, computed from
//! the two reserve legs in display units. BigDecimal carries the division so
//! 78-digit reserves survive the trip; the result drops to f64 only at the
//! end.

use bigdecimal::BigDecimal;
use num_traits::{ToPrimitive, Zero};
use std::str::FromStr;

use crate::utils::big_pow10;
use crate::worker::parser::AssetAmount;

/// The denoms and exponents of a pool's two legs, as pricing sees them.
#[derive(Debug, Clone)]
pub struct PairLegs<'a> {
    pub base_denom: &'a str,
    pub base_exponent: u32,
    pub quote_denom: &'a str,
    pub quote_exponent: u32,
}

/// quote_display / base_display for matched reserve legs.
///
/// Returns None when a leg is missing, a denom matches neither side, or
/// either reserve is zero.
pub fn price_from_reserves(
    legs: &PairLegs<'_>,
    reserves: &[Option<AssetAmount>],
) -> Option<f64> {
    let mut base_amount: Option<&str> = None;
    let mut quote_amount: Option<&str> = None;

    for leg in reserves.iter().flatten() {
        if leg.denom == legs.base_denom {
            base_amount = Some(&leg.amount_base);
        } else if leg.denom == legs.quote_denom {
            quote_amount = Some(&leg.amount_base);
        }
    }

    let base = BigDecimal::from_str(base_amount?).ok()?;
    let quote = BigDecimal::from_str(quote_amount?).ok()?;

    if base.is_zero() || quote.is_zero() {
        return None;
    }

    let base_display = base / big_pow10(legs.base_exponent);
    let quote_display = quote / big_pow10(legs.quote_exponent);

    let price = (quote_display / base_display).to_f64()?;
    if price.is_finite() && price > 0.0 {
        Some(price)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(denom: &str, amount: &str) -> Option<AssetAmount> {
        Some(AssetAmount {
            denom: denom.to_string(),
            amount_base: amount.to_string(),
        })
    }

    fn native_pair<'a>(base_denom: &'a str) -> PairLegs<'a> {
        PairLegs {
            base_denom,
            base_exponent: 6,
            quote_denom: "uzig",
            quote_exponent: 6,
        }
    }

    #[test]
    fn price_matches_create_and_swap_scenario() {
        // 1_000_000 uzig against 250_000 base at exponent 6:
        // 1.0 / 0.25 = 4.0 ZIG per display unit.
        let legs = native_pair("factory/zig1x/coin");
        let reserves = vec![leg("uzig", "1000000"), leg("factory/zig1x/coin", "250000")];
        assert_eq!(price_from_reserves(&legs, &reserves), Some(4.0));
    }

    #[test]
    fn price_is_order_independent() {
        let legs = native_pair("factory/zig1x/coin");
        let reserves = vec![leg("factory/zig1x/coin", "250000"), leg("uzig", "1000000")];
        assert_eq!(price_from_reserves(&legs, &reserves), Some(4.0));
    }

    #[test]
    fn price_respects_differing_exponents() {
        let legs = PairLegs {
            base_denom: "factory/zig1x/micro18",
            base_exponent: 18,
            quote_denom: "uzig",
            quote_exponent: 6,
        };
        // 2.0 ZIG quote vs 0.5 display base -> 4.0
        let reserves = vec![
            leg("uzig", "2000000"),
            leg("factory/zig1x/micro18", "500000000000000000"),
        ];
        assert_eq!(price_from_reserves(&legs, &reserves), Some(4.0));
    }

    #[test]
    fn zero_reserves_yield_no_price() {
        let legs = native_pair("factory/zig1x/coin");
        let reserves = vec![leg("uzig", "0"), leg("factory/zig1x/coin", "250000")];
        assert_eq!(price_from_reserves(&legs, &reserves), None);
    }

    #[test]
    fn mismatched_or_missing_legs_yield_no_price() {
        let legs = native_pair("factory/zig1x/coin");
        let reserves = vec![leg("ibc/OTHER", "1000000"), leg("factory/zig1x/coin", "250000")];
        assert_eq!(price_from_reserves(&legs, &reserves), None);

        let reserves = vec![leg("uzig", "1000000"), None];
        assert_eq!(price_from_reserves(&legs, &reserves), None);
    }
}
