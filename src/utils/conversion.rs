//! Numeric conversion utilities.
//!
//! On-chain amounts arrive as decimal strings of up to 78 digits and stay
//! strings through storage. Conversion to f64 happens only at the display
//! boundary, via BigDecimal to avoid precision loss on the way down.

use bigdecimal::BigDecimal;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use num_bigint::BigInt;
use num_traits::{One, ToPrimitive};
use once_cell::sync::Lazy;
use std::str::FromStr;
use std::sync::Mutex;

use rustc_hash::FxHashMap;

static POW10_CACHE: Lazy<Mutex<FxHashMap<u32, BigDecimal>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// 10^exp as a BigDecimal, memoized. Exponents are bounded by the token
/// schema (0..=30) so the cache stays tiny.
pub fn big_pow10(exp: u32) -> BigDecimal {
    if let Ok(cache) = POW10_CACHE.lock() {
        if let Some(v) = cache.get(&exp) {
            return v.clone();
        }
    }

    let mut base = BigInt::one();
    for _ in 0..exp {
        base *= 10;
    }
    let value = BigDecimal::from(base);

    if let Ok(mut cache) = POW10_CACHE.lock() {
        cache.insert(exp, value.clone());
    }

    value
}

/// Accept only non-empty strings of ASCII digits; anything else is None.
pub fn digits_or_null(s: &str) -> Option<String> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        Some(s.to_string())
    } else {
        None
    }
}

/// Convert a base-unit amount string to display units (amount / 10^exponent).
///
/// Returns None for non-numeric input or values that do not fit an f64.
pub fn amount_display(amount_base: &str, exponent: u32) -> Option<f64> {
    let value = BigDecimal::from_str(amount_base).ok()?;
    let adjusted = value / big_pow10(exponent);
    let result = adjusted.to_f64()?;

    if result.is_finite() {
        Some(result)
    } else {
        None
    }
}

/// UTC minute floor of a timestamp. OHLCV buckets key on this.
pub fn minute_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn digits_rejects_non_numeric() {
        assert_eq!(digits_or_null("1000000"), Some("1000000".to_string()));
        assert_eq!(digits_or_null(""), None);
        assert_eq!(digits_or_null("12a4"), None);
        assert_eq!(digits_or_null("-5"), None);
        assert_eq!(digits_or_null("1.5"), None);
    }

    #[test]
    fn display_conversion_scales_by_exponent() {
        assert_eq!(amount_display("1000000", 6), Some(1.0));
        assert_eq!(amount_display("250000", 6), Some(0.25));
        assert_eq!(amount_display("1", 0), Some(1.0));
        assert_eq!(amount_display("not-a-number", 6), None);
    }

    #[test]
    fn display_conversion_handles_78_digit_amounts() {
        let amount = "9".repeat(78);
        let value = amount_display(&amount, 18).unwrap();
        assert!(value.is_finite());
        assert!(value > 0.0);
    }

    #[test]
    fn minute_floor_truncates_seconds() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 34, 56).unwrap();
        let floored = minute_floor(ts);
        assert_eq!(floored, Utc.with_ymd_and_hms(2025, 6, 1, 12, 34, 0).unwrap());
    }
}
