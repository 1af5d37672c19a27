pub mod conversion;
pub mod hash;

pub use conversion::{amount_display, big_pow10, digits_or_null, minute_floor};
pub use hash::sha256hex;

/// The chain's native micro-denomination. Quote side of every native pool.
pub const UZIG: &str = "uzig";

/// Decimal exponent of the native unit (1 ZIG = 10^6 uzig).
pub const UZIG_EXPONENT: u32 = 6;
