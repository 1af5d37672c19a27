use chrono::{DateTime, Utc};

/// Reference price of the native unit in USD, used only by the display
/// shaper. A single row updated out-of-band.
#[derive(Debug, Clone)]
pub struct NativePrice {
    pub price_usd: f64,
    pub updated_at: DateTime<Utc>,
}
