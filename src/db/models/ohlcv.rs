use chrono::{DateTime, Utc};

/// One contribution to a minute bar. The conflict clause folds repeated
/// contributions into open/high/low/close and accumulates volume and count.
#[derive(Debug, Clone)]
pub struct OhlcvUpdate {
    pub pool_id: i64,
    pub bucket_start: DateTime<Utc>,
    pub price: f64,
    pub volume_zig: f64,
    pub trade_inc: i64,
}

/// Rollup window identifiers for the pool/token matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixBucket {
    M30,
    H1,
    H4,
    H24,
}

impl MatrixBucket {
    pub const ALL: [MatrixBucket; 4] =
        [MatrixBucket::M30, MatrixBucket::H1, MatrixBucket::H4, MatrixBucket::H24];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixBucket::M30 => "30m",
            MatrixBucket::H1 => "1h",
            MatrixBucket::H4 => "4h",
            MatrixBucket::H24 => "24h",
        }
    }

    /// Window length in minutes.
    pub fn minutes(&self) -> i64 {
        match self {
            MatrixBucket::M30 => 30,
            MatrixBucket::H1 => 60,
            MatrixBucket::H4 => 240,
            MatrixBucket::H24 => 1440,
        }
    }
}
