use chrono::{DateTime, Utc};

/// High-water mark for resumable block processing. Advances only after a
/// height completes in full.
#[derive(Debug, Clone)]
pub struct IndexState {
    pub last_height: i64,
    pub updated_at: DateTime<Utc>,
}
