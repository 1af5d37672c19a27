//! Job to recompute rollup matrices for recently active pools and tokens.

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use log::{info, warn};

use crate::db::Database;

/// Recompute all four buckets for every pool and base token that traded in
/// the last 24 hours.
pub async fn run(db: &Database) -> Result<()> {
    let since = Utc::now() - TimeDelta::hours(24);
    let start = std::time::Instant::now();

    let pool_ids = db.postgres.active_pool_ids(since).await?;
    for pool_id in &pool_ids {
        if let Err(e) = db.postgres.refresh_pool_matrix(*pool_id).await {
            warn!("Matrix refresh failed for pool {}: {:#}", pool_id, e);
        }
    }

    let token_ids = db.postgres.active_base_token_ids(since).await?;
    for token_id in &token_ids {
        if let Err(e) = db.postgres.refresh_token_matrix(*token_id).await {
            warn!("Matrix refresh failed for token {}: {:#}", token_id, e);
        }
    }

    if !pool_ids.is_empty() || !token_ids.is_empty() {
        info!(
            "Completed matrix_refresh job in {:?} ({} pools, {} tokens)",
            start.elapsed(),
            pool_ids.len(),
            token_ids.len()
        );
    }
    Ok(())
}
