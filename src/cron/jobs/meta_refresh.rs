//! Job to re-fetch metadata for tokens that have gone stale.

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use log::info;

use crate::db::Database;
use crate::worker::scheduler::{run_with_concurrency, TaskTimer};
use crate::worker::TokenFetcher;

/// How many stale denoms one job run picks up.
const REFRESH_BATCH: i64 = 100;

/// Refresh tokens whose last update predates the refresh interval.
pub async fn run(
    db: &Database,
    fetcher: &TokenFetcher,
    interval_secs: u64,
    concurrency: usize,
) -> Result<()> {
    let cutoff = Utc::now() - TimeDelta::seconds(interval_secs as i64);
    let denoms = db.postgres.stale_token_denoms(cutoff, REFRESH_BATCH).await?;

    if denoms.is_empty() {
        return Ok(());
    }

    let start = std::time::Instant::now();
    let count = denoms.len();

    let timer = TaskTimer::new();
    let tasks: Vec<_> = denoms
        .into_iter()
        .map(|denom| {
            let fetcher = fetcher.clone();
            async move { fetcher.refresh_metadata(&denom).await }
        })
        .collect();
    run_with_concurrency(tasks, concurrency, &timer, "meta_refresh").await;

    info!(
        "Completed meta_refresh job in {:?} ({} tokens, {} failed)",
        start.elapsed(),
        count,
        timer.failed_count()
    );
    Ok(())
}
