//! One-shot sweep filling metadata for tokens that never got any.
//!
//! Gated behind META_BACKFILL; paces itself between batches so the LCD is
//! not saturated during a long catch-up.

use std::time::Duration;

use anyhow::Result;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::MetaSettings;
use crate::db::Database;
use crate::worker::scheduler::{run_with_concurrency, TaskTimer};
use crate::worker::TokenFetcher;

pub async fn run(
    db: &Database,
    fetcher: &TokenFetcher,
    settings: &MetaSettings,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let mut after_id = 0i64;
    let mut total = 0usize;

    loop {
        if cancellation_token.is_cancelled() {
            break;
        }

        let batch = db
            .postgres
            .denoms_missing_metadata(after_id, settings.backfill_batch)
            .await?;
        let Some((last_id, _)) = batch.last() else {
            break;
        };
        after_id = *last_id;
        total += batch.len();

        let timer = TaskTimer::new();
        let tasks: Vec<_> = batch
            .into_iter()
            .map(|(_, denom)| {
                let fetcher = fetcher.clone();
                async move { fetcher.refresh_metadata(&denom).await }
            })
            .collect();
        run_with_concurrency(tasks, settings.concurrency, &timer, "meta_backfill").await;

        tokio::time::sleep(Duration::from_millis(settings.backfill_sleep_ms)).await;
    }

    info!("Metadata backfill finished ({} tokens attempted)", total);
    Ok(())
}
