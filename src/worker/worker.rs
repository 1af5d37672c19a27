//! Height-driving loop.
//!
//! Resumes from the index_state high-water mark, follows the node tip, and
//! feeds heights to the block processor one at a time. Transient failures
//! leave the mark untouched so the failed height is retried; idempotent
//! writes make the replay safe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::chain::RpcClient;
use crate::config::Settings;
use crate::db::Database;
use crate::worker::processor::BlockProcessor;

/// Interval for logging progress updates (10 seconds)
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Pause before retrying a height that failed with a transient error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct IndexWorker {
    processor: Arc<BlockProcessor>,
    db: Database,
    rpc: RpcClient,
    settings: Arc<Settings>,
}

impl IndexWorker {
    pub fn new(
        processor: Arc<BlockProcessor>,
        db: Database,
        rpc: RpcClient,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            processor,
            db,
            rpc,
            settings,
        }
    }

    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let tip_poll = Duration::from_millis(self.settings.indexer.tip_poll_interval_ms);
        let mut last_progress_log = Instant::now();

        let mut next_height = match self.db.postgres.get_index_state().await? {
            Some(state) => state.last_height + 1,
            None => match self.settings.indexer.start_height {
                Some(h) => h,
                None => self.rpc.latest_height().await?,
            },
        };

        info!("Indexer starting from height {}", next_height);

        loop {
            if cancellation_token.is_cancelled() {
                info!("Index worker received cancellation signal");
                break;
            }

            let tip = match self.rpc.latest_height().await {
                Ok(h) => h,
                Err(e) => {
                    warn!("Failed to fetch node tip: {:#}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                },
            };

            while next_height <= tip {
                if cancellation_token.is_cancelled() {
                    break;
                }

                match self.processor.process_height(next_height).await {
                    Ok(()) => {
                        next_height += 1;
                    },
                    Err(e) => {
                        // Height is abandoned without advancing the mark;
                        // the retry reprocesses it from scratch.
                        warn!("Height {} failed, will retry: {:#}", next_height, e);
                        tokio::time::sleep(RETRY_DELAY).await;
                        break;
                    },
                }

                if last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                    info!(
                        "Synced to height {} ({} behind tip)",
                        next_height - 1,
                        tip - next_height + 1
                    );
                    last_progress_log = Instant::now();
                }
            }

            tokio::time::sleep(tip_poll).await;
        }

        Ok(())
    }
}
