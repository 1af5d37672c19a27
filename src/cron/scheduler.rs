//! Cron scheduler for periodic background tasks.
//!
//! Runs jobs like:
//! - Refreshing stale token metadata from the LCD
//! - Recomputing pool/token rollup matrices for recently active pools

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::worker::TokenFetcher;

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    db: Arc<Database>,
    token_fetcher: TokenFetcher,
    settings: Arc<CronSettings>,
}

/// Configuration for cron job intervals
#[derive(Debug, Clone)]
pub struct CronSettings {
    /// Interval for refreshing stale token metadata
    pub meta_refresh_interval_secs: u64,
    /// Parallelism of the metadata refresh job
    pub meta_concurrency: usize,
    /// Interval for recomputing rollup matrices - default 5 minutes
    pub matrix_refresh_interval_secs: u64,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            meta_refresh_interval_secs: 60,
            meta_concurrency: 4,
            matrix_refresh_interval_secs: 300,
        }
    }
}

impl CronScheduler {
    pub fn new(db: Arc<Database>, token_fetcher: TokenFetcher, settings: CronSettings) -> Self {
        Self {
            db,
            token_fetcher,
            settings: Arc::new(settings),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_meta_refresh_job(&scheduler).await?;
        self.register_matrix_refresh_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 2);

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_meta_refresh_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let fetcher = self.token_fetcher.clone();
        let interval = self.settings.meta_refresh_interval_secs;
        let concurrency = self.settings.meta_concurrency;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                let fetcher = fetcher.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::meta_refresh::run(&db, &fetcher, interval, concurrency).await
                    {
                        error!("Failed to refresh token metadata: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered meta_refresh job (every {}s)", interval);
        Ok(())
    }

    async fn register_matrix_refresh_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let interval = self.settings.matrix_refresh_interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::matrix_refresh::run(&db).await {
                        error!("Failed to refresh rollup matrices: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered matrix_refresh job (every {}s)", interval);
        Ok(())
    }
}
