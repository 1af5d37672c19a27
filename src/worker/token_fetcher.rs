//! Token metadata fetcher backed by the chain LCD.

use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use moka::future::Cache;

use crate::chain::LcdClient;
use crate::db::Database;

/// Fetches and persists token metadata by denom.
///
/// Keeps two caches: denoms refreshed recently (skipped until the TTL
/// lapses) and denoms the LCD reliably fails on, so dead contracts are not
/// re-queried every block.
#[derive(Clone)]
pub struct TokenFetcher {
    db: Database,
    lcd: LcdClient,
    refreshed: Cache<String, ()>,
    invalid: Cache<String, ()>,
}

/// TTL for the known-bad denom cache. Long enough to stop hammering the
/// LCD, short enough to pick up late-registered metadata.
const INVALID_TTL: Duration = Duration::from_secs(3600);

impl TokenFetcher {
    pub fn new(db: Database, lcd: LcdClient, refresh_ttl: Duration) -> Self {
        let refreshed = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(refresh_ttl)
            .build();
        let invalid = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(INVALID_TTL)
            .build();

        Self {
            db,
            lcd,
            refreshed,
            invalid,
        }
    }

    /// Insert-or-return the token row id for a denom.
    pub async fn ensure_known(&self, denom: &str) -> Result<i64> {
        self.db.postgres.upsert_token_minimal(denom).await
    }

    /// Fill a token's metadata from the LCD.
    ///
    /// LCD failures are logged, never propagated: a token without metadata
    /// is still tradeable and a later refresh will fill the gap.
    pub async fn refresh_metadata(&self, denom: &str) -> Result<()> {
        if self.refreshed.contains_key(denom) || self.invalid.contains_key(denom) {
            return Ok(());
        }

        self.ensure_known(denom).await?;

        let mut meta = match self.lcd.denom_metadata(denom).await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                debug!("No chain metadata registered for {}", denom);
                self.invalid.insert(denom.to_string(), ()).await;
                return Ok(());
            },
            Err(e) => {
                warn!("Metadata fetch failed for {}: {:#}", denom, e);
                return Ok(());
            },
        };

        match self.lcd.supply_by_denom(denom).await {
            Ok(supply) => meta.total_supply = supply,
            Err(e) => warn!("Supply fetch failed for {}: {:#}", denom, e),
        }

        self.db.postgres.set_token_metadata(denom, &meta).await?;
        self.refreshed.insert(denom.to_string(), ()).await;

        info!(
            "Refreshed metadata for {} (symbol {})",
            denom,
            meta.symbol.as_deref().unwrap_or("?")
        );
        Ok(())
    }

    /// Holder count straight from the LCD; persisted when present.
    pub async fn refresh_holders(&self, denom: &str, token_id: i64) -> Result<Option<i64>> {
        let holders = self.lcd.holders_count(denom).await?;
        if let Some(count) = holders {
            self.db.postgres.set_token_holders(token_id, count).await?;
        }
        Ok(holders)
    }
}
