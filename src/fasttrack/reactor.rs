//! Fast-track enrichment for freshly created pools.
//!
//! Reacts to `pair_created` on the notify bus and immediately drives
//! metadata, holder counts, security flags, rollup matrices, and seed
//! pricing, so a new pool is queryable before its first swap lands. Every
//! step fails in isolation; a dead LCD never blocks the others.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::chain::LcdClient;
use crate::db::models::{OhlcvUpdate, PairCreatedPayload, Token};
use crate::db::Database;
use crate::pubsub::NotifyBus;
use crate::utils::minute_floor;
use crate::worker::parser::AssetAmount;
use crate::worker::pricing::{price_from_reserves, PairLegs};
use crate::worker::token_fetcher::TokenFetcher;

pub struct FastTrackReactor {
    db: Database,
    lcd: LcdClient,
    token_fetcher: TokenFetcher,
}

impl FastTrackReactor {
    pub fn new(db: Database, lcd: LcdClient, token_fetcher: TokenFetcher) -> Self {
        Self {
            db,
            lcd,
            token_fetcher,
        }
    }

    /// Subscribe to pair_created and handle payloads on the bus worker.
    pub fn start(self: Arc<Self>, bus: &NotifyBus) {
        bus.listen(crate::db::models::PAIR_CREATED_TOPIC, move |payload| {
            let reactor = self.clone();
            async move {
                let parsed: PairCreatedPayload = match serde_json::from_value(payload.data) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Undecodable pair_created payload: {:#}", e);
                        return;
                    },
                };
                reactor.handle_pair_created(parsed).await;
            }
        });
    }

    async fn handle_pair_created(&self, pair: PairCreatedPayload) {
        info!("Fast-tracking new pool {} ({})", pair.pool_id, pair.pair_contract);

        // 1. Metadata for both legs, in parallel.
        let (base_meta, quote_meta) = tokio::join!(
            self.token_fetcher.refresh_metadata(&pair.base_denom),
            self.token_fetcher.refresh_metadata(&pair.quote_denom),
        );
        if let Err(e) = base_meta {
            warn!("Fast-track metadata failed for {}: {:#}", pair.base_denom, e);
        }
        if let Err(e) = quote_meta {
            warn!("Fast-track metadata failed for {}: {:#}", pair.quote_denom, e);
        }

        // 2. Holder counts: base always, quote only when it is not the
        //    native unit.
        let base_holders = self.refresh_holders(&pair.base_denom, pair.base_token_id);
        if pair.is_uzig_quote {
            if let Err(e) = base_holders.await {
                warn!("Fast-track holders failed for {}: {:#}", pair.base_denom, e);
            }
        } else {
            let quote_holders = self.refresh_holders(&pair.quote_denom, pair.quote_token_id);
            let (b, q) = tokio::join!(base_holders, quote_holders);
            if let Err(e) = b {
                warn!("Fast-track holders failed for {}: {:#}", pair.base_denom, e);
            }
            if let Err(e) = q {
                warn!("Fast-track holders failed for {}: {:#}", pair.quote_denom, e);
            }
        }

        // 3. Security scan.
        if let Err(e) = self.security_scan(&pair.base_denom).await {
            warn!("Fast-track security scan failed for {}: {:#}", pair.base_denom, e);
        }
        if !pair.is_uzig_quote {
            if let Err(e) = self.security_scan(&pair.quote_denom).await {
                warn!("Fast-track security scan failed for {}: {:#}", pair.quote_denom, e);
            }
        }

        // 4. Rollup matrices across all four buckets.
        if let Err(e) = self.db.postgres.refresh_pool_matrix(pair.pool_id).await {
            warn!("Fast-track pool matrix failed for {}: {:#}", pair.pool_id, e);
        }
        if let Err(e) = self.db.postgres.refresh_token_matrix(pair.base_token_id).await {
            warn!("Fast-track token matrix failed for {}: {:#}", pair.base_token_id, e);
        }

        // 5. Seed pricing, native-quote pools only.
        if pair.is_uzig_quote {
            if let Err(e) = self.seed_price(&pair).await {
                warn!("Fast-track price seed failed for {}: {:#}", pair.pair_contract, e);
            }
        }
    }

    /// Holder counts read zero while the LCD index catches up to a brand
    /// new denom; retry once before giving up.
    async fn refresh_holders(&self, denom: &str, token_id: i64) -> Result<()> {
        let count = self.token_fetcher.refresh_holders(denom, token_id).await?;
        if count.unwrap_or(0) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            self.token_fetcher.refresh_holders(denom, token_id).await?;
        }
        Ok(())
    }

    async fn security_scan(&self, denom: &str) -> Result<()> {
        let token = self
            .db
            .postgres
            .get_token_by_denom(denom)
            .await?
            .with_context(|| format!("token {} missing after phase 1", denom))?;

        let (has_metadata, has_supply_cap, flags) = evaluate_security(&token);
        self.db
            .postgres
            .upsert_token_security(token.id, has_metadata, has_supply_cap, flags.as_deref())
            .await
    }

    /// Fetch on-chain reserves and write the first price row plus a
    /// zero-volume minute bar at the pool's creation minute.
    async fn seed_price(&self, pair: &PairCreatedPayload) -> Result<()> {
        let pwt = self
            .db
            .postgres
            .pool_with_tokens(&pair.pair_contract)
            .await?
            .with_context(|| format!("pool {} missing after phase 1", pair.pair_contract))?;

        let reserves: Vec<Option<AssetAmount>> = self
            .lcd
            .pool_reserves(&pair.pair_contract)
            .await?
            .into_iter()
            .map(Some)
            .collect();

        let legs = PairLegs {
            base_denom: &pwt.pool.base_denom,
            base_exponent: pwt.base.exponent.max(0) as u32,
            quote_denom: &pwt.pool.quote_denom,
            quote_exponent: pwt.quote.exponent.max(0) as u32,
        };

        let Some(price) = price_from_reserves(&legs, &reserves) else {
            info!(
                "Pool {} has no priceable reserves yet, skipping seed",
                pair.pair_contract
            );
            return Ok(());
        };

        self.db
            .postgres
            .upsert_price(pair.base_token_id, pair.pool_id, price, true, pwt.pool.created_at)
            .await?;

        self.db
            .postgres
            .append_price_tick(pair.base_token_id, pair.pool_id, price, pwt.pool.created_at)
            .await?;

        self.db
            .postgres
            .upsert_ohlcv_1m(&OhlcvUpdate {
                pool_id: pair.pool_id,
                bucket_start: minute_floor(pwt.pool.created_at),
                price,
                volume_zig: 0.0,
                trade_inc: 0,
            })
            .await?;

        info!("Seeded price {} for pool {}", price, pair.pair_contract);
        Ok(())
    }
}

/// Advisory security evaluation from what the registry knows.
fn evaluate_security(token: &Token) -> (bool, bool, Option<String>) {
    let has_metadata = token.symbol.is_some() && token.name.is_some();
    let has_supply_cap = token.max_supply.is_some();

    let mut flags = Vec::new();
    if !has_metadata {
        flags.push("no_metadata");
    }
    if !has_supply_cap {
        flags.push("unbounded_supply");
    }
    if token.holders_count.unwrap_or(0) == 0 {
        flags.push("no_holders");
    }

    let flags = if flags.is_empty() {
        None
    } else {
        Some(flags.join(","))
    };

    (has_metadata, has_supply_cap, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TokenType;
    use chrono::Utc;

    fn token(symbol: Option<&str>, max_supply: Option<&str>, holders: Option<i64>) -> Token {
        Token {
            id: 1,
            denom: "factory/zig1x/coin".to_string(),
            token_type: TokenType::Factory,
            name: symbol.map(|_| "Coin".to_string()),
            symbol: symbol.map(str::to_string),
            display: None,
            exponent: 6,
            total_supply: None,
            max_supply: max_supply.map(str::to_string),
            holders_count: holders,
            website: None,
            twitter: None,
            telegram: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn clean_token_has_no_flags() {
        let (has_meta, has_cap, flags) =
            evaluate_security(&token(Some("COIN"), Some("1000000000"), Some(25)));
        assert!(has_meta);
        assert!(has_cap);
        assert_eq!(flags, None);
    }

    #[test]
    fn missing_metadata_and_holders_are_flagged() {
        let (has_meta, has_cap, flags) = evaluate_security(&token(None, None, None));
        assert!(!has_meta);
        assert!(!has_cap);
        assert_eq!(
            flags.as_deref(),
            Some("no_metadata,unbounded_supply,no_holders")
        );
    }
}
