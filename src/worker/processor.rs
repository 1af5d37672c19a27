//! Block pipeline orchestration.
//!
//! A height runs in phases: scan the parsed events into task records, drain
//! pool upserts (phase 1), prefetch referenced pools, drain trades and
//! prices (phase 2) under the concurrency cap, drain first-sight metadata
//! fetches at a smaller cap, then advance the high-water mark. The mark
//! moves only when everything before it succeeded, so an abandoned height
//! is simply reprocessed and the conflict clauses absorb the replay.

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use moka::future::Cache;
use rustc_hash::FxHashMap;

use crate::chain::RpcClient;
use crate::config::Settings;
use crate::db::models::{
    NewPool, NewTrade, PairCreatedPayload, PoolWithTokens, PriceContribution, SizeClass,
    TradeAction, TradeDirection, TradeInsert,
};
use crate::db::Database;
use crate::pubsub::NotifyBus;
use crate::utils::{amount_display, UZIG, UZIG_EXPONENT};
use crate::worker::parser::parse_block_results;
use crate::worker::pricing::{price_from_reserves, PairLegs};
use crate::worker::scheduler::{run_with_concurrency, TaskTimer};
use crate::worker::tasks::{scan_tx, TradeIntent};
use crate::worker::token_fetcher::TokenFetcher;
use crate::worker::trade_sink::TradeSink;

pub struct BlockProcessor {
    db: Database,
    rpc: RpcClient,
    bus: Arc<NotifyBus>,
    sink: TradeSink,
    token_fetcher: TokenFetcher,
    settings: Arc<Settings>,
    /// pair_contract -> pool cache, written by phase 1 and the prefetch,
    /// read by phase 2. Phase 1 drains first, so readers see a consistent
    /// snapshot.
    pool_cache: RwLock<FxHashMap<String, Arc<PoolWithTokens>>>,
    /// Denoms already queued for a metadata fetch.
    seen_denoms: Cache<String, ()>,
}

impl BlockProcessor {
    pub fn new(
        db: Database,
        rpc: RpcClient,
        bus: Arc<NotifyBus>,
        sink: TradeSink,
        token_fetcher: TokenFetcher,
        settings: Arc<Settings>,
    ) -> Self {
        let seen_denoms = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(std::time::Duration::from_secs(settings.meta.refresh_sec.max(1)))
            .build();

        Self {
            db,
            rpc,
            bus,
            sink,
            token_fetcher,
            settings,
            pool_cache: RwLock::new(FxHashMap::default()),
            seen_denoms,
        }
    }

    /// Process one height end to end. A returned error means the height
    /// must be retried; the index state has not advanced.
    pub async fn process_height(&self, height: i64) -> Result<()> {
        let (block, results) =
            tokio::join!(self.rpc.block(height), self.rpc.block_results(height));
        let block = block.with_context(|| format!("fetching block {}", height))?;
        let results =
            results.with_context(|| format!("fetching block results {}", height))?;

        let parsed = parse_block_results(&block, &results)
            .with_context(|| format!("parsing block {}", height))?;

        let router = self.settings.chain.router_addr.as_deref();
        let max_pending = self.settings.indexer.max_pending_tasks.max(1);

        let mut phase1: Vec<NewPool> = Vec::new();
        let mut phase2: Vec<TradeIntent> = Vec::new();
        let mut meta_denoms: Vec<String> = Vec::new();
        let mut failed_tasks = 0usize;

        for tx in &parsed.txs {
            let scanned = scan_tx(tx, height, parsed.time, router);

            for denom in scanned.denoms {
                if !self.seen_denoms.contains_key(&denom) {
                    self.seen_denoms.insert(denom.clone(), ()).await;
                    meta_denoms.push(denom);
                }
            }

            phase1.extend(scanned.pool_upserts);
            phase2.extend(scanned.trades);

            // Backpressure: flush mid-scan rather than letting the pending
            // task list grow unbounded on busy blocks.
            if phase2.len() >= max_pending {
                debug!(
                    "Height {}: {} pending tasks, flushing mid-scan",
                    height,
                    phase2.len()
                );
                failed_tasks += self.drain_phases(height, &mut phase1, &mut phase2).await;
            }
        }

        failed_tasks += self.drain_phases(height, &mut phase1, &mut phase2).await;

        if !meta_denoms.is_empty() {
            let timer = TaskTimer::new();
            let tasks: Vec<_> = meta_denoms
                .into_iter()
                .map(|denom| {
                    let fetcher = self.token_fetcher.clone();
                    async move { fetcher.refresh_metadata(&denom).await }
                })
                .collect();
            run_with_concurrency(
                tasks,
                self.settings.meta.concurrency,
                &timer,
                "meta",
            )
            .await;
            timer.log_summary(height);
        }

        // Everything buffered must be on disk before the mark moves.
        self.sink
            .drain()
            .await
            .with_context(|| format!("draining trades for height {}", height))?;

        // Metadata fetches are best-effort, but a failed pool or trade task
        // means the height is incomplete; leave the mark so a replay
        // recovers it.
        if failed_tasks > 0 {
            anyhow::bail!("{} tasks failed at height {}", failed_tasks, height);
        }

        self.db.postgres.set_index_state(height).await?;
        Ok(())
    }

    /// Phase-1 fully drains before phase 2 so trades can resolve their
    /// pool; the prefetch between them warms the cache in one batch query.
    /// Returns the number of failed tasks.
    async fn drain_phases(
        &self,
        height: i64,
        phase1: &mut Vec<NewPool>,
        phase2: &mut Vec<TradeIntent>,
    ) -> usize {
        let limit = self.settings.indexer.concurrency;
        let mut failed = 0;

        if !phase1.is_empty() {
            let timer = TaskTimer::new();
            let tasks: Vec<_> = std::mem::take(phase1)
                .into_iter()
                .map(|req| self.exec_pool_upsert(req))
                .collect();
            run_with_concurrency(tasks, limit, &timer, "pool").await;
            timer.log_summary(height);
            failed += timer.failed_count();
        }

        if !phase2.is_empty() {
            self.prefetch_pools(phase2).await;

            let timer = TaskTimer::new();
            let tasks: Vec<_> = std::mem::take(phase2)
                .into_iter()
                .map(|intent| self.exec_trade(intent))
                .collect();
            run_with_concurrency(tasks, limit, &timer, "trade").await;
            timer.log_summary(height);
            failed += timer.failed_count();
        }

        failed
    }

    async fn prefetch_pools(&self, trades: &[TradeIntent]) {
        let mut missing: Vec<String> = Vec::new();
        {
            let cache = match self.pool_cache.read() {
                Ok(c) => c,
                Err(_) => return,
            };
            for intent in trades {
                if !cache.contains_key(&intent.pair_contract)
                    && !missing.contains(&intent.pair_contract)
                {
                    missing.push(intent.pair_contract.clone());
                }
            }
        }

        if missing.is_empty() {
            return;
        }

        match self.db.postgres.pools_with_tokens(&missing).await {
            Ok(found) => {
                if let Ok(mut cache) = self.pool_cache.write() {
                    for pwt in found {
                        cache.insert(pwt.pool.pair_contract.clone(), Arc::new(pwt));
                    }
                }
            },
            Err(e) => {
                warn!("Pool prefetch failed for {} contracts: {:#}", missing.len(), e);
            },
        }
    }

    async fn exec_pool_upsert(&self, req: NewPool) -> Result<()> {
        let base_token_id = self.db.postgres.upsert_token_minimal(&req.base_denom).await?;
        let quote_token_id = self
            .db
            .postgres
            .upsert_token_minimal(&req.quote_denom)
            .await?;
        let dex_id = self.db.postgres.resolve_dex_id(&req.factory_contract).await?;

        let (pool_id, inserted) = self
            .db
            .postgres
            .upsert_pool(&req, dex_id, base_token_id, quote_token_id)
            .await?;

        if let Some(pwt) = self.db.postgres.pool_with_tokens(&req.pair_contract).await? {
            if let Ok(mut cache) = self.pool_cache.write() {
                cache.insert(req.pair_contract.clone(), Arc::new(pwt));
            }
        }

        if inserted {
            info!(
                "New pool {} ({} / {}) at height {}",
                req.pair_contract, req.base_denom, req.quote_denom, req.block_height
            );
            let payload = PairCreatedPayload {
                pool_id,
                pair_contract: req.pair_contract.clone(),
                base_denom: req.base_denom.clone(),
                quote_denom: req.quote_denom.clone(),
                base_token_id,
                quote_token_id,
                is_uzig_quote: req.is_uzig_quote(),
            };
            self.bus.publish(payload.into_notify()?);
        }

        Ok(())
    }

    async fn exec_trade(&self, intent: TradeIntent) -> Result<()> {
        let Some(pool) = self.resolve_pool(&intent.pair_contract).await else {
            // Phase 1 of a later replay will create it; skipping is safe.
            warn!(
                "No pool for pair {} (tx {}), skipping trade",
                intent.pair_contract, intent.tx_hash
            );
            return Ok(());
        };

        let direction = match intent.action {
            TradeAction::Swap => TradeDirection::for_swap(
                intent.offer_denom.as_deref(),
                intent.ask_denom.as_deref(),
                &pool.pool.base_denom,
                &pool.pool.quote_denom,
            ),
            TradeAction::Provide => TradeDirection::Provide,
            TradeAction::Withdraw => TradeDirection::Withdraw,
        };

        let size_class = SizeClass::for_trade(
            intent.offer_denom.as_deref(),
            intent.offer_amount_base.as_deref(),
            intent.ask_denom.as_deref(),
            intent.return_amount_base.as_deref(),
        );

        let reserve1 = intent.reserves.first().cloned().flatten();
        let reserve2 = intent.reserves.get(1).cloned().flatten();

        let trade = NewTrade {
            pool_id: pool.pool.id,
            tx_hash: intent.tx_hash.clone(),
            msg_index: intent.msg_index,
            action: intent.action,
            direction,
            offer_denom: intent.offer_denom.clone(),
            offer_amount_base: intent.offer_amount_base.clone(),
            ask_denom: intent.ask_denom.clone(),
            ask_amount_base: intent.ask_amount_base.clone(),
            return_amount_base: intent.return_amount_base.clone(),
            reserve1_denom: reserve1.as_ref().map(|l| l.denom.clone()),
            reserve1_amount: reserve1.as_ref().map(|l| l.amount_base.clone()),
            reserve2_denom: reserve2.as_ref().map(|l| l.denom.clone()),
            reserve2_amount: reserve2.as_ref().map(|l| l.amount_base.clone()),
            size_class,
            is_router: intent.is_router,
            signer: intent.signer.clone(),
            height: intent.height,
            created_at: intent.created_at,
        };

        let has_reserves = intent.reserves.iter().any(Option::is_some);

        if intent.action == TradeAction::Swap && has_reserves {
            self.db
                .postgres
                .upsert_pool_state(
                    pool.pool.id,
                    &pool.pool.base_denom,
                    &pool.pool.quote_denom,
                    &intent.reserves,
                )
                .await?;
        }

        // The live price row is monotone-guarded and safe to rewrite on
        // replay; the tick and minute-bar increments are not, so they ride
        // with the trade row and land only if its insert creates a row.
        let mut pricing = None;
        if pool.pool.is_uzig_quote && has_reserves {
            let legs = PairLegs {
                base_denom: &pool.pool.base_denom,
                base_exponent: pool.base.exponent.max(0) as u32,
                quote_denom: &pool.pool.quote_denom,
                quote_exponent: pool.quote.exponent.max(0) as u32,
            };

            if let Some(price) = price_from_reserves(&legs, &intent.reserves) {
                self.db
                    .postgres
                    .upsert_price(
                        pool.pool.base_token_id,
                        pool.pool.id,
                        price,
                        true,
                        intent.created_at,
                    )
                    .await?;

                let is_swap = intent.action == TradeAction::Swap;
                pricing = Some(PriceContribution {
                    token_id: pool.pool.base_token_id,
                    pool_id: pool.pool.id,
                    price_in_zig: price,
                    volume_zig: if is_swap { native_leg_value(&intent) } else { 0.0 },
                    counts_in_ohlcv: is_swap,
                });
            }
        }

        self.sink.push(TradeInsert { trade, pricing }).await?;

        Ok(())
    }

    async fn resolve_pool(&self, pair_contract: &str) -> Option<Arc<PoolWithTokens>> {
        if let Ok(cache) = self.pool_cache.read() {
            if let Some(pool) = cache.get(pair_contract) {
                return Some(pool.clone());
            }
        }

        match self.db.postgres.pool_with_tokens(pair_contract).await {
            Ok(Some(pwt)) => {
                let pool = Arc::new(pwt);
                if let Ok(mut cache) = self.pool_cache.write() {
                    cache.insert(pair_contract.to_string(), pool.clone());
                }
                Some(pool)
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Pool lookup failed for {}: {:#}", pair_contract, e);
                None
            },
        }
    }
}

/// Display-unit value of the trade's native leg, for OHLCV volume.
fn native_leg_value(intent: &TradeIntent) -> f64 {
    let amount = if intent.offer_denom.as_deref() == Some(UZIG) {
        intent.offer_amount_base.as_deref()
    } else if intent.ask_denom.as_deref() == Some(UZIG) {
        intent.return_amount_base.as_deref()
    } else {
        None
    };

    amount
        .and_then(|a| amount_display(a, UZIG_EXPONENT))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn swap_intent(offer_uzig: bool) -> TradeIntent {
        let (offer_denom, offer_amount, ask_denom, return_amount) = if offer_uzig {
            ("uzig", "1000000", "factory/zig1x/coin", "250000")
        } else {
            ("factory/zig1x/coin", "250000", "uzig", "1000000")
        };

        TradeIntent {
            pair_contract: "zig1pair".to_string(),
            action: TradeAction::Swap,
            tx_hash: "AB".to_string(),
            msg_index: 0,
            signer: None,
            is_router: false,
            offer_denom: Some(offer_denom.to_string()),
            offer_amount_base: Some(offer_amount.to_string()),
            ask_denom: Some(ask_denom.to_string()),
            ask_amount_base: None,
            return_amount_base: Some(return_amount.to_string()),
            reserves: vec![None, None],
            height: 1,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 3).unwrap(),
        }
    }

    #[test]
    fn native_leg_value_reads_the_uzig_side() {
        assert_eq!(native_leg_value(&swap_intent(true)), 1.0);
        assert_eq!(native_leg_value(&swap_intent(false)), 1.0);

        let mut no_native = swap_intent(true);
        no_native.offer_denom = Some("ibc/AAAA".to_string());
        no_native.ask_denom = Some("factory/zig1x/coin".to_string());
        assert_eq!(native_leg_value(&no_native), 0.0);
    }
}
