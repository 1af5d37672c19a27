//! Trade pump: tails the trades table and fans rows out to subscribers.
//!
//! Every cycle selects trades strictly after the watermark (the last 10
//! minutes on cold start), oldest first and capped, shapes them, and
//! publishes to the global, per-token, and per-pair topics. The
//! strict-greater-than watermark makes duplicates within a pump impossible;
//! a crash simply rewinds to the cold-start window and the subscribers'
//! at-least-once contract absorbs the overlap.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::ws::hub::SubscriberHub;
use crate::ws::shape::{shape_trade, topics_for};

/// Pump cadence.
const PUMP_INTERVAL: Duration = Duration::from_secs(2);

/// Row cap per cycle; the remainder is picked up next tick.
const PUMP_LIMIT: i64 = 200;

/// Cold-start lookback window.
const COLD_START_LOOKBACK_MIN: i64 = 10;

pub struct TradePump {
    db: Database,
    hub: Arc<SubscriberHub>,
    watermark: Option<DateTime<Utc>>,
}

impl TradePump {
    pub fn new(db: Database, hub: Arc<SubscriberHub>) -> Self {
        Self {
            db,
            hub,
            watermark: None,
        }
    }

    pub async fn run(mut self, cancellation_token: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(PUMP_INTERVAL);
        info!("Trade pump started");

        loop {
            tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => {
                    info!("Trade pump received cancellation signal");
                    break;
                }

                _ = interval.tick() => {
                    if let Err(e) = self.pump().await {
                        warn!("Trade pump cycle failed: {:#}", e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn pump(&mut self) -> Result<()> {
        let since = self
            .watermark
            .unwrap_or_else(|| Utc::now() - TimeDelta::minutes(COLD_START_LOOKBACK_MIN));

        let trades = self.db.postgres.trades_since(since, PUMP_LIMIT).await?;
        if trades.is_empty() {
            // Still pin the watermark so an idle stream does not keep
            // rescanning the lookback window.
            if self.watermark.is_none() {
                self.watermark = Some(since);
            }
            return Ok(());
        }

        let native_price_usd = self
            .db
            .postgres
            .get_native_price()
            .await
            .unwrap_or(None)
            .map(|p| p.price_usd)
            .unwrap_or(0.0);

        let count = trades.len();
        for trade in &trades {
            let frame = shape_trade(trade, native_price_usd).to_string();
            for topic in topics_for(trade) {
                self.hub.publish(&topic, &frame);
            }
        }

        // Strict forward progress: the next cycle selects created_at
        // strictly greater than this.
        if let Some(last) = trades.last() {
            self.watermark = Some(last.created_at);
        }

        debug!("Trade pump broadcast {} trades", count);
        Ok(())
    }
}
