//! Coalescing batch writer.
//!
//! A generic `(max_items, max_wait)` queue: producers enqueue and return
//! immediately, a dedicated flusher task commits whole batches through a
//! single write call. A flush error fails the whole batch; items stay
//! buffered so the error surfaces through the next `drain()` instead of
//! being silently dropped.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::db::models::{NewTrade, OhlcvUpdate, PriceContribution, TradeInsert};
use crate::db::Database;
use crate::utils::minute_floor;

enum Command<T> {
    Item(T),
    Drain(oneshot::Sender<Result<usize>>),
}

/// Producer handle. Cheap to clone; all clones feed one flusher.
pub struct BatchQueue<T> {
    tx: mpsc::Sender<Command<T>>,
}

impl<T> Clone for BatchQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> BatchQueue<T> {
    /// Enqueue one item. Applies backpressure only when the channel is at
    /// capacity (4x the batch size).
    pub async fn push(&self, item: T) -> Result<()> {
        self.tx
            .send(Command::Item(item))
            .await
            .map_err(|_| anyhow::anyhow!("batch queue flusher is gone"))
    }

    /// Force a flush of everything buffered and report the outcome,
    /// including any error a timed flush hit since the last drain.
    pub async fn drain(&self) -> Result<usize> {
        let (ack, result) = oneshot::channel();
        self.tx
            .send(Command::Drain(ack))
            .await
            .map_err(|_| anyhow::anyhow!("batch queue flusher is gone"))?;
        result.await.context("batch queue flusher dropped drain ack")?
    }
}

/// The consuming half: buffers items and commits them through `write`.
pub struct BatchFlusher<T, F, Fut>
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    rx: mpsc::Receiver<Command<T>>,
    write: F,
    buf: Vec<T>,
    max_items: usize,
    max_wait: Duration,
    deadline: Option<Instant>,
    flushed_total: usize,
    label: &'static str,
}

pub fn batch_queue<T, F, Fut>(
    max_items: usize,
    max_wait: Duration,
    label: &'static str,
    write: F,
) -> (BatchQueue<T>, BatchFlusher<T, F, Fut>)
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let (tx, rx) = mpsc::channel(max_items.max(1) * 4);
    let flusher = BatchFlusher {
        rx,
        write,
        buf: Vec::new(),
        max_items: max_items.max(1),
        max_wait,
        deadline: None,
        flushed_total: 0,
        label,
    };
    (BatchQueue { tx }, flusher)
}

impl<T: Clone, F, Fut> BatchFlusher<T, F, Fut>
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    pub async fn run(mut self, cancellation_token: CancellationToken) -> Result<()> {
        loop {
            let sleep_until = self
                .deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(1));

            tokio::select! {
                biased; // Check cancellation first

                _ = cancellation_token.cancelled() => {
                    info!("[{}] Batch flusher received cancellation signal", self.label);
                    let _ = self.flush().await;
                    break;
                }

                cmd = self.rx.recv() => {
                    match cmd {
                        Some(Command::Item(item)) => {
                            if self.buf.is_empty() {
                                self.deadline = Some(Instant::now() + self.max_wait);
                            }
                            self.buf.push(item);
                            if self.buf.len() >= self.max_items {
                                let _ = self.flush().await;
                            }
                        }
                        Some(Command::Drain(ack)) => {
                            // A failed timed flush keeps its items buffered,
                            // so retrying here surfaces any standing error.
                            let result = self.flush().await;
                            let _ = ack.send(result);
                        }
                        None => {
                            info!("[{}] Batch flusher channel closed", self.label);
                            let _ = self.flush().await;
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep_until(sleep_until) => {
                    if self.deadline.is_some() {
                        let _ = self.flush().await;
                    }
                }
            }
        }

        info!("[{}] Batch flusher stopped", self.label);
        Ok(())
    }

    /// Commit everything buffered in one write. On error the buffer is
    /// kept intact for the next attempt.
    async fn flush(&mut self) -> Result<usize> {
        self.deadline = None;
        if self.buf.is_empty() {
            return Ok(0);
        }

        let count = self.buf.len();
        match (self.write)(self.buf.clone()).await {
            Ok(()) => {
                self.buf.clear();
                self.flushed_total += count;
                debug!("[{}] Flushed {} items ({} total)", self.label, count, self.flushed_total);
                Ok(count)
            },
            Err(e) => {
                error!("[{}] Failed to flush {} items: {:#}", self.label, count, e);
                Err(e)
            },
        }
    }
}

/// Trade-specific queue: writes through the deduplicating multi-row insert.
pub type TradeSink = BatchQueue<TradeInsert>;

/// Price contributions owed by a batch: exactly those of the rows the
/// insert actually created. Replayed rows conflict, return no flag, and
/// contribute nothing.
pub fn contributions_to_apply<'a>(
    batch: &'a [TradeInsert],
    inserted: &[bool],
) -> Vec<(&'a NewTrade, &'a PriceContribution)> {
    batch
        .iter()
        .zip(inserted)
        .filter(|(_, is_new)| **is_new)
        .filter_map(|(item, _)| item.pricing.as_ref().map(|p| (&item.trade, p)))
        .collect()
}

/// Commit a trade batch: one deduplicating multi-row insert, then the
/// once-only tick and minute-bar contributions for the rows that insert
/// created.
async fn write_trade_batch(db: &Database, batch: &[TradeInsert]) -> Result<()> {
    let trades: Vec<NewTrade> = batch.iter().map(|item| item.trade.clone()).collect();
    let inserted = db.postgres.insert_trades(&trades).await?;

    for (trade, pricing) in contributions_to_apply(batch, &inserted) {
        db.postgres
            .append_price_tick(
                pricing.token_id,
                pricing.pool_id,
                pricing.price_in_zig,
                trade.created_at,
            )
            .await?;

        if pricing.counts_in_ohlcv {
            db.postgres
                .upsert_ohlcv_1m(&OhlcvUpdate {
                    pool_id: pricing.pool_id,
                    bucket_start: minute_floor(trade.created_at),
                    price: pricing.price_in_zig,
                    volume_zig: pricing.volume_zig,
                    trade_inc: 1,
                })
                .await?;
        }
    }

    Ok(())
}

/// Build the trade sink and spawn its flusher task.
pub fn trade_sink(
    db: Database,
    max_items: usize,
    max_wait_ms: u64,
    cancellation_token: CancellationToken,
) -> (TradeSink, tokio::task::JoinHandle<()>) {
    let (queue, flusher) = batch_queue(
        max_items,
        Duration::from_millis(max_wait_ms),
        "trades",
        move |batch: Vec<TradeInsert>| {
            let db = db.clone();
            async move { write_trade_batch(&db, &batch).await }
        },
    );

    let handle = tokio::spawn(async move {
        if let Err(e) = flusher.run(cancellation_token).await {
            error!("[trades] Batch flusher failed: {:#}", e);
        }
    });

    (queue, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn collecting_queue(
        max_items: usize,
        max_wait: Duration,
        fail: Arc<AtomicBool>,
    ) -> (
        BatchQueue<u32>,
        Arc<Mutex<Vec<Vec<u32>>>>,
        CancellationToken,
    ) {
        let batches: Arc<Mutex<Vec<Vec<u32>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_batches = batches.clone();

        let (queue, flusher) = batch_queue(max_items, max_wait, "test", move |batch: Vec<u32>| {
            let batches = sink_batches.clone();
            let fail = fail.clone();
            async move {
                if fail.load(Ordering::SeqCst) {
                    anyhow::bail!("write refused");
                }
                batches.lock().unwrap().push(batch);
                Ok(())
            }
        });

        let token = CancellationToken::new();
        let run_token = token.clone();
        tokio::spawn(async move {
            let _ = flusher.run(run_token).await;
        });

        (queue, batches, token)
    }

    #[tokio::test]
    async fn flushes_when_batch_fills() {
        let (queue, batches, token) =
            collecting_queue(3, Duration::from_secs(60), Arc::new(AtomicBool::new(false)));

        for i in 0..3 {
            queue.push(i).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !batches.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(batches.lock().unwrap()[0], vec![0, 1, 2]);
        token.cancel();
    }

    #[tokio::test]
    async fn flushes_on_deadline_without_filling() {
        let (queue, batches, token) =
            collecting_queue(100, Duration::from_millis(20), Arc::new(AtomicBool::new(false)));

        queue.push(7).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if !batches.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(batches.lock().unwrap()[0], vec![7]);
        token.cancel();
    }

    #[tokio::test]
    async fn drain_reports_and_failed_batches_are_retained() {
        let fail = Arc::new(AtomicBool::new(true));
        let (queue, batches, token) =
            collecting_queue(100, Duration::from_secs(60), fail.clone());

        queue.push(1).await.unwrap();
        queue.push(2).await.unwrap();

        // First drain surfaces the write failure.
        assert!(queue.drain().await.is_err());
        assert!(batches.lock().unwrap().is_empty());

        // Once the writer recovers, the same items come through.
        fail.store(false, Ordering::SeqCst);
        let flushed = queue.drain().await.unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(batches.lock().unwrap()[0], vec![1, 2]);
        token.cancel();
    }

    #[test]
    fn replayed_height_contributes_no_bar_or_tick_increments() {
        use crate::db::models::{
            PriceContribution, SizeClass, TradeAction, TradeDirection,
        };
        use crate::db::postgres::ops::trades::{inserted_flags, trade_key, TradeKey};
        use chrono::TimeZone;
        use std::collections::HashSet;

        let trade = |tx_hash: &str, msg_index: i32| NewTrade {
            pool_id: 1,
            tx_hash: tx_hash.to_string(),
            msg_index,
            action: TradeAction::Swap,
            direction: TradeDirection::Buy,
            offer_denom: Some("uzig".to_string()),
            offer_amount_base: Some("1000000".to_string()),
            ask_denom: Some("factory/zig1x/coin".to_string()),
            ask_amount_base: None,
            return_amount_base: Some("250000".to_string()),
            reserve1_denom: None,
            reserve1_amount: None,
            reserve2_denom: None,
            reserve2_amount: None,
            size_class: Some(SizeClass::Shrimp),
            is_router: false,
            signer: None,
            height: 100,
            created_at: chrono::Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 3).unwrap(),
        };
        let pricing = PriceContribution {
            token_id: 7,
            pool_id: 1,
            price_in_zig: 4.0,
            volume_zig: 1.0,
            counts_in_ohlcv: true,
        };

        let batch = vec![
            TradeInsert {
                trade: trade("AA", 0),
                pricing: Some(pricing.clone()),
            },
            TradeInsert {
                trade: trade("BB", 0),
                pricing: Some(pricing),
            },
            // Liquidity action without pricing never contributes.
            TradeInsert {
                trade: trade("CC", 0),
                pricing: None,
            },
        ];
        let trades: Vec<NewTrade> = batch.iter().map(|i| i.trade.clone()).collect();

        // First pass: the insert creates every row, so both priced trades
        // owe their tick + bar increment.
        let mut returned: HashSet<TradeKey> = trades.iter().map(trade_key).collect();
        let first = inserted_flags(&trades, &mut returned);
        assert_eq!(contributions_to_apply(&batch, &first).len(), 2);

        // Replayed height: every row conflicts and RETURNING is empty, so
        // trade_count, volume_zig and the tick series stay untouched.
        let mut returned = HashSet::new();
        let replay = inserted_flags(&trades, &mut returned);
        assert!(contributions_to_apply(&batch, &replay).is_empty());
    }

    #[tokio::test]
    async fn drain_on_empty_queue_is_ok() {
        let (queue, _batches, token) =
            collecting_queue(10, Duration::from_secs(60), Arc::new(AtomicBool::new(false)));
        assert_eq!(queue.drain().await.unwrap(), 0);
        token.cancel();
    }
}
