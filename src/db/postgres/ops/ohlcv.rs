use log::error;

use crate::db::models::OhlcvUpdate;
use crate::db::postgres::PostgresClient;

impl PostgresClient {
    /// Fold one price observation into the pool's minute bar.
    ///
    /// First insert seeds all four OHLC legs from the price; conflicts keep
    /// the open, stretch high/low, replace the close, and accumulate volume
    /// and count. Zero-volume zero-count seeds (fast-track) leave existing
    /// bars' sums untouched. The accumulation is not self-deduplicating:
    /// the trade flusher calls this at most once per newly inserted trade
    /// row, so height replays do not inflate the sums.
    pub async fn upsert_ohlcv_1m(&self, update: &OhlcvUpdate) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO indexer.ohlcv_1m
                (pool_id, bucket_start, open, high, low, close, volume_zig, trade_count)
            VALUES ($1, $2, $3, $3, $3, $3, $4, $5)
            ON CONFLICT (pool_id, bucket_start) DO UPDATE SET
                high = GREATEST(ohlcv_1m.high, EXCLUDED.high),
                low = LEAST(ohlcv_1m.low, EXCLUDED.low),
                close = EXCLUDED.close,
                volume_zig = ohlcv_1m.volume_zig + EXCLUDED.volume_zig,
                trade_count = ohlcv_1m.trade_count + EXCLUDED.trade_count
        "#;

        client
            .execute(
                query,
                &[
                    &update.pool_id,
                    &update.bucket_start,
                    &update.price,
                    &update.volume_zig,
                    &update.trade_inc,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    "Failed to upsert ohlcv bar for pool {} at {}: {:?}",
                    update.pool_id, update.bucket_start, e
                );
                e
            })?;

        Ok(())
    }
}
