use log::error;

use crate::db::models::MatrixBucket;
use crate::db::postgres::PostgresClient;

impl PostgresClient {
    /// Recompute all four rollup windows for one pool from the trades and
    /// minute-bar tables. One upsert statement per bucket.
    pub async fn refresh_pool_matrix(&self, pool_id: i64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            WITH wt AS (
                SELECT
                    COALESCE(SUM(CASE
                        WHEN offer_denom = 'uzig'
                            THEN COALESCE(offer_amount_base, '0')::numeric / 1e6
                        WHEN ask_denom = 'uzig'
                            THEN COALESCE(return_amount_base, '0')::numeric / 1e6
                        ELSE 0
                    END), 0)::float8 AS volume_zig,
                    COUNT(*) AS trades,
                    COUNT(*) FILTER (WHERE direction = 'buy') AS buys,
                    COUNT(*) FILTER (WHERE direction = 'sell') AS sells
                FROM indexer.trades
                WHERE pool_id = $1 AND action = 'swap'
                  AND created_at >= NOW() - make_interval(mins => $2)
            ), wb AS (
                SELECT
                    (array_agg(open ORDER BY bucket_start ASC))[1] AS first_open,
                    (array_agg(close ORDER BY bucket_start DESC))[1] AS last_close,
                    MAX(high) AS high,
                    MIN(low) AS low
                FROM indexer.ohlcv_1m
                WHERE pool_id = $1
                  AND bucket_start >= NOW() - make_interval(mins => $2)
            )
            INSERT INTO indexer.pool_matrix
                (pool_id, bucket, volume_zig, trade_count, buy_count, sell_count,
                 price_change_pct, high, low, updated_at)
            SELECT $1, $3::text, wt.volume_zig, wt.trades, wt.buys, wt.sells,
                   CASE WHEN wb.first_open > 0
                        THEN (wb.last_close - wb.first_open) / wb.first_open * 100
                   END,
                   wb.high, wb.low, NOW()
            FROM wt, wb
            ON CONFLICT (pool_id, bucket) DO UPDATE SET
                volume_zig = EXCLUDED.volume_zig,
                trade_count = EXCLUDED.trade_count,
                buy_count = EXCLUDED.buy_count,
                sell_count = EXCLUDED.sell_count,
                price_change_pct = EXCLUDED.price_change_pct,
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                updated_at = EXCLUDED.updated_at
        "#;

        for bucket in MatrixBucket::ALL {
            let mins = bucket.minutes() as i32;
            client
                .execute(query, &[&pool_id, &mins, &bucket.as_str()])
                .await
                .map_err(|e| {
                    error!(
                        "Failed to refresh pool matrix {} bucket {}: {:?}",
                        pool_id,
                        bucket.as_str(),
                        e
                    );
                    e
                })?;
        }

        Ok(())
    }

    /// Recompute all four rollup windows for one token, aggregating across
    /// every pool where it is the base asset.
    pub async fn refresh_token_matrix(&self, token_id: i64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            WITH token_pools AS (
                SELECT id FROM indexer.pools WHERE base_token_id = $1
            ), wt AS (
                SELECT
                    COALESCE(SUM(CASE
                        WHEN offer_denom = 'uzig'
                            THEN COALESCE(offer_amount_base, '0')::numeric / 1e6
                        WHEN ask_denom = 'uzig'
                            THEN COALESCE(return_amount_base, '0')::numeric / 1e6
                        ELSE 0
                    END), 0)::float8 AS volume_zig,
                    COUNT(*) AS trades,
                    COUNT(*) FILTER (WHERE direction = 'buy') AS buys,
                    COUNT(*) FILTER (WHERE direction = 'sell') AS sells
                FROM indexer.trades
                WHERE pool_id IN (SELECT id FROM token_pools) AND action = 'swap'
                  AND created_at >= NOW() - make_interval(mins => $2)
            ), wb AS (
                SELECT
                    (array_agg(open ORDER BY bucket_start ASC))[1] AS first_open,
                    (array_agg(close ORDER BY bucket_start DESC))[1] AS last_close,
                    MAX(high) AS high,
                    MIN(low) AS low
                FROM indexer.ohlcv_1m
                WHERE pool_id IN (SELECT id FROM token_pools)
                  AND bucket_start >= NOW() - make_interval(mins => $2)
            )
            INSERT INTO indexer.token_matrix
                (token_id, bucket, volume_zig, trade_count, buy_count, sell_count,
                 price_change_pct, high, low, updated_at)
            SELECT $1, $3::text, wt.volume_zig, wt.trades, wt.buys, wt.sells,
                   CASE WHEN wb.first_open > 0
                        THEN (wb.last_close - wb.first_open) / wb.first_open * 100
                   END,
                   wb.high, wb.low, NOW()
            FROM wt, wb
            ON CONFLICT (token_id, bucket) DO UPDATE SET
                volume_zig = EXCLUDED.volume_zig,
                trade_count = EXCLUDED.trade_count,
                buy_count = EXCLUDED.buy_count,
                sell_count = EXCLUDED.sell_count,
                price_change_pct = EXCLUDED.price_change_pct,
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                updated_at = EXCLUDED.updated_at
        "#;

        for bucket in MatrixBucket::ALL {
            let mins = bucket.minutes() as i32;
            client
                .execute(query, &[&token_id, &mins, &bucket.as_str()])
                .await
                .map_err(|e| {
                    error!(
                        "Failed to refresh token matrix {} bucket {}: {:?}",
                        token_id,
                        bucket.as_str(),
                        e
                    );
                    e
                })?;
        }

        Ok(())
    }
}
