use chrono::{DateTime, Utc};
use log::error;

use crate::db::postgres::PostgresClient;

impl PostgresClient {
    /// Upsert the live price row for (token, pool).
    ///
    /// The conflict arm only takes timestamps moving forward, keeping the
    /// live row monotone when replays arrive out of order. Safe to call on
    /// every observation; the append-only tick series is written separately
    /// through [`PostgresClient::append_price_tick`].
    pub async fn upsert_price(
        &self,
        token_id: i64,
        pool_id: i64,
        price_in_zig: f64,
        is_pair_native: bool,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;

        let query = r#"
            INSERT INTO indexer.prices (token_id, pool_id, price_in_zig, is_pair_native, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token_id, pool_id) DO UPDATE SET
                price_in_zig = EXCLUDED.price_in_zig,
                is_pair_native = EXCLUDED.is_pair_native,
                updated_at = EXCLUDED.updated_at
            WHERE prices.updated_at <= EXCLUDED.updated_at
        "#;

        client
            .execute(query, &[&token_id, &pool_id, &price_in_zig, &is_pair_native, &at])
            .await
            .map_err(|e| {
                error!("Failed to upsert price for token {} pool {}: {:?}", token_id, pool_id, e);
                e
            })?;

        Ok(())
    }

    /// Append one row to the price-tick time series.
    ///
    /// The series is append-only with no dedup key, so callers must emit a
    /// tick at most once per observation (the trade flusher gates on newly
    /// inserted trade rows; the fast-track seed runs once per creation).
    pub async fn append_price_tick(
        &self,
        token_id: i64,
        pool_id: i64,
        price_in_zig: f64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                r#"
                INSERT INTO indexer.price_ticks (token_id, pool_id, price_in_zig, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
                &[&token_id, &pool_id, &price_in_zig, &at],
            )
            .await
            .map_err(|e| {
                error!("Failed to append price tick for token {} pool {}: {:?}", token_id, pool_id, e);
                e
            })?;

        Ok(())
    }
}
