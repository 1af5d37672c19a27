use log::warn;

use crate::db::postgres::PostgresClient;
use crate::worker::parser::AssetAmount;

impl PostgresClient {
    /// Overwrite a pool's reserve snapshot. The two event legs are matched
    /// to the base/quote sides by denom; a leg matching neither side means
    /// the event belongs to some other pair and the write is skipped.
    pub async fn upsert_pool_state(
        &self,
        pool_id: i64,
        base_denom: &str,
        quote_denom: &str,
        legs: &[Option<AssetAmount>],
    ) -> anyhow::Result<()> {
        let mut base_reserve: Option<&str> = None;
        let mut quote_reserve: Option<&str> = None;

        for leg in legs.iter().flatten() {
            if leg.denom == base_denom {
                base_reserve = Some(&leg.amount_base);
            } else if leg.denom == quote_denom {
                quote_reserve = Some(&leg.amount_base);
            } else {
                warn!(
                    "Pool {} state leg denom {} matches neither {} nor {}; skipping",
                    pool_id, leg.denom, base_denom, quote_denom
                );
                return Ok(());
            }
        }

        let (Some(base_reserve), Some(quote_reserve)) = (base_reserve, quote_reserve) else {
            warn!("Pool {} state update missing a reserve leg; skipping", pool_id);
            return Ok(());
        };

        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO indexer.pool_states
                (pool_id, base_denom, base_reserve, quote_denom, quote_reserve, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (pool_id) DO UPDATE SET
                base_denom = EXCLUDED.base_denom,
                base_reserve = EXCLUDED.base_reserve,
                quote_denom = EXCLUDED.quote_denom,
                quote_reserve = EXCLUDED.quote_reserve,
                updated_at = EXCLUDED.updated_at
        "#;

        client
            .execute(
                query,
                &[&pool_id, &base_denom, &base_reserve, &quote_denom, &quote_reserve],
            )
            .await?;

        Ok(())
    }
}
