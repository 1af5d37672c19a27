use log::error;

use crate::db::models::{IndexState, NativePrice};
use crate::db::postgres::PostgresClient;

impl PostgresClient {
    /// Processing high-water mark. None until the first height completes.
    pub async fn get_index_state(&self) -> anyhow::Result<Option<IndexState>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT last_height, updated_at FROM indexer.index_state WHERE id = 1",
                &[],
            )
            .await?;

        Ok(row.map(|r| IndexState {
            last_height: r.get("last_height"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Advance the high-water mark. Called only after a height has fully
    /// succeeded, including the trade-sink drain.
    pub async fn set_index_state(&self, last_height: i64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO indexer.index_state (id, last_height, updated_at)
            VALUES (1, $1, NOW())
            ON CONFLICT (id) DO UPDATE SET
                last_height = EXCLUDED.last_height,
                updated_at = EXCLUDED.updated_at
        "#;

        client.execute(query, &[&last_height]).await.map_err(|e| {
            error!("Failed to update index state to height {}: {:?}", last_height, e);
            e
        })?;

        Ok(())
    }

    /// Reference USD price of the native unit, for the display shaper.
    pub async fn get_native_price(&self) -> anyhow::Result<Option<NativePrice>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT price_usd, updated_at FROM indexer.native_price WHERE id = 1",
                &[],
            )
            .await?;

        Ok(row.map(|r| NativePrice {
            price_usd: r.get("price_usd"),
            updated_at: r.get("updated_at"),
        }))
    }
}
